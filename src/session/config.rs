// ABOUTME: Per-session options for leasing a browser from the pool
//
// Controls context isolation and which pages receive the rule hook.

use serde::{Deserialize, Serialize};

use super::rules::RuleOptions;

/// Options for a single session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Run the session in a private (incognito) context
    pub incognito: bool,

    /// Apply `rule_options` to popups as well as the primary page
    pub apply_rules_to_popups: bool,

    /// Options forwarded to the rule hook; no rules are applied when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_options: Option<RuleOptions>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            incognito: true,
            apply_rules_to_popups: true,
            rule_options: None,
        }
    }
}

impl SessionConfig {
    /// Same options with rules applied from `options`
    #[must_use]
    pub fn with_rules(mut self, options: RuleOptions) -> Self {
        self.rule_options = Some(options);
        self
    }

    /// Options handed to the popup listener, if popups get rules at all
    pub(crate) fn popup_rules(&self) -> Option<RuleOptions> {
        if self.apply_rules_to_popups {
            self.rule_options.clone()
        } else {
            None
        }
    }
}
