// ABOUTME: Rule application hook invoked once per page during a session
//
// Rules are whatever the caller wants applied to a fresh page before use
// (request blocking, header injection, script injection). The session only
// decides when to call the hook; what a rule does is up to the implementation.

use std::marker::PhantomData;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::pool::BoxError;

/// Options forwarded verbatim to the rule hook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleOptions(pub Value);

impl RuleOptions {
    /// Wrap any JSON value
    pub const fn new(value: Value) -> Self {
        Self(value)
    }

    /// Look up a top-level option
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

impl From<Value> for RuleOptions {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Applies content rules to a page
///
/// Not required to be idempotent; the session calls it at most once per
/// page for a given set of options.
#[async_trait]
pub trait RuleHook<P>: Send + Sync + 'static {
    /// Apply `options` to `page`
    async fn apply(&self, page: &P, options: &RuleOptions) -> Result<(), BoxError>;
}

/// Hook that applies nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRules;

#[async_trait]
impl<P: Sync + 'static> RuleHook<P> for NoRules {
    async fn apply(&self, _page: &P, _options: &RuleOptions) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Adapts a synchronous closure into a `RuleHook`
pub struct FnRuleHook<P, F> {
    func: F,
    _page: PhantomData<fn(&P)>,
}

impl<P, F> FnRuleHook<P, F>
where
    F: Fn(&P, &RuleOptions) -> Result<(), BoxError> + Send + Sync + 'static,
{
    /// Wrap `func`
    pub const fn new(func: F) -> Self {
        Self {
            func,
            _page: PhantomData,
        }
    }
}

#[async_trait]
impl<P, F> RuleHook<P> for FnRuleHook<P, F>
where
    P: Sync + 'static,
    F: Fn(&P, &RuleOptions) -> Result<(), BoxError> + Send + Sync + 'static,
{
    async fn apply(&self, page: &P, options: &RuleOptions) -> Result<(), BoxError> {
        (self.func)(page, options)
    }
}
