// ABOUTME: Configuration for the browser pool engine
//
// Defines PoolConfig with all tunable parameters for the pool:
// - Sizing (min warm resources, max concurrently created)
// - Freshness window and borrow-time validation
// - Acquire queue timeout
// - Eviction sweep cadence and sample size

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Configuration for the resource pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Begin creating and evicting immediately on construction
    pub autostart: bool,

    /// Resources kept warm in the pool
    pub min: usize,

    /// Hard cap on concurrently created resources
    pub max: usize,

    /// Freshness window; a resource older than this is invalid
    #[serde(with = "duration_millis")]
    pub timeout: Duration,

    /// Validate idle resources before handing them out
    pub test_on_borrow: bool,

    // === Acquire queue ===
    /// Maximum time a caller waits in the acquire queue (None = forever)
    #[serde(with = "opt_duration_millis", skip_serializing_if = "Option::is_none")]
    pub acquire_timeout: Option<Duration>,

    // === Eviction ===
    /// Interval between eviction sweeps (None = sweeping disabled)
    #[serde(with = "opt_duration_millis", skip_serializing_if = "Option::is_none")]
    pub eviction_interval: Option<Duration>,

    /// Idle resources tested per eviction sweep
    pub eviction_sample: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            autostart: true,
            min: 0,
            max: 5,
            timeout: Duration::from_millis(30_000),
            test_on_borrow: true,

            acquire_timeout: None,

            eviction_interval: None,
            eviction_sample: 3,
        }
    }
}

impl PoolConfig {
    /// Return the effective configuration used by the pool
    ///
    /// `min` is clamped to `max`, and `max` is raised to at least one so the
    /// pool can ever hand out a resource.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.max == 0 {
            warn!("Pool max of 0 would never serve a resource, using 1");
            self.max = 1;
        }
        if self.min > self.max {
            warn!(min = self.min, max = self.max, "Pool min exceeds max, clamping min to max");
            self.min = self.max;
        }
        self
    }

    /// Describe every adjustment `normalized` would make to this config
    pub fn adjustments(&self) -> Vec<String> {
        let mut notes = Vec::new();
        let max = self.max.max(1);
        if self.max == 0 {
            notes.push("max is 0, raised to 1".to_string());
        }
        if self.min > max {
            notes.push(format!("min {} exceeds max {max}, clamped to {max}", self.min));
        }
        notes
    }

    /// Whether the periodic eviction sweep should run
    pub fn eviction_enabled(&self) -> bool {
        self.eviction_interval.is_some_and(|interval| !interval.is_zero())
    }
}

/// Serde helper for Duration as milliseconds (u64)
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        #[allow(clippy::cast_possible_truncation)]
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Serde helper for optional Duration as milliseconds
pub(crate) mod opt_duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            #[allow(clippy::cast_possible_truncation)]
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
