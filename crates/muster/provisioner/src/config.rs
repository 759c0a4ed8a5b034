//! Provisioner configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ProvisionError, Result};

/// Configuration for a provisioning run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionerConfig {
    /// Failed system attempts tolerated before creation is halted
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,

    /// Multiplier applied to each parent's weight
    #[serde(default = "default_parent_multiplier")]
    pub parent_multiplier: u64,

    /// Provider-level retries for a single slow operation
    #[serde(default = "default_node_retry_ceiling")]
    pub node_retry_ceiling: u32,

    /// Wait for every node to reach ready_to_provision
    #[serde(default)]
    pub readiness: PollSettings,

    /// Wait for a node's parents to complete
    #[serde(default)]
    pub provision_gate: PollSettings,

    /// Prefix of generated system tags
    #[serde(default = "default_tag_prefix")]
    pub tag_prefix: String,

    /// Provider used when the system does not name one
    #[serde(default = "default_provider")]
    pub provider: String,
}

fn default_max_failures() -> u32 {
    3
}

fn default_parent_multiplier() -> u64 {
    muster_types::DEFAULT_PARENT_MULTIPLIER
}

fn default_node_retry_ceiling() -> u32 {
    3
}

fn default_tag_prefix() -> String {
    "muster".to_string()
}

fn default_provider() -> String {
    "local".to_string()
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            max_failures: default_max_failures(),
            parent_multiplier: default_parent_multiplier(),
            node_retry_ceiling: default_node_retry_ceiling(),
            readiness: PollSettings::default(),
            provision_gate: PollSettings::default(),
            tag_prefix: default_tag_prefix(),
            provider: default_provider(),
        }
    }
}

impl ProvisionerConfig {
    /// Reject values the state machines cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.max_failures == 0 {
            return Err(ProvisionError::InvalidConfig(
                "max_failures must be at least 1".into(),
            ));
        }
        if self.parent_multiplier == 0 {
            return Err(ProvisionError::InvalidConfig(
                "parent_multiplier must be at least 1".into(),
            ));
        }
        if self.node_retry_ceiling == 0 {
            return Err(ProvisionError::InvalidConfig(
                "node_retry_ceiling must be at least 1".into(),
            ));
        }
        self.readiness.validate("readiness")?;
        self.provision_gate.validate("provision_gate")?;
        Ok(())
    }
}

/// Interval and deadline of a polling event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSettings {
    /// Time between condition checks in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Deadline from the start of the event in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_interval_ms() -> u64 {
    2_000
}

fn default_timeout_ms() -> u64 {
    100_000
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl PollSettings {
    /// Settings from durations. A non-zero interval below one millisecond
    /// rounds up to one millisecond.
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        let interval_ms = if interval.is_zero() {
            0
        } else {
            millis(interval).max(1)
        };
        Self {
            interval_ms,
            timeout_ms: millis(timeout),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub(crate) fn validate(&self, name: &str) -> Result<()> {
        if self.interval_ms == 0 {
            return Err(ProvisionError::InvalidConfig(format!(
                "{name}.interval_ms must be positive"
            )));
        }
        if self.timeout_ms == 0 {
            return Err(ProvisionError::InvalidConfig(format!(
                "{name}.timeout_ms must be positive"
            )));
        }
        Ok(())
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProvisionerConfig::default();
        assert_eq!(config.max_failures, 3);
        assert_eq!(config.parent_multiplier, 5);
        assert_eq!(config.node_retry_ceiling, 3);
        assert_eq!(config.readiness.interval(), Duration::from_secs(2));
        assert_eq!(config.provision_gate.timeout(), Duration::from_secs(100));
        assert_eq!(config.tag_prefix, "muster");
        assert_eq!(config.provider, "local");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_deserialization_fills_defaults() {
        let config: ProvisionerConfig =
            serde_json::from_str(r#"{"max_failures": 5, "readiness": {"timeout_ms": 10000}}"#)
                .unwrap();
        assert_eq!(config.max_failures, 5);
        assert_eq!(config.readiness.timeout(), Duration::from_secs(10));
        assert_eq!(config.readiness.interval_ms, 2_000);
        assert_eq!(config.provider, "local");
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        let config = ProvisionerConfig {
            max_failures: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ProvisionError::InvalidConfig(_))
        ));

        let config = ProvisionerConfig {
            provision_gate: PollSettings {
                interval_ms: 0,
                timeout_ms: 1_000,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_poll_settings_keep_sub_second_precision() {
        let settings = PollSettings::new(Duration::from_micros(500), Duration::from_millis(1_500));
        assert_eq!(settings.interval(), Duration::from_millis(1));
        assert_eq!(settings.timeout(), Duration::from_millis(1_500));
        assert!(settings.validate("readiness").is_ok());

        let settings = PollSettings::new(Duration::from_millis(250), Duration::from_millis(500));
        assert_eq!(settings.interval(), Duration::from_millis(250));
        assert_eq!(settings.timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_zero_interval_stays_invalid() {
        let settings = PollSettings::new(Duration::ZERO, Duration::from_secs(1));
        assert_eq!(settings.interval_ms, 0);
        assert!(settings.validate("readiness").is_err());
    }
}
