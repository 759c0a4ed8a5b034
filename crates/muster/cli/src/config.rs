//! CLI configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! file (TOML, YAML or JSON, picked by extension), then `MUSTER_*`
//! environment variables. Nested keys use a double underscore, e.g.
//! `MUSTER_PROVISIONER__MAX_FAILURES=5`.

use muster_provisioner::ProvisionerConfig;
use serde::{Deserialize, Serialize};

use crate::error::{CliError, CliResult};

/// Muster configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MusterConfig {
    /// Provisioning engine settings
    #[serde(default)]
    pub provisioner: ProvisionerConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON log lines
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl MusterConfig {
    /// Load configuration from defaults, an optional file and the environment
    pub fn load(path: Option<&str>) -> CliResult<Self> {
        let mut builder = config::Config::builder();

        // Add default configuration
        builder = builder.add_source(config::Config::try_from(&MusterConfig::default())?);

        // Add file configuration if provided
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        // Add environment variables with MUSTER_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("MUSTER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: MusterConfig = builder.build()?.try_deserialize()?;
        config
            .provisioner
            .validate()
            .map_err(|e| CliError::Config(e.to_string()))?;
        Ok(config)
    }
}
