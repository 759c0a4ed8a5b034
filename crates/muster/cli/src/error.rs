//! CLI error types

use thiserror::Error;

/// CLI errors
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {path}: {source}")]
    Io {
        /// File being read
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// JSON encoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid system description
    #[error("Model error: {0}")]
    Model(#[from] muster_types::ModelError),

    /// Provisioning failed
    #[error("Provisioning error: {0}")]
    Provision(#[from] muster_provisioner::ProvisionError),
}

impl From<config::ConfigError> for CliError {
    fn from(err: config::ConfigError) -> Self {
        CliError::Config(err.to_string())
    }
}

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;
