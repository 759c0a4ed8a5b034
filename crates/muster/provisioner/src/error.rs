//! Provisioning error types

use muster_types::ModelError;
use thiserror::Error;

/// Errors reported by a provider backend.
///
/// These are operational errors: they never escape to the caller directly
/// but are funneled into `error_occurred` on the node that hit them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("Provider backend error: {0}")]
    Backend(String),

    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Provider {provider} does not support {operation}")]
    Unsupported { provider: String, operation: String },
}

/// Result type for provider operations
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Provisioning errors
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Invalid provider: {0}")]
    InvalidProvider(String),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Invalid transition in {machine}: {event} is not allowed from {state}")]
    InvalidTransition {
        machine: String,
        state: String,
        event: String,
    },

    #[error("System creation halted after {failures} failures: {last_error}")]
    CreationHalted { failures: u32, last_error: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("No system has been set up")]
    NoSystem,

    #[error("Provisioner stopped: {0}")]
    Stopped(String),
}

/// Result type for provisioning operations
pub type Result<T> = std::result::Result<T, ProvisionError>;
