//! Model error types
//!
//! Every variant here is a validation error: it is raised synchronously at
//! the point of construction or mutation and is never retried.

use crate::NodeId;
use thiserror::Error;

/// Errors raised while building or rebalancing a system model
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// The token did not match `role[..]` / `recipe[..]`, or its type was empty.
    #[error("invalid run list type in {token:?}: type must be one of (role|recipe)")]
    InvalidRunlistType { token: String },

    /// The name inside the brackets was empty or not a single word.
    #[error("invalid run list name in {token:?}: {reason}")]
    InvalidRunlistName { token: String, reason: String },

    /// A parent/child edge could not be recorded.
    #[error("invalid child: {0}")]
    InvalidChild(String),

    /// The declarative system description is missing required structure.
    #[error("invalid system description: {0}")]
    InvalidSystemHash(String),

    /// The dependency relation between nodes contains a cycle.
    #[error("dependency cycle between nodes: {}", .nodes.join(" -> "))]
    DependencyCycle { nodes: Vec<String> },

    /// A node id does not belong to this system.
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),
}

/// Result type for model operations
pub type Result<T> = std::result::Result<T, ModelError>;
