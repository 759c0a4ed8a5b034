//! Muster Types - Core model for system provisioning
//!
//! A *system* is a set of *nodes* that are provisioned together. Each node
//! declares the capabilities it provides (its run list) and the capabilities
//! it needs from other nodes before it can be provisioned (its dependencies).
//! The system turns those declarations into a dependency graph that the
//! provisioner walks.
//!
//! ## Key Concepts
//!
//! - **RunListItem**: A validated `role[name]` / `recipe[name]` token
//! - **Node**: One provisionable machine with run list, dependencies, options
//! - **System**: Owner of the nodes and of the derived parent/child edges
//! - **Rebalancing**: Recomputing edges so each dependency hangs from the
//!   lightest provider
//! - **SystemDescription**: The declarative (JSON/YAML) form of a system

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod description;
pub mod error;
pub mod node;
pub mod runlist;
pub mod system;

// Re-export main types
pub use description::{NodeDescription, SystemDescription};
pub use error::{ModelError, Result};
pub use node::{Node, NodeId, Options, DEFAULT_PARENT_MULTIPLIER};
pub use runlist::{RunList, RunListItem, RunListKind};
pub use system::System;
