//! Muster Provisioner - Event-driven provisioning of node systems
//!
//! Drives a [`muster_types::System`] from nothing to fully provisioned
//! infrastructure through a pluggable [`Provider`].
//!
//! ## Key Concepts
//!
//! - **PollingEvent**: Bounded wait on a slow condition (interval + deadline)
//! - **Provider**: Backend performing the infrastructure work for each step
//! - **NodeProvisioner**: Per-node state machine sequencing provider calls
//! - **SystemProvisioner**: System state machine, dependency-ordered
//!   provisioning and kill-and-recreate retries up to `max_failures`
//! - **Provisioner**: Entry point from a declarative system description
//!
//! ## Example
//!
//! ```no_run
//! use muster_provisioner::{Provisioner, ProvisionerConfig};
//! use serde_json::json;
//!
//! # async fn run() -> muster_provisioner::Result<()> {
//! let mut provisioner = Provisioner::new(ProvisionerConfig::default())?;
//! provisioner.setup_system(json!({
//!     "nodes": [
//!         { "name": "db", "run_list": ["role[db]"] },
//!         { "name": "app", "dependencies": ["role[db]"] }
//!     ]
//! }))?;
//! let report = provisioner.begin_provisioning().await?;
//! println!("provisioned {} nodes", report.nodes.len());
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod events;
pub mod node;
pub mod polling;
pub mod provider;
pub mod provisioner;
pub mod system;

pub use config::{PollSettings, ProvisionerConfig};
pub use error::{ProviderError, ProviderResult, ProvisionError, Result};
pub use events::{NodeEvent, NodeEvents, SystemEvent, SystemHandle, TransitionRecord};
pub use node::{NodeAction, NodeProvisioner, NodeState, NodeTransition};
pub use polling::{
    poll_with_retries, wait_until, PollContext, PollOutcome, PollingEvent, PollingEventConfig,
    PollingTask, RetryOutcome,
};
pub use provider::{
    generate_tag, LocalConfig, LocalProvider, NodeSpec, Provider, ProviderFactory,
    ProviderRegistry,
};
pub use provisioner::{DescriptionFormat, Provisioner};
pub use system::{NodeBoard, NodeReport, ProvisionReport, SystemProvisioner, SystemState};
