//! Provider contract and registry
//!
//! A provider performs the actual infrastructure work for one backend. The
//! state machines only sequence calls into it: every operation receives a
//! snapshot of the node and a [`NodeEvents`] sink, and must eventually
//! report the matching event (or `error_occurred`) through that sink.
//!
//! An operation returning `Err` is equivalent to reporting
//! `error_occurred` with the error's message.

pub mod local;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use muster_types::{NodeId, Options, RunList, System};
use serde::Serialize;

use crate::config::ProvisionerConfig;
use crate::error::{ProviderResult, ProvisionError, Result};
use crate::events::NodeEvents;

pub use local::{LocalConfig, LocalProvider};

// ── Node snapshot ────────────────────────────────────────────────────

/// What a provider gets to know about a node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSpec {
    pub id: NodeId,
    pub name: String,
    pub run_list: RunList,
    pub dependencies: RunList,
    /// System options with the node's own options merged on top
    pub options: Options,
    /// Prefix for log lines about this node
    pub log_prefix: String,
}

impl NodeSpec {
    pub fn from_system(system: &System, id: NodeId) -> Result<Self> {
        let node = system.node(id)?;
        Ok(Self {
            id,
            name: node.name.clone(),
            run_list: node.run_list.clone(),
            dependencies: node.dependencies.clone(),
            options: system.effective_options(id)?,
            log_prefix: system.log_prefix(id),
        })
    }

    pub fn option(&self, key: &str) -> Option<&serde_json::Value> {
        self.options.get(key)
    }

    /// The system tag this node was created under, if any
    pub fn tag(&self) -> Option<&str> {
        self.option("tag").and_then(serde_json::Value::as_str)
    }
}

// ── Provider ─────────────────────────────────────────────────────────

/// Infrastructure backend
#[async_trait]
pub trait Provider: Send + Sync {
    /// Registry name of the provider
    fn name(&self) -> &str;

    /// One-time preparation before the first system is created.
    async fn setup(&self) -> ProviderResult<()> {
        Ok(())
    }

    /// Prepare backend resources for a whole system and return its tag.
    async fn create_system(&self, _system: &System, tag_prefix: &str) -> ProviderResult<String> {
        Ok(generate_tag(tag_prefix))
    }

    /// Launch the node's instance. Reports `created`.
    async fn create_node(&self, node: NodeSpec, events: NodeEvents) -> ProviderResult<()>;

    /// Wait for the instance to accept work. Reports `booted`.
    async fn boot(&self, node: NodeSpec, events: NodeEvents) -> ProviderResult<()>;

    /// Partition attached devices. Reports `partitioned_device`.
    async fn partition(&self, _node: NodeSpec, events: NodeEvents) -> ProviderResult<()> {
        events.partitioned_device();
        Ok(())
    }

    /// Install the RAID tooling. Reports `mdadm_installed`.
    async fn setup_mdadm(&self, _node: NodeSpec, events: NodeEvents) -> ProviderResult<()> {
        events.mdadm_installed();
        Ok(())
    }

    /// Assemble the RAID array. Reports `raid_initialized`.
    async fn setup_raid(&self, _node: NodeSpec, events: NodeEvents) -> ProviderResult<()> {
        events.raid_initialized();
        Ok(())
    }

    /// Create the filesystem. Reports `device_formatted`.
    async fn format_device(&self, _node: NodeSpec, events: NodeEvents) -> ProviderResult<()> {
        events.device_formatted();
        Ok(())
    }

    /// Install the node's run list. Reports `provisioned`.
    async fn provision(&self, node: NodeSpec, events: NodeEvents) -> ProviderResult<()>;

    /// Tear down whatever exists for these nodes.
    async fn kill(&self, nodes: Vec<NodeSpec>) -> ProviderResult<()>;
}

/// A unique system tag: the prefix followed by 12 hex characters.
pub fn generate_tag(prefix: &str) -> String {
    let bytes: [u8; 6] = rand::random();
    let suffix: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}-{}", prefix, suffix)
}

// ── Registry ─────────────────────────────────────────────────────────

/// Builds a provider from the provisioner configuration
pub type ProviderFactory = Arc<dyn Fn(&ProvisionerConfig) -> Arc<dyn Provider> + Send + Sync>;

/// Provider constructors by name
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in providers
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("local", |config: &ProvisionerConfig| {
            Arc::new(LocalProvider::new(LocalConfig {
                retry_ceiling: config.node_retry_ceiling,
                ..LocalConfig::default()
            })) as Arc<dyn Provider>
        });
        registry
    }

    /// Register a provider constructor, replacing any with the same name
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&ProvisionerConfig) -> Arc<dyn Provider> + Send + Sync + 'static,
    {
        let name = normalize(name);
        tracing::debug!(provider = %name, "Provider registered");
        self.factories.insert(name, Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(&normalize(name))
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Build the named provider.
    ///
    /// Names are matched case-insensitively after trimming whitespace.
    pub fn create(&self, name: &str, config: &ProvisionerConfig) -> Result<Arc<dyn Provider>> {
        let factory = self
            .factories
            .get(&normalize(name))
            .ok_or_else(|| ProvisionError::InvalidProvider(name.to_string()))?;
        Ok(factory(config))
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}
