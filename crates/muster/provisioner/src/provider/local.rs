//! In-memory provider
//!
//! Simulates a backend without touching any infrastructure: instances
//! "launch" immediately and report running once their boot delay has
//! passed. Used by the CLI and by tests.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::{NodeSpec, Provider};
use crate::config::PollSettings;
use crate::error::{ProviderError, ProviderResult, ProvisionError, Result};
use crate::events::NodeEvents;
use crate::polling::{poll_with_retries, PollContext, PollingTask};

/// Local provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Time from launch until an instance reports running
    #[serde(default = "default_boot_delay_ms")]
    pub boot_delay_ms: u64,

    /// Time spent applying a run list
    #[serde(default = "default_provision_delay_ms")]
    pub provision_delay_ms: u64,

    /// How often and how long to wait for an instance to run
    #[serde(default = "default_boot_poll")]
    pub boot_poll: PollSettings,

    /// Boot waits attempted before giving up
    #[serde(default = "default_retry_ceiling")]
    pub retry_ceiling: u32,
}

fn default_boot_delay_ms() -> u64 {
    500
}

fn default_provision_delay_ms() -> u64 {
    200
}

fn default_boot_poll() -> PollSettings {
    PollSettings {
        interval_ms: 250,
        timeout_ms: 10_000,
    }
}

fn default_retry_ceiling() -> u32 {
    3
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            boot_delay_ms: default_boot_delay_ms(),
            provision_delay_ms: default_provision_delay_ms(),
            boot_poll: default_boot_poll(),
            retry_ceiling: default_retry_ceiling(),
        }
    }
}

impl LocalConfig {
    /// Reject settings the boot wait cannot work with.
    pub fn validate(&self) -> Result<()> {
        self.boot_poll.validate("boot_poll")?;
        if self.retry_ceiling == 0 {
            return Err(ProvisionError::InvalidConfig(
                "retry_ceiling must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Lifecycle of a simulated instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Pending,
    Running,
    Provisioned,
}

/// A simulated instance
#[derive(Debug, Clone)]
pub struct LocalInstance {
    pub instance_id: String,
    pub node: String,
    pub tag: Option<String>,
    pub state: InstanceState,
    launched_at: Instant,
    boot_delay: Duration,
}

impl LocalInstance {
    fn is_running(&self) -> bool {
        self.state != InstanceState::Pending || self.launched_at.elapsed() >= self.boot_delay
    }
}

/// Provider backed by an in-memory instance table
#[derive(Debug, Default)]
pub struct LocalProvider {
    config: LocalConfig,
    instances: DashMap<String, LocalInstance>,
}

impl LocalProvider {
    pub fn new(config: LocalConfig) -> Self {
        Self {
            config,
            instances: DashMap::new(),
        }
    }

    /// Provider from a configuration that has not been checked yet
    pub fn try_new(config: LocalConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(config))
    }

    /// Snapshot of the live instances
    pub fn instances(&self) -> Vec<LocalInstance> {
        let mut instances: Vec<LocalInstance> =
            self.instances.iter().map(|e| e.value().clone()).collect();
        instances.sort_by(|a, b| a.node.cmp(&b.node));
        instances
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    fn key(node: &NodeSpec) -> String {
        format!("{}/{}", node.tag().unwrap_or("global"), node.name)
    }

    /// `boot_delay_ms` on the node overrides the configured delay.
    fn boot_delay(&self, node: &NodeSpec) -> Duration {
        let ms = node
            .option("boot_delay_ms")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(self.config.boot_delay_ms);
        Duration::from_millis(ms)
    }

    fn running(&self, key: &str) -> ProviderResult<bool> {
        self.instances
            .get(key)
            .map(|i| i.is_running())
            .ok_or_else(|| ProviderError::InstanceNotFound(key.to_string()))
    }
}

/// Waits for one instance to report running
struct WaitRunning<'a> {
    provider: &'a LocalProvider,
    key: String,
    prefix: String,
    iteration: u32,
}

#[async_trait]
impl PollingTask for WaitRunning<'_> {
    async fn on_start(&mut self, _ctx: &mut PollContext) {
        tracing::debug!(
            iteration = self.iteration,
            "{} Waiting for instance to run",
            self.prefix
        );
    }

    async fn on_tick(&mut self, ctx: &mut PollContext) {
        match self.provider.running(&self.key) {
            Ok(true) => ctx.event_complete(),
            Ok(false) => {}
            // boot reports the missing instance once the wait ends
            Err(_) => ctx.event_complete(),
        }
    }

    async fn on_timeout(&mut self, ctx: &mut PollContext) {
        tracing::warn!(
            iteration = self.iteration,
            waited_ms = ctx.elapsed().as_millis() as u64,
            "{} Wait for instance running timed out",
            self.prefix
        );
    }
}

#[async_trait]
impl Provider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn create_node(&self, node: NodeSpec, events: NodeEvents) -> ProviderResult<()> {
        let key = Self::key(&node);
        let bytes: [u8; 4] = rand::random();
        let instance_id = format!(
            "i-{}",
            bytes.iter().map(|b| format!("{:02x}", b)).collect::<String>()
        );

        tracing::info!(instance_id = %instance_id, "{} Launching instance", node.log_prefix);
        self.instances.insert(
            key,
            LocalInstance {
                instance_id,
                node: node.name.clone(),
                tag: node.tag().map(str::to_string),
                state: InstanceState::Pending,
                launched_at: Instant::now(),
                boot_delay: self.boot_delay(&node),
            },
        );

        events.created();
        Ok(())
    }

    async fn boot(&self, node: NodeSpec, events: NodeEvents) -> ProviderResult<()> {
        let key = Self::key(&node);
        let (settings, ceiling) = (&self.config.boot_poll, self.config.retry_ceiling);
        let result = poll_with_retries(settings, ceiling, |iteration| WaitRunning {
            provider: self,
            key: key.clone(),
            prefix: node.log_prefix.clone(),
            iteration,
        })
        .await;

        if !result.outcome.is_completed() {
            return Err(ProviderError::Timeout {
                operation: format!("{} to boot", node.name),
            });
        }

        match self.instances.get_mut(&key) {
            Some(mut instance) => instance.state = InstanceState::Running,
            None => return Err(ProviderError::InstanceNotFound(key)),
        }

        tracing::info!(
            iterations = result.iterations,
            "{} Instance running",
            node.log_prefix
        );
        events.booted();
        Ok(())
    }

    async fn provision(&self, node: NodeSpec, events: NodeEvents) -> ProviderResult<()> {
        let key = Self::key(&node);
        if !self.running(&key)? {
            return Err(ProviderError::Backend(format!(
                "instance for {} is not running",
                node.name
            )));
        }

        tokio::time::sleep(Duration::from_millis(self.config.provision_delay_ms)).await;

        match self.instances.get_mut(&key) {
            Some(mut instance) => instance.state = InstanceState::Provisioned,
            None => return Err(ProviderError::InstanceNotFound(key)),
        }

        tracing::info!(run_list = %node.run_list, "{} Run list applied", node.log_prefix);
        events.provisioned();
        Ok(())
    }

    async fn kill(&self, nodes: Vec<NodeSpec>) -> ProviderResult<()> {
        for node in &nodes {
            if let Some((_, instance)) = self.instances.remove(&Self::key(node)) {
                tracing::info!(
                    instance_id = %instance.instance_id,
                    "{} Instance terminated",
                    node.log_prefix
                );
            }
        }
        Ok(())
    }
}
