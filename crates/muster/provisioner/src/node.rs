//! Node provisioner: the per-node state machine
//!
//! Sequences one node through creation, boot, device setup and
//! provisioning. The machine only decides the next state and which entry
//! action to run; the system dispatcher carries the actions out against
//! the provider.
//!
//! | Event                | From → To                              | Entry action       |
//! |----------------------|----------------------------------------|--------------------|
//! | `initialized`        | initializing → creating                | create node        |
//! | `created`            | creating → booting                     | boot               |
//! | `booted`             | booting → partitioning_device          | partition          |
//! | `partitioned_device` | partitioning_device → installing_mdadm | setup mdadm        |
//! | `mdadm_installed`    | installing_mdadm → initializing_raid   | setup raid         |
//! | `raid_initialized`   | initializing_raid → formatting_device  | format device      |
//! | `device_formatted`   | formatting_device → ready_to_provision | notify             |
//! | `begin_provision`    | ready_to_provision → provisioning      | provision          |
//! | `provisioned`        | provisioning → complete                | notify system      |
//! | `error_occurred`     | any → handling_error                   | report error       |
//! | `reclaimed`          | any → creating                         | create node        |
//! | `failed`             | any → handling_failure                 | report failure     |
//!
//! `handling_failure` is terminal.

use std::fmt;
use std::time::Duration;

use muster_types::NodeId;
use serde::{Deserialize, Serialize};

use crate::error::{ProvisionError, Result};
use crate::events::{NodeEvent, TransitionRecord};

// ── States ───────────────────────────────────────────────────────────

/// Where a node is in its provisioning pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Initializing,
    Creating,
    Booting,
    PartitioningDevice,
    InstallingMdadm,
    InitializingRaid,
    FormattingDevice,
    ReadyToProvision,
    Provisioning,
    Complete,
    HandlingError,
    HandlingFailure,
}

impl NodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Initializing => "initializing",
            NodeState::Creating => "creating",
            NodeState::Booting => "booting",
            NodeState::PartitioningDevice => "partitioning_device",
            NodeState::InstallingMdadm => "installing_mdadm",
            NodeState::InitializingRaid => "initializing_raid",
            NodeState::FormattingDevice => "formatting_device",
            NodeState::ReadyToProvision => "ready_to_provision",
            NodeState::Provisioning => "provisioning",
            NodeState::Complete => "complete",
            NodeState::HandlingError => "handling_error",
            NodeState::HandlingFailure => "handling_failure",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeState::HandlingFailure)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Actions ──────────────────────────────────────────────────────────

/// Work performed on entering a state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeAction {
    CreateNode,
    Boot,
    Partition,
    SetupMdadm,
    SetupRaid,
    FormatDevice,
    /// The node is ready and waits for its provisioning gate
    NotifyReady,
    Provision,
    /// Tell the system that this node is complete
    NotifyProvisioned,
    HandleError(String),
    HandleFailure,
}

/// A state change together with its entry action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTransition {
    pub from: NodeState,
    pub to: NodeState,
    pub event: NodeEvent,
    pub action: NodeAction,
}

/// The transition table. `None` means the event is not allowed in `state`.
pub fn node_transition(state: NodeState, event: &NodeEvent) -> Option<(NodeState, NodeAction)> {
    use NodeEvent as E;
    use NodeState as S;

    if state.is_terminal() {
        return None;
    }

    let next = match (state, event) {
        (_, E::Failed) => (S::HandlingFailure, NodeAction::HandleFailure),
        (_, E::ErrorOccurred(reason)) => {
            (S::HandlingError, NodeAction::HandleError(reason.clone()))
        }
        (_, E::Reclaimed) => (S::Creating, NodeAction::CreateNode),
        (S::Initializing, E::Initialized) => (S::Creating, NodeAction::CreateNode),
        (S::Creating, E::Created) => (S::Booting, NodeAction::Boot),
        (S::Booting, E::Booted) => (S::PartitioningDevice, NodeAction::Partition),
        (S::PartitioningDevice, E::PartitionedDevice) => {
            (S::InstallingMdadm, NodeAction::SetupMdadm)
        }
        (S::InstallingMdadm, E::MdadmInstalled) => (S::InitializingRaid, NodeAction::SetupRaid),
        (S::InitializingRaid, E::RaidInitialized) => {
            (S::FormattingDevice, NodeAction::FormatDevice)
        }
        (S::FormattingDevice, E::DeviceFormatted) => (S::ReadyToProvision, NodeAction::NotifyReady),
        (S::ReadyToProvision, E::BeginProvision) => (S::Provisioning, NodeAction::Provision),
        (S::Provisioning, E::Provisioned) => (S::Complete, NodeAction::NotifyProvisioned),
        _ => return None,
    };
    Some(next)
}

// ── Provisioner ──────────────────────────────────────────────────────

/// State machine driving one node
#[derive(Debug, Clone)]
pub struct NodeProvisioner {
    node: NodeId,
    log_prefix: String,
    state: NodeState,
    time_used: Duration,
    history: Vec<TransitionRecord<NodeState>>,
    last_error: Option<String>,
}

impl NodeProvisioner {
    pub fn new(node: NodeId, log_prefix: impl Into<String>) -> Self {
        Self {
            node,
            log_prefix: log_prefix.into(),
            state: NodeState::Initializing,
            time_used: Duration::ZERO,
            history: Vec::new(),
            last_error: None,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn log_prefix(&self) -> &str {
        &self.log_prefix
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Total time spent in provider calls for this node
    pub fn time_used(&self) -> Duration {
        self.time_used
    }

    pub fn history(&self) -> &[TransitionRecord<NodeState>] {
        &self.history
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub(crate) fn add_time_used(&mut self, elapsed: Duration) {
        self.time_used = self.time_used.saturating_add(elapsed);
    }

    /// Apply an event.
    ///
    /// On success the new state is in effect and the returned transition
    /// names the entry action the caller must run. Events outside the
    /// table leave the state unchanged.
    pub fn fire(&mut self, event: NodeEvent) -> Result<NodeTransition> {
        let Some((to, action)) = node_transition(self.state, &event) else {
            tracing::error!(
                state = %self.state,
                event = %event,
                "{} Invalid node transition",
                self.log_prefix
            );
            return Err(ProvisionError::InvalidTransition {
                machine: format!("node {}", self.log_prefix),
                state: self.state.to_string(),
                event: event.to_string(),
            });
        };

        let from = self.state;
        self.state = to;
        self.history
            .push(TransitionRecord::now(from, to, event.name()));
        if let NodeAction::HandleError(reason) = &action {
            self.last_error = Some(reason.clone());
        }

        tracing::debug!(
            from = %from,
            to = %to,
            event = %event,
            "{} Node transition",
            self.log_prefix
        );

        Ok(NodeTransition {
            from,
            to,
            event,
            action,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provisioner() -> NodeProvisioner {
        NodeProvisioner::new(NodeId(0), "[global: web]")
    }

    #[test]
    fn test_happy_path_sequence() {
        let mut node = provisioner();
        let steps = [
            (NodeEvent::Initialized, NodeState::Creating, NodeAction::CreateNode),
            (NodeEvent::Created, NodeState::Booting, NodeAction::Boot),
            (NodeEvent::Booted, NodeState::PartitioningDevice, NodeAction::Partition),
            (NodeEvent::PartitionedDevice, NodeState::InstallingMdadm, NodeAction::SetupMdadm),
            (NodeEvent::MdadmInstalled, NodeState::InitializingRaid, NodeAction::SetupRaid),
            (NodeEvent::RaidInitialized, NodeState::FormattingDevice, NodeAction::FormatDevice),
            (NodeEvent::DeviceFormatted, NodeState::ReadyToProvision, NodeAction::NotifyReady),
            (NodeEvent::BeginProvision, NodeState::Provisioning, NodeAction::Provision),
            (NodeEvent::Provisioned, NodeState::Complete, NodeAction::NotifyProvisioned),
        ];

        for (event, state, action) in steps {
            let transition = node.fire(event).unwrap();
            assert_eq!(transition.to, state);
            assert_eq!(transition.action, action);
            assert_eq!(node.state(), state);
        }
        assert_eq!(node.history().len(), 9);
        assert_eq!(node.history()[0].from, NodeState::Initializing);
        assert_eq!(node.history()[8].event, "provisioned");
    }

    #[test]
    fn test_out_of_order_event_is_rejected() {
        let mut node = provisioner();
        node.fire(NodeEvent::Initialized).unwrap();

        let err = node.fire(NodeEvent::BeginProvision).unwrap_err();
        match err {
            ProvisionError::InvalidTransition { state, event, .. } => {
                assert_eq!(state, "creating");
                assert_eq!(event, "begin_provision");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(node.state(), NodeState::Creating);
        assert_eq!(node.history().len(), 1);
    }

    #[test]
    fn test_error_from_any_state() {
        let mut node = provisioner();
        node.fire(NodeEvent::Initialized).unwrap();
        node.fire(NodeEvent::Created).unwrap();

        let transition = node.fire(NodeEvent::ErrorOccurred("boot failed".into())).unwrap();
        assert_eq!(transition.to, NodeState::HandlingError);
        assert_eq!(transition.action, NodeAction::HandleError("boot failed".into()));
        assert_eq!(node.last_error(), Some("boot failed"));
    }

    #[test]
    fn test_reclaimed_restarts_creation() {
        let mut node = provisioner();
        node.fire(NodeEvent::Initialized).unwrap();
        node.fire(NodeEvent::ErrorOccurred("lost".into())).unwrap();

        let transition = node.fire(NodeEvent::Reclaimed).unwrap();
        assert_eq!(transition.to, NodeState::Creating);
        assert_eq!(transition.action, NodeAction::CreateNode);
    }

    #[test]
    fn test_failure_is_terminal() {
        let mut node = provisioner();
        node.fire(NodeEvent::Initialized).unwrap();
        node.fire(NodeEvent::Failed).unwrap();
        assert_eq!(node.state(), NodeState::HandlingFailure);

        assert!(node.fire(NodeEvent::Reclaimed).is_err());
        assert!(node.fire(NodeEvent::ErrorOccurred("late".into())).is_err());
        assert_eq!(node.state(), NodeState::HandlingFailure);
    }

    #[test]
    fn test_time_used_accumulates() {
        let mut node = provisioner();
        node.add_time_used(Duration::from_millis(150));
        node.add_time_used(Duration::from_millis(50));
        assert_eq!(node.time_used(), Duration::from_millis(200));
    }
}
