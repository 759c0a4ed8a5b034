//! Events driving the node and system state machines
//!
//! Everything outside the dispatcher (provider calls, polling events,
//! external callers) talks to the state machines by sending events through
//! the sinks defined here.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use muster_types::NodeId;
use serde::Serialize;
use tokio::sync::mpsc;

// ── Node events ──────────────────────────────────────────────────────

/// Events understood by a node's state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    Initialized,
    Created,
    Booted,
    PartitionedDevice,
    MdadmInstalled,
    RaidInitialized,
    DeviceFormatted,
    BeginProvision,
    Provisioned,
    ErrorOccurred(String),
    Reclaimed,
    Failed,
}

impl NodeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            NodeEvent::Initialized => "initialized",
            NodeEvent::Created => "created",
            NodeEvent::Booted => "booted",
            NodeEvent::PartitionedDevice => "partitioned_device",
            NodeEvent::MdadmInstalled => "mdadm_installed",
            NodeEvent::RaidInitialized => "raid_initialized",
            NodeEvent::DeviceFormatted => "device_formatted",
            NodeEvent::BeginProvision => "begin_provision",
            NodeEvent::Provisioned => "provisioned",
            NodeEvent::ErrorOccurred(_) => "error_occurred",
            NodeEvent::Reclaimed => "reclaimed",
            NodeEvent::Failed => "failed",
        }
    }
}

impl fmt::Display for NodeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── System events ────────────────────────────────────────────────────

/// Events understood by the system state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemEvent {
    Initialized,
    Created,
    NodeProvisioned(NodeId),
    Provisioned,
    ErrorOccurred(String),
    Reclaimed,
    CreationHalted,
}

impl SystemEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SystemEvent::Initialized => "initialized",
            SystemEvent::Created => "created",
            SystemEvent::NodeProvisioned(_) => "node_provisioned",
            SystemEvent::Provisioned => "provisioned",
            SystemEvent::ErrorOccurred(_) => "error_occurred",
            SystemEvent::Reclaimed => "reclaimed",
            SystemEvent::CreationHalted => "creation_halted",
        }
    }
}

impl fmt::Display for SystemEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Envelopes ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub(crate) enum Target {
    Node(NodeId, NodeEvent),
    System(SystemEvent),
    /// Time a provider call for the node took
    Elapsed(NodeId, Duration),
}

/// An event plus the provisioning attempt that produced it.
///
/// `attempt: None` always applies to the current attempt.
#[derive(Debug, Clone)]
pub(crate) struct Envelope {
    pub(crate) attempt: Option<u64>,
    pub(crate) target: Target,
}

pub(crate) type EventSender = mpsc::UnboundedSender<Envelope>;
pub(crate) type EventReceiver = mpsc::UnboundedReceiver<Envelope>;

// ── History ──────────────────────────────────────────────────────────

/// One state change of a node or system machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionRecord<S> {
    pub from: S,
    pub to: S,
    pub event: &'static str,
    pub at: DateTime<Utc>,
}

impl<S> TransitionRecord<S> {
    pub(crate) fn now(from: S, to: S, event: &'static str) -> Self {
        Self {
            from,
            to,
            event,
            at: Utc::now(),
        }
    }
}

// ── Sinks ────────────────────────────────────────────────────────────

/// Event sink for one node, handed to every provider call.
///
/// Every provider operation must eventually report back through this sink;
/// an operation that never does stalls the node.
#[derive(Debug, Clone)]
pub struct NodeEvents {
    node: NodeId,
    attempt: u64,
    tx: EventSender,
}

impl NodeEvents {
    pub(crate) fn new(node: NodeId, attempt: u64, tx: EventSender) -> Self {
        Self { node, attempt, tx }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Deliver an event. Returns false once the provisioner has finished.
    pub fn send(&self, event: NodeEvent) -> bool {
        self.tx
            .send(Envelope {
                attempt: Some(self.attempt),
                target: Target::Node(self.node, event),
            })
            .is_ok()
    }

    pub fn created(&self) -> bool {
        self.send(NodeEvent::Created)
    }

    pub fn booted(&self) -> bool {
        self.send(NodeEvent::Booted)
    }

    pub fn partitioned_device(&self) -> bool {
        self.send(NodeEvent::PartitionedDevice)
    }

    pub fn mdadm_installed(&self) -> bool {
        self.send(NodeEvent::MdadmInstalled)
    }

    pub fn raid_initialized(&self) -> bool {
        self.send(NodeEvent::RaidInitialized)
    }

    pub fn device_formatted(&self) -> bool {
        self.send(NodeEvent::DeviceFormatted)
    }

    pub fn provisioned(&self) -> bool {
        self.send(NodeEvent::Provisioned)
    }

    pub fn error_occurred(&self, reason: impl Into<String>) -> bool {
        self.send(NodeEvent::ErrorOccurred(reason.into()))
    }
}

/// Event sink for the system state machine within one attempt
#[derive(Debug, Clone)]
pub(crate) struct SystemEvents {
    attempt: u64,
    tx: EventSender,
}

impl SystemEvents {
    pub(crate) fn new(attempt: u64, tx: EventSender) -> Self {
        Self { attempt, tx }
    }

    pub(crate) fn send(&self, event: SystemEvent) -> bool {
        self.tx
            .send(Envelope {
                attempt: Some(self.attempt),
                target: Target::System(event),
            })
            .is_ok()
    }
}

/// External handle to a running system provisioner.
///
/// Error signals sent through the handle apply to whatever attempt is
/// current when they are processed.
#[derive(Debug, Clone)]
pub struct SystemHandle {
    tx: EventSender,
}

impl SystemHandle {
    pub(crate) fn new(tx: EventSender) -> Self {
        Self { tx }
    }

    /// Report an operational error to the system. Returns false once the
    /// provisioner has finished.
    pub fn error_occurred(&self, reason: impl Into<String>) -> bool {
        self.tx
            .send(Envelope {
                attempt: None,
                target: Target::System(SystemEvent::ErrorOccurred(reason.into())),
            })
            .is_ok()
    }

    /// Deliver an event to one node's state machine.
    pub fn node_event(&self, node: NodeId, event: NodeEvent) -> bool {
        self.tx
            .send(Envelope {
                attempt: None,
                target: Target::Node(node, event),
            })
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_events_carry_attempt() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let events = NodeEvents::new(NodeId(2), 7, tx);
        assert!(events.booted());

        let envelope = rx.try_recv().unwrap();
        assert_eq!(envelope.attempt, Some(7));
        assert!(matches!(
            envelope.target,
            Target::Node(NodeId(2), NodeEvent::Booted)
        ));
    }

    #[test]
    fn test_send_after_close_reports_false() {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = SystemHandle::new(tx);
        drop(rx);
        assert!(!handle.error_occurred("late"));
    }

    #[test]
    fn test_event_names() {
        assert_eq!(NodeEvent::PartitionedDevice.to_string(), "partitioned_device");
        assert_eq!(
            NodeEvent::ErrorOccurred("boom".into()).to_string(),
            "error_occurred"
        );
        assert_eq!(SystemEvent::CreationHalted.to_string(), "creation_halted");
    }
}
