//! System provisioner: the system state machine and its dispatcher
//!
//! A [`SystemProvisioner`] owns the [`System`], one [`NodeProvisioner`] per
//! node, and every counter. All transitions happen inside its dispatch
//! loop, so nothing here needs a lock. Provider calls and polling events
//! run on their own tasks and only talk back by sending events.
//!
//! Provisioning runs in two phases. First every node is created, booted
//! and prepared independently until all of them are `ready_to_provision`.
//! Then the dependency graph is rebalanced and each node provisions once
//! all of its parents are `complete`.
//!
//! Errors are retried at the system level: the partially created
//! infrastructure is killed and creation starts over, up to
//! `max_failures` attempts. Every attempt tags the events it produces, so
//! late events from a torn-down attempt are dropped.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use muster_types::{NodeId, System};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::ProvisionerConfig;
use crate::error::{ProvisionError, Result};
use crate::events::{
    Envelope, EventReceiver, EventSender, NodeEvent, NodeEvents, SystemEvent, SystemEvents,
    SystemHandle, Target, TransitionRecord,
};
use crate::node::{NodeAction, NodeProvisioner, NodeState};
use crate::polling::{PollContext, PollingEvent, PollingTask};
use crate::provider::{NodeSpec, Provider};

// ── States ───────────────────────────────────────────────────────────

/// Where the system is in its provisioning run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemState {
    Initializing,
    Creating,
    Provisioning,
    Complete,
    HandlingError,
    Failed,
}

impl SystemState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemState::Initializing => "initializing",
            SystemState::Creating => "creating",
            SystemState::Provisioning => "provisioning",
            SystemState::Complete => "complete",
            SystemState::HandlingError => "handling_error",
            SystemState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SystemState::Complete | SystemState::Failed)
    }
}

impl fmt::Display for SystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The transition table. `None` means the event is not allowed in `state`.
pub fn system_transition(state: SystemState, event: &SystemEvent) -> Option<SystemState> {
    use SystemEvent as E;
    use SystemState as S;

    if state.is_terminal() {
        return None;
    }

    let next = match (state, event) {
        (_, E::ErrorOccurred(_)) => S::HandlingError,
        (_, E::CreationHalted) => S::Failed,
        (S::Initializing, E::Initialized) => S::Creating,
        (S::Creating, E::Created) => S::Provisioning,
        (S::Provisioning, E::NodeProvisioned(_)) => S::Provisioning,
        (S::Provisioning, E::Provisioned) => S::Complete,
        (S::HandlingError, E::Reclaimed) => S::Creating,
        _ => return None,
    };
    Some(next)
}

// ── Report ───────────────────────────────────────────────────────────

/// Final state of one node
#[derive(Debug, Clone)]
pub struct NodeReport {
    pub id: NodeId,
    pub name: String,
    pub state: NodeState,
    pub time_used: Duration,
    pub history: Vec<TransitionRecord<NodeState>>,
}

/// Outcome of a successful provisioning run
#[derive(Debug, Clone)]
pub struct ProvisionReport {
    pub state: SystemState,
    /// Failed attempts before the run completed
    pub failures: u32,
    pub nodes: Vec<NodeReport>,
    pub history: Vec<TransitionRecord<SystemState>>,
    /// The system with its final, rebalanced graph
    pub system: System,
}

impl ProvisionReport {
    pub fn node(&self, name: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.name == name)
    }
}

// ── Provider operations ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProviderOp {
    CreateNode,
    Boot,
    Partition,
    SetupMdadm,
    SetupRaid,
    FormatDevice,
    Provision,
}

impl ProviderOp {
    fn for_action(action: &NodeAction) -> Option<Self> {
        match action {
            NodeAction::CreateNode => Some(ProviderOp::CreateNode),
            NodeAction::Boot => Some(ProviderOp::Boot),
            NodeAction::Partition => Some(ProviderOp::Partition),
            NodeAction::SetupMdadm => Some(ProviderOp::SetupMdadm),
            NodeAction::SetupRaid => Some(ProviderOp::SetupRaid),
            NodeAction::FormatDevice => Some(ProviderOp::FormatDevice),
            NodeAction::Provision => Some(ProviderOp::Provision),
            _ => None,
        }
    }

    async fn call(
        self,
        provider: &dyn Provider,
        node: NodeSpec,
        events: NodeEvents,
    ) -> crate::error::ProviderResult<()> {
        match self {
            ProviderOp::CreateNode => provider.create_node(node, events).await,
            ProviderOp::Boot => provider.boot(node, events).await,
            ProviderOp::Partition => provider.partition(node, events).await,
            ProviderOp::SetupMdadm => provider.setup_mdadm(node, events).await,
            ProviderOp::SetupRaid => provider.setup_raid(node, events).await,
            ProviderOp::FormatDevice => provider.format_device(node, events).await,
            ProviderOp::Provision => provider.provision(node, events).await,
        }
    }
}

impl fmt::Display for ProviderOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderOp::CreateNode => "create_node",
            ProviderOp::Boot => "boot",
            ProviderOp::Partition => "partition",
            ProviderOp::SetupMdadm => "setup_mdadm",
            ProviderOp::SetupRaid => "setup_raid",
            ProviderOp::FormatDevice => "format_device",
            ProviderOp::Provision => "provision",
        };
        f.write_str(name)
    }
}

// ── Gates ────────────────────────────────────────────────────────────

/// Published node states, indexed by node id
pub type NodeBoard = Vec<NodeState>;

/// Waits until every node is ready to provision
struct ReadinessGate {
    board: watch::Receiver<NodeBoard>,
    events: SystemEvents,
}

#[async_trait]
impl PollingTask for ReadinessGate {
    async fn on_tick(&mut self, ctx: &mut PollContext) {
        let ready = self
            .board
            .borrow()
            .iter()
            .all(|state| *state == NodeState::ReadyToProvision);
        if ready {
            ctx.event_complete();
            self.events.send(SystemEvent::Created);
        }
    }

    async fn on_timeout(&mut self, ctx: &mut PollContext) {
        self.events.send(SystemEvent::ErrorOccurred(format!(
            "nodes not ready to provision after {:?}",
            ctx.timeout()
        )));
    }
}

/// Waits until all parents of one node are complete
struct ParentGate {
    board: watch::Receiver<NodeBoard>,
    parents: Vec<NodeId>,
    events: NodeEvents,
}

#[async_trait]
impl PollingTask for ParentGate {
    async fn on_tick(&mut self, ctx: &mut PollContext) {
        let complete = {
            let board = self.board.borrow();
            self.parents
                .iter()
                .all(|p| board.get(p.index()) == Some(&NodeState::Complete))
        };
        if complete {
            ctx.event_complete();
            self.events.send(NodeEvent::BeginProvision);
        }
    }

    async fn on_timeout(&mut self, ctx: &mut PollContext) {
        self.events.error_occurred(format!(
            "parents not complete after {:?}",
            ctx.timeout()
        ));
    }
}

// ── Provisioner ──────────────────────────────────────────────────────

/// State machine and dispatcher for a whole system
pub struct SystemProvisioner {
    system: System,
    provider: Arc<dyn Provider>,
    config: ProvisionerConfig,
    state: SystemState,
    nodes: Vec<NodeProvisioner>,
    history: Vec<TransitionRecord<SystemState>>,
    failures: u32,
    provisioned: usize,
    attempt: u64,
    last_error: Option<String>,
    tasks: Vec<JoinHandle<()>>,
    tx: EventSender,
    rx: EventReceiver,
    board: watch::Sender<NodeBoard>,
}

impl SystemProvisioner {
    pub fn new(system: System, provider: Arc<dyn Provider>, config: ProvisionerConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (board, _) = watch::channel(Vec::new());
        Self {
            system,
            provider,
            config,
            state: SystemState::Initializing,
            nodes: Vec::new(),
            history: Vec::new(),
            failures: 0,
            provisioned: 0,
            attempt: 0,
            last_error: None,
            tasks: Vec::new(),
            tx,
            rx,
            board,
        }
    }

    /// Handle for signalling the running provisioner from outside
    pub fn handle(&self) -> SystemHandle {
        SystemHandle::new(self.tx.clone())
    }

    /// Watch the node states as the run progresses
    pub fn subscribe(&self) -> watch::Receiver<NodeBoard> {
        self.board.subscribe()
    }

    pub fn state(&self) -> SystemState {
        self.state
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn system(&self) -> &System {
        &self.system
    }

    /// Provision the system.
    ///
    /// Resolves once the system is complete, or fails with
    /// [`ProvisionError::CreationHalted`] once `max_failures` attempts
    /// have failed.
    pub async fn run(mut self) -> Result<ProvisionReport> {
        self.config.validate()?;
        self.system.set_parent_multiplier(self.config.parent_multiplier);

        tracing::info!(
            provider = %self.provider.name(),
            nodes = self.system.len(),
            max_failures = self.config.max_failures,
            "Provisioning system"
        );

        self.dispatch_system(SystemEvent::Initialized);

        while !self.state.is_terminal() {
            let Some(envelope) = self.rx.recv().await else {
                return Err(ProvisionError::Stopped("event channel closed".into()));
            };
            self.dispatch(envelope);
        }

        self.abort_tasks();
        self.finish()
    }

    fn finish(self) -> Result<ProvisionReport> {
        if self.state == SystemState::Failed {
            return Err(ProvisionError::CreationHalted {
                failures: self.failures,
                last_error: self.last_error.unwrap_or_default(),
            });
        }

        let nodes = self
            .nodes
            .iter()
            .map(|np| NodeReport {
                id: np.node(),
                name: self
                    .system
                    .node(np.node())
                    .map(|n| n.name.clone())
                    .unwrap_or_default(),
                state: np.state(),
                time_used: np.time_used(),
                history: np.history().to_vec(),
            })
            .collect();

        tracing::info!(failures = self.failures, "System provisioned");

        Ok(ProvisionReport {
            state: self.state,
            failures: self.failures,
            nodes,
            history: self.history,
            system: self.system,
        })
    }

    // ── Dispatch ─────────────────────────────────────────────────────

    fn dispatch(&mut self, envelope: Envelope) {
        if let Some(attempt) = envelope.attempt {
            if attempt != self.attempt {
                tracing::debug!(
                    attempt,
                    current = self.attempt,
                    "Dropping event from an earlier attempt"
                );
                return;
            }
        }

        match envelope.target {
            Target::Node(id, event) => self.dispatch_node(id, event),
            Target::System(event) => self.dispatch_system(event),
            Target::Elapsed(id, elapsed) => {
                if let Some(np) = self.nodes.get_mut(id.index()) {
                    np.add_time_used(elapsed);
                }
            }
        }
    }

    fn dispatch_node(&mut self, id: NodeId, event: NodeEvent) {
        let Some(np) = self.nodes.get_mut(id.index()) else {
            tracing::warn!(node = %id, event = %event, "Event for unknown node");
            return;
        };
        let Ok(transition) = np.fire(event) else {
            return;
        };
        self.publish_board();

        if let Some(op) = ProviderOp::for_action(&transition.action) {
            self.spawn_provider_call(id, op);
            return;
        }

        let prefix = self.system.log_prefix(id);
        match transition.action {
            NodeAction::NotifyReady => {
                tracing::info!("{} Ready to provision", prefix);
            }
            NodeAction::NotifyProvisioned => {
                tracing::info!("{} Node provisioned", prefix);
                self.dispatch_system(SystemEvent::NodeProvisioned(id));
            }
            NodeAction::HandleError(reason) => {
                tracing::error!(error = %reason, "{} Node error", prefix);
                let name = self
                    .system
                    .node(id)
                    .map(|n| n.name.clone())
                    .unwrap_or_default();
                self.dispatch_system(SystemEvent::ErrorOccurred(format!("{}: {}", name, reason)));
            }
            NodeAction::HandleFailure => {
                tracing::warn!("{} Node provisioning failed", prefix);
            }
            _ => {}
        }
    }

    /// Apply an event to the system machine only.
    fn fire(&mut self, event: &SystemEvent) -> Result<SystemState> {
        let Some(to) = system_transition(self.state, event) else {
            tracing::error!(state = %self.state, event = %event, "Invalid system transition");
            return Err(ProvisionError::InvalidTransition {
                machine: "system".into(),
                state: self.state.to_string(),
                event: event.to_string(),
            });
        };

        let from = self.state;
        self.state = to;
        self.history.push(TransitionRecord::now(from, to, event.name()));
        tracing::debug!(from = %from, to = %to, event = %event, "System transition");
        Ok(to)
    }

    fn dispatch_system(&mut self, event: SystemEvent) {
        if self.fire(&event).is_err() {
            return;
        }

        match event {
            SystemEvent::Initialized => self.on_initialized(),
            SystemEvent::Created => self.on_created(),
            SystemEvent::NodeProvisioned(_) => {
                self.provisioned += 1;
                if self.provisioned == self.nodes.len() {
                    self.dispatch_system(SystemEvent::Provisioned);
                }
            }
            SystemEvent::Provisioned => {
                tracing::info!(nodes = self.nodes.len(), "All nodes provisioned");
            }
            SystemEvent::ErrorOccurred(reason) => self.on_error(reason),
            SystemEvent::Reclaimed => self.on_reclaimed(),
            SystemEvent::CreationHalted => self.on_halted(),
        }
    }

    // ── Entry actions ────────────────────────────────────────────────

    fn on_initialized(&mut self) {
        self.nodes = self
            .system
            .ids()
            .map(|id| NodeProvisioner::new(id, self.system.log_prefix(id)))
            .collect();
        self.publish_board();

        for id in self.system.ids().collect::<Vec<_>>() {
            self.dispatch_node(id, NodeEvent::Initialized);
        }
        self.spawn_readiness_gate();
    }

    fn on_created(&mut self) {
        if let Err(e) = self.system.rebalance_nodes() {
            tracing::error!(error = %e, "Dependency graph cannot be resolved");
            self.last_error = Some(e.to_string());
            self.dispatch_system(SystemEvent::CreationHalted);
            return;
        }

        self.provisioned = 0;
        if self.nodes.is_empty() {
            self.dispatch_system(SystemEvent::Provisioned);
            return;
        }

        for id in self.system.ids().collect::<Vec<_>>() {
            let parents = self.system.parents(id).map(<[NodeId]>::to_vec).unwrap_or_default();
            if parents.is_empty() {
                self.dispatch_node(id, NodeEvent::BeginProvision);
            } else {
                tracing::debug!(
                    parents = parents.len(),
                    "{} Waiting for parents to complete",
                    self.system.log_prefix(id)
                );
                self.spawn_parent_gate(id, parents);
            }
        }
    }

    fn on_error(&mut self, reason: String) {
        self.failures += 1;
        self.last_error = Some(reason.clone());
        self.attempt += 1;
        self.abort_tasks();

        tracing::warn!(
            failures = self.failures,
            max_failures = self.config.max_failures,
            error = %reason,
            "System provisioning error"
        );

        if self.failures < self.config.max_failures {
            self.spawn_kill_and_reclaim();
        } else {
            self.dispatch_system(SystemEvent::CreationHalted);
        }
    }

    fn on_reclaimed(&mut self) {
        tracing::info!(attempt = self.attempt, "Recreating system");
        self.provisioned = 0;
        for id in self.system.ids().collect::<Vec<_>>() {
            self.dispatch_node(id, NodeEvent::Reclaimed);
        }
        self.spawn_readiness_gate();
    }

    fn on_halted(&mut self) {
        for id in self.system.ids().collect::<Vec<_>>() {
            self.dispatch_node(id, NodeEvent::Failed);
        }
        tracing::error!(
            failures = self.failures,
            error = self.last_error.as_deref().unwrap_or(""),
            "System creation halted"
        );
    }

    // ── Tasks ────────────────────────────────────────────────────────

    fn publish_board(&self) {
        self.board
            .send_replace(self.nodes.iter().map(NodeProvisioner::state).collect());
    }

    fn track(&mut self, handle: JoinHandle<()>) {
        self.tasks.retain(|h| !h.is_finished());
        self.tasks.push(handle);
    }

    fn abort_tasks(&mut self) {
        for handle in self.tasks.drain(..) {
            handle.abort();
        }
    }

    fn spawn_provider_call(&mut self, id: NodeId, op: ProviderOp) {
        let spec = match NodeSpec::from_system(&self.system, id) {
            Ok(spec) => spec,
            Err(e) => {
                tracing::error!(node = %id, error = %e, "Cannot describe node to provider");
                return;
            }
        };
        let provider = self.provider.clone();
        let events = NodeEvents::new(id, self.attempt, self.tx.clone());
        let timing = self.tx.clone();
        let attempt = self.attempt;

        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let result = AssertUnwindSafe(op.call(provider.as_ref(), spec, events.clone()))
                .catch_unwind()
                .await;

            let _ = timing.send(Envelope {
                attempt: Some(attempt),
                target: Target::Elapsed(id, started.elapsed()),
            });

            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    events.error_occurred(format!("{} failed: {}", op, e));
                }
                Err(_) => {
                    events.error_occurred(format!("{} panicked", op));
                }
            }
        });
        self.track(handle);
    }

    fn spawn_readiness_gate(&mut self) {
        let gate = ReadinessGate {
            board: self.board.subscribe(),
            events: SystemEvents::new(self.attempt, self.tx.clone()),
        };
        let mut event = PollingEvent::with_settings(&self.config.readiness, gate);
        let handle = tokio::spawn(async move {
            event.run().await;
        });
        self.track(handle);
    }

    fn spawn_parent_gate(&mut self, id: NodeId, parents: Vec<NodeId>) {
        let gate = ParentGate {
            board: self.board.subscribe(),
            parents,
            events: NodeEvents::new(id, self.attempt, self.tx.clone()),
        };
        let mut event = PollingEvent::with_settings(&self.config.provision_gate, gate);
        let handle = tokio::spawn(async move {
            event.run().await;
        });
        self.track(handle);
    }

    fn spawn_kill_and_reclaim(&mut self) {
        let specs: Vec<NodeSpec> = self
            .system
            .ids()
            .filter_map(|id| NodeSpec::from_system(&self.system, id).ok())
            .collect();
        let provider = self.provider.clone();
        let events = SystemEvents::new(self.attempt, self.tx.clone());

        let handle = tokio::spawn(async move {
            let result = AssertUnwindSafe(provider.kill(specs)).catch_unwind().await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "Killing system failed"),
                Err(_) => tracing::warn!("Killing system panicked"),
            }
            events.send(SystemEvent::Reclaimed);
        });
        self.track(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_transition_table() {
        use SystemEvent as E;
        use SystemState as S;

        assert_eq!(system_transition(S::Initializing, &E::Initialized), Some(S::Creating));
        assert_eq!(system_transition(S::Creating, &E::Created), Some(S::Provisioning));
        assert_eq!(
            system_transition(S::Provisioning, &E::NodeProvisioned(NodeId(0))),
            Some(S::Provisioning)
        );
        assert_eq!(system_transition(S::Provisioning, &E::Provisioned), Some(S::Complete));
        assert_eq!(
            system_transition(S::Creating, &E::ErrorOccurred("x".into())),
            Some(S::HandlingError)
        );
        assert_eq!(
            system_transition(S::HandlingError, &E::ErrorOccurred("x".into())),
            Some(S::HandlingError)
        );
        assert_eq!(system_transition(S::HandlingError, &E::Reclaimed), Some(S::Creating));
        assert_eq!(system_transition(S::HandlingError, &E::CreationHalted), Some(S::Failed));

        assert_eq!(system_transition(S::Creating, &E::Provisioned), None);
        assert_eq!(system_transition(S::Initializing, &E::Reclaimed), None);
        assert_eq!(system_transition(S::Complete, &E::ErrorOccurred("x".into())), None);
        assert_eq!(system_transition(S::Failed, &E::Reclaimed), None);
    }

    #[test]
    fn test_provider_ops_cover_provider_actions() {
        assert_eq!(ProviderOp::for_action(&NodeAction::Boot), Some(ProviderOp::Boot));
        assert_eq!(ProviderOp::for_action(&NodeAction::NotifyReady), None);
        assert_eq!(ProviderOp::Provision.to_string(), "provision");
    }
}
