//! The saga participant capability set.

use crate::Shutdown;
use async_trait::async_trait;
use firelynx_txn::transaction::ConfigTransaction;
use firelynx_types::error::ParticipantError;
use std::sync::Arc;
use tokio::sync::watch;

/// Lifecycle states a participant's serving task moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Not serving: `run` has not started or has exited.
    Stopped,
    /// Serving and able to accept staged configuration.
    Running,
    /// `stop` was triggered; the task is winding down.
    Stopping,
}

/// A capability a participant must NOT expose: applying configuration
/// outside the saga. The orchestrator owns the reload flow; a participant
/// offering its own reload would double-apply, so registration rejects any
/// participant whose [`SagaParticipant::as_config_reloader`] is `Some`.
pub trait ConfigReloader: Send + Sync {
    /// Re-applies the participant's current configuration unilaterally.
    fn reload_now(&self);
}

/// A component driven by the saga orchestrator through
/// stage/commit/compensate against a configuration transaction.
///
/// Participants are long-running: [`run`](Self::run) serves until the
/// supplied shutdown signal fires or [`stop`](Self::stop) is triggered,
/// and the orchestrator polls
/// [`is_running`](Self::is_running) before asking the participant to do
/// work. Hooks take a [`Shutdown`] context and must return
/// [`ParticipantError::Cancelled`] verbatim when it fires mid-wait.
#[async_trait]
pub trait SagaParticipant: Send + Sync {
    /// Stable name, unique within the orchestrator. Determines the
    /// deterministic participant ordering (ascending by name).
    fn name(&self) -> &str;

    /// Whether the serving task is currently running.
    fn is_running(&self) -> bool {
        *self.run_state().borrow() == RunState::Running
    }

    /// The participant's state-change event stream.
    fn run_state(&self) -> watch::Receiver<RunState>;

    /// The long-running serving task. Serves until the shutdown signal
    /// fires or [`stop`](Self::stop) is triggered, whichever comes first.
    async fn run(self: Arc<Self>, shutdown: Shutdown) -> Result<(), ParticipantError>;

    /// Triggers shutdown of the serving task.
    fn stop(&self);

    /// Prepares the transaction's snapshot without applying it. Must be
    /// externally side-effect-free: no sockets opened, no traffic routed to
    /// the new topology.
    async fn stage_config(
        &self,
        shutdown: Shutdown,
        tx: &ConfigTransaction,
    ) -> Result<(), ParticipantError>;

    /// Discards staged preparation, returning the participant to its
    /// pre-stage posture. Best-effort in-memory cleanup; must not depend on
    /// external systems being reachable.
    async fn compensate_config(
        &self,
        shutdown: Shutdown,
        tx: &ConfigTransaction,
    ) -> Result<(), ParticipantError>;

    /// Atomically swaps the staged preparation into live use.
    async fn commit_config(&self, shutdown: Shutdown) -> Result<(), ParticipantError>;

    /// A unilateral reload capability, if the participant (wrongly) has one.
    /// The orchestrator refuses registration when this returns `Some`.
    fn as_config_reloader(&self) -> Option<&dyn ConfigReloader> {
        None
    }
}
