//! The configuration transaction lifecycle state machine.

use crate::shutdown::{cancelled, Shutdown};
use firelynx_types::config::Config;
use firelynx_types::error::TransactionError;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::watch;
use uuid::Uuid;

/// Where a transaction originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Loaded from a configuration file.
    File,
    /// Submitted through the management API.
    Api,
    /// Created by a test.
    Test,
    /// Created internally, e.g. by a signal-triggered reload.
    Internal,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::File => write!(f, "file"),
            Source::Api => write!(f, "api"),
            Source::Test => write!(f, "test"),
            Source::Internal => write!(f, "internal"),
        }
    }
}

/// Lifecycle states of a configuration transaction.
///
/// ```text
/// created → validating → (validated | invalid)
/// validated → executing → (succeeded | failed)
/// failed → compensating → (compensated | error)
/// succeeded → reloading → (completed | error)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Freshly constructed; validation has not run.
    Created,
    /// Validation in progress.
    Validating,
    /// Snapshot passed validation; the transaction is committable.
    Validated,
    /// Snapshot failed validation. Terminal.
    Invalid,
    /// Participants are being staged.
    Executing,
    /// Every participant staged successfully; the transaction is reloadable.
    Succeeded,
    /// A participant failed during staging.
    Failed,
    /// Staged participants are being rolled back.
    Compensating,
    /// Rollback finished. Terminal.
    Compensated,
    /// The commit-across-participants phase is running.
    Reloading,
    /// Commit finished everywhere. Terminal.
    Completed,
    /// Compensation or reload failed. Terminal.
    Error,
}

impl TransactionState {
    /// Stable lowercase name, used in errors, logs and the status API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Validating => "validating",
            Self::Validated => "validated",
            Self::Invalid => "invalid",
            Self::Executing => "executing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Compensating => "compensating",
            Self::Compensated => "compensated",
            Self::Reloading => "reloading",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// Whether no further transition is possible from this state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Invalid | Self::Compensated | Self::Completed | Self::Error
        )
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sub-states a participant moves through within one transaction.
///
/// ```text
/// pending → executing → (succeeded | failed) → compensating → compensated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantState {
    /// Registered, not yet staged.
    Pending,
    /// Stage hook running.
    Executing,
    /// Stage hook returned success.
    Succeeded,
    /// Stage hook failed, or the participant never became ready.
    Failed,
    /// Compensation hook running.
    Compensating,
    /// Compensation finished.
    Compensated,
}

impl ParticipantState {
    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executing => "executing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Compensating => "compensating",
            Self::Compensated => "compensated",
        }
    }
}

impl fmt::Display for ParticipantState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One participant's record on a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantStatus {
    /// Participant name as registered with the orchestrator.
    pub name: String,
    /// Current sub-state.
    pub state: ParticipantState,
    /// Error recorded on failure, if any.
    pub error: Option<String>,
}

struct Inner {
    state: TransactionState,
    is_valid: bool,
    error: Option<String>,
    // Ordered registry; registration order is preserved for readouts.
    participants: Vec<ParticipantStatus>,
}

/// A single configuration change attempt.
///
/// The snapshot is fixed at construction and never mutated. All lifecycle
/// mutations go through the transition methods below; an illegal transition
/// returns [`TransactionError::InvalidStateTransition`] and leaves the state
/// unchanged. Every state change is published through a `watch` channel, so
/// readers and [`wait_for_completion`](Self::wait_for_completion) observe
/// states atomically and in order.
pub struct ConfigTransaction {
    id: Uuid,
    source: Source,
    source_detail: String,
    request_id: String,
    created_at: SystemTime,
    config: Arc<Config>,
    state_tx: watch::Sender<TransactionState>,
    inner: Mutex<Inner>,
}

impl fmt::Debug for ConfigTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigTransaction")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ConfigTransaction {
    /// Creates a transaction in `created` around an immutable snapshot.
    pub fn new(
        source: Source,
        source_detail: impl Into<String>,
        request_id: impl Into<String>,
        config: Arc<Config>,
    ) -> Self {
        let (state_tx, _) = watch::channel(TransactionState::Created);
        Self {
            id: Uuid::new_v4(),
            source,
            source_detail: source_detail.into(),
            request_id: request_id.into(),
            created_at: SystemTime::now(),
            config,
            state_tx,
            inner: Mutex::new(Inner {
                state: TransactionState::Created,
                is_valid: false,
                error: None,
                participants: Vec::new(),
            }),
        }
    }

    /// The transaction's stable identity.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Where the transaction came from.
    pub fn source(&self) -> Source {
        self.source
    }

    /// Free-form detail about the source, e.g. a file path.
    pub fn source_detail(&self) -> &str {
        &self.source_detail
    }

    /// Correlation ID supplied by the producer.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// When the transaction was constructed.
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// The immutable configuration snapshot.
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TransactionState {
        self.inner.lock().state
    }

    /// Whether validation has passed.
    pub fn is_valid(&self) -> bool {
        self.inner.lock().is_valid
    }

    /// The accumulated error, if the transaction has failed anywhere.
    pub fn error(&self) -> Option<String> {
        self.inner.lock().error.clone()
    }

    /// An independent copy of every participant record, in registration
    /// order. Callers may hold it across later state changes.
    pub fn participant_states(&self) -> Vec<ParticipantStatus> {
        self.inner.lock().participants.clone()
    }

    /// Subscribes to lifecycle state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<TransactionState> {
        self.state_tx.subscribe()
    }

    fn transition(
        &self,
        allowed_from: &[TransactionState],
        to: TransactionState,
    ) -> Result<(), TransactionError> {
        let mut inner = self.inner.lock();
        if !allowed_from.contains(&inner.state) {
            return Err(TransactionError::InvalidStateTransition {
                from: inner.state.as_str(),
                to: to.as_str(),
            });
        }
        inner.state = to;
        // Published under the lock so watchers see transitions in order.
        let _ = self.state_tx.send(to);
        Ok(())
    }

    /// Runs the snapshot's structural and referential checks.
    ///
    /// `created → validating → validated` on success, or the terminal
    /// `invalid` on failure. The validation error is both recorded on the
    /// transaction and returned.
    pub fn run_validation(&self) -> Result<(), TransactionError> {
        self.transition(&[TransactionState::Created], TransactionState::Validating)?;
        match self.config.validate() {
            Ok(()) => {
                let mut inner = self.inner.lock();
                inner.state = TransactionState::Validated;
                inner.is_valid = true;
                let _ = self.state_tx.send(TransactionState::Validated);
                Ok(())
            }
            Err(e) => {
                let mut inner = self.inner.lock();
                inner.state = TransactionState::Invalid;
                inner.error = Some(e.to_string());
                let _ = self.state_tx.send(TransactionState::Invalid);
                Err(TransactionError::Validation(e))
            }
        }
    }

    /// `validated → executing`.
    pub fn begin_execution(&self) -> Result<(), TransactionError> {
        self.transition(&[TransactionState::Validated], TransactionState::Executing)
    }

    /// Registers a participant name on the transaction, initializing its
    /// sub-state to `pending`. Permitted until the transaction leaves
    /// `executing`; registering the same name twice is a no-op. Registration
    /// must be complete before the first stage call.
    pub fn register_participant(&self, name: impl Into<String>) -> Result<(), TransactionError> {
        let name = name.into();
        let mut inner = self.inner.lock();
        match inner.state {
            TransactionState::Created
            | TransactionState::Validating
            | TransactionState::Validated
            | TransactionState::Executing => {}
            other => {
                return Err(TransactionError::InvalidStateTransition {
                    from: other.as_str(),
                    to: TransactionState::Executing.as_str(),
                })
            }
        }
        if inner.participants.iter().any(|p| p.name == name) {
            return Ok(());
        }
        inner.participants.push(ParticipantStatus {
            name,
            state: ParticipantState::Pending,
            error: None,
        });
        Ok(())
    }

    fn participant_transition(
        &self,
        name: &str,
        allowed_from: &[ParticipantState],
        to: ParticipantState,
        error: Option<String>,
    ) -> Result<(), TransactionError> {
        let mut inner = self.inner.lock();
        let record = inner
            .participants
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| TransactionError::UnknownParticipant(name.to_string()))?;
        if !allowed_from.contains(&record.state) {
            return Err(TransactionError::InvalidParticipantTransition {
                participant: name.to_string(),
                from: record.state.as_str(),
                to: to.as_str(),
            });
        }
        record.state = to;
        if error.is_some() {
            record.error = error;
        }
        Ok(())
    }

    /// `pending → executing` for one participant.
    pub fn mark_participant_executing(&self, name: &str) -> Result<(), TransactionError> {
        self.participant_transition(
            name,
            &[ParticipantState::Pending],
            ParticipantState::Executing,
            None,
        )
    }

    /// `executing → succeeded` for one participant.
    pub fn mark_participant_succeeded(&self, name: &str) -> Result<(), TransactionError> {
        self.participant_transition(
            name,
            &[ParticipantState::Executing],
            ParticipantState::Succeeded,
            None,
        )
    }

    /// `pending | executing → failed` for one participant, recording the
    /// error. The `pending` origin covers participants that never became
    /// ready to stage.
    pub fn mark_participant_failed(
        &self,
        name: &str,
        error: impl Into<String>,
    ) -> Result<(), TransactionError> {
        self.participant_transition(
            name,
            &[ParticipantState::Pending, ParticipantState::Executing],
            ParticipantState::Failed,
            Some(error.into()),
        )
    }

    /// `succeeded | failed → compensating` for one participant.
    pub fn mark_participant_compensating(&self, name: &str) -> Result<(), TransactionError> {
        self.participant_transition(
            name,
            &[ParticipantState::Succeeded, ParticipantState::Failed],
            ParticipantState::Compensating,
            None,
        )
    }

    /// `compensating → compensated` for one participant.
    pub fn mark_participant_compensated(&self, name: &str) -> Result<(), TransactionError> {
        self.participant_transition(
            name,
            &[ParticipantState::Compensating],
            ParticipantState::Compensated,
            None,
        )
    }

    /// `executing → succeeded`. Refused unless every registered participant
    /// is in `succeeded`.
    pub fn mark_succeeded(&self) -> Result<(), TransactionError> {
        let mut inner = self.inner.lock();
        if inner.state != TransactionState::Executing {
            return Err(TransactionError::InvalidStateTransition {
                from: inner.state.as_str(),
                to: TransactionState::Succeeded.as_str(),
            });
        }
        if inner
            .participants
            .iter()
            .any(|p| p.state != ParticipantState::Succeeded)
        {
            return Err(TransactionError::InvalidStateTransition {
                from: inner.state.as_str(),
                to: TransactionState::Succeeded.as_str(),
            });
        }
        inner.state = TransactionState::Succeeded;
        let _ = self.state_tx.send(TransactionState::Succeeded);
        Ok(())
    }

    /// `executing → failed`, recording the error.
    pub fn mark_failed(&self, error: impl Into<String>) -> Result<(), TransactionError> {
        let mut inner = self.inner.lock();
        if inner.state != TransactionState::Executing {
            return Err(TransactionError::InvalidStateTransition {
                from: inner.state.as_str(),
                to: TransactionState::Failed.as_str(),
            });
        }
        inner.state = TransactionState::Failed;
        inner.error = Some(error.into());
        let _ = self.state_tx.send(TransactionState::Failed);
        Ok(())
    }

    /// `failed → compensating`.
    pub fn begin_compensation(&self) -> Result<(), TransactionError> {
        self.transition(&[TransactionState::Failed], TransactionState::Compensating)
    }

    /// `compensating → compensated` (terminal).
    pub fn mark_compensated(&self) -> Result<(), TransactionError> {
        self.transition(
            &[TransactionState::Compensating],
            TransactionState::Compensated,
        )
    }

    /// `succeeded → reloading`.
    pub fn begin_reload(&self) -> Result<(), TransactionError> {
        self.transition(&[TransactionState::Succeeded], TransactionState::Reloading)
    }

    /// `reloading → completed` (terminal).
    pub fn mark_completed(&self) -> Result<(), TransactionError> {
        self.transition(&[TransactionState::Reloading], TransactionState::Completed)
    }

    /// `reloading | compensating → error` (terminal), recording the error.
    pub fn mark_error(&self, error: impl Into<String>) -> Result<(), TransactionError> {
        let mut inner = self.inner.lock();
        match inner.state {
            TransactionState::Reloading | TransactionState::Compensating => {}
            other => {
                return Err(TransactionError::InvalidStateTransition {
                    from: other.as_str(),
                    to: TransactionState::Error.as_str(),
                })
            }
        }
        inner.state = TransactionState::Error;
        inner.error = Some(error.into());
        let _ = self.state_tx.send(TransactionState::Error);
        Ok(())
    }

    /// Blocks until the transaction reaches a terminal state, returning it.
    /// Returns [`TransactionError::Cancelled`] if the shutdown signal fires
    /// first.
    pub async fn wait_for_completion(
        &self,
        mut shutdown: Shutdown,
    ) -> Result<TransactionState, TransactionError> {
        let mut rx = self.state_tx.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            if state.is_terminal() {
                return Ok(state);
            }
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        // The transaction was dropped mid-wait.
                        return Err(TransactionError::Cancelled);
                    }
                }
                _ = cancelled(&mut shutdown) => return Err(TransactionError::Cancelled),
            }
        }
    }
}
