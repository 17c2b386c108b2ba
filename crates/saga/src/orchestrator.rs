//! Transaction processing: stage, commit, compensate, reload.

use firelynx_api::participant::SagaParticipant;
use firelynx_api::{cancelled, Shutdown};
use firelynx_txn::siphon::TransactionReceiver;
use firelynx_txn::store::TransactionStore;
use firelynx_txn::transaction::{
    ConfigTransaction, ParticipantState, ParticipantStatus, Source, TransactionState,
};
use firelynx_types::error::{join_errors, SagaError, TransactionError};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::Instant;

/// Default bound on each wait-for-ready during staging and reload.
pub const DEFAULT_RELOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// How often a participant's readiness is polled.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Read-only status of one transaction, as exposed by the admin surface.
#[derive(Debug, Clone)]
pub struct TransactionStatus {
    /// Transaction ID.
    pub id: String,
    /// Current lifecycle state.
    pub state: TransactionState,
    /// Where the transaction came from.
    pub source: Source,
    /// Free-form source detail.
    pub source_detail: String,
    /// Construction time.
    pub created_at: SystemTime,
    /// Whether validation has passed.
    pub is_valid: bool,
    /// Per-participant sub-states, in registration order.
    pub participants: Vec<ParticipantStatus>,
}

/// Drives participants through the configuration saga.
///
/// Exactly one transaction is executing or reloading at a time from the
/// orchestrator's perspective; within a transaction, participants are always
/// visited in ascending-name order, and that order is identical across the
/// stage, commit and compensate scans.
pub struct SagaOrchestrator {
    // BTreeMap keeps the deterministic ascending-name order for free.
    participants: RwLock<BTreeMap<String, Arc<dyn SagaParticipant>>>,
    store: TransactionStore,
    reload_timeout: Duration,
}

impl SagaOrchestrator {
    /// An orchestrator with the default reload timeout.
    pub fn new(store: TransactionStore) -> Self {
        Self::with_reload_timeout(store, DEFAULT_RELOAD_TIMEOUT)
    }

    /// An orchestrator with a custom bound on each wait-for-ready.
    pub fn with_reload_timeout(store: TransactionStore, reload_timeout: Duration) -> Self {
        Self {
            participants: RwLock::new(BTreeMap::new()),
            store,
            reload_timeout,
        }
    }

    /// The transaction history this orchestrator records into.
    pub fn store(&self) -> &TransactionStore {
        &self.store
    }

    /// Registers a participant by name. Idempotent: re-registering a name
    /// replaces the previous entry. Rejects participants that expose a
    /// unilateral reload capability, since the orchestrator owns the reload
    /// flow.
    pub fn register_participant(&self, p: Arc<dyn SagaParticipant>) -> Result<(), SagaError> {
        if p.as_config_reloader().is_some() {
            return Err(SagaError::ReloadCapableParticipant(p.name().to_string()));
        }
        let name = p.name().to_string();
        self.participants.write().insert(name.clone(), p);
        tracing::debug!(target: "saga", participant = %name, "participant registered");
        Ok(())
    }

    // Snapshot taken before iterating so registration during a scan cannot
    // perturb the order.
    fn participants_snapshot(&self) -> Vec<(String, Arc<dyn SagaParticipant>)> {
        self.participants
            .read()
            .iter()
            .map(|(name, p)| (name.clone(), p.clone()))
            .collect()
    }

    /// Consumes validated transactions from the ingress siphon until the
    /// shutdown signal fires. Transactions not in `validated` are rejected
    /// and never admitted to the store.
    pub async fn run(self: Arc<Self>, mut rx: TransactionReceiver, mut shutdown: Shutdown) {
        loop {
            tokio::select! {
                received = rx.recv() => {
                    let Some(tx) = received else { break };
                    if tx.state() != TransactionState::Validated {
                        tracing::warn!(
                            target: "saga",
                            tx_id = %tx.id(),
                            state = %tx.state(),
                            "rejecting transaction that has not passed validation"
                        );
                        continue;
                    }
                    self.store.add(tx.clone());
                    match self.process_transaction(&tx, shutdown.clone()).await {
                        Ok(()) => tracing::info!(
                            target: "saga",
                            tx_id = %tx.id(),
                            source = %tx.source(),
                            "transaction completed"
                        ),
                        Err(e) => tracing::error!(
                            target: "saga",
                            tx_id = %tx.id(),
                            error = %e,
                            "transaction failed"
                        ),
                    }
                }
                _ = cancelled(&mut shutdown) => break,
            }
        }
        tracing::info!(target: "saga", "orchestrator loop stopped");
    }

    /// Stages a validated transaction across every participant, then runs
    /// the reload phase. Any stage failure compensates previously-staged
    /// participants and surfaces the error.
    pub async fn process_transaction(
        &self,
        tx: &Arc<ConfigTransaction>,
        shutdown: Shutdown,
    ) -> Result<(), SagaError> {
        tx.begin_execution()?;
        let participants = self.participants_snapshot();
        for (name, _) in &participants {
            tx.register_participant(name.clone())?;
        }

        let mut not_ready = Vec::new();
        for (name, p) in &participants {
            match self
                .wait_for_ready(name, p.as_ref(), shutdown.clone())
                .await
            {
                Ok(()) => {}
                Err(SagaError::Cancelled) => {
                    tx.mark_participant_failed(name, "cancelled")?;
                    tx.mark_failed("cancelled")?;
                    self.compensate(tx, shutdown.clone()).await;
                    return Err(SagaError::Cancelled);
                }
                Err(e) => {
                    tx.mark_participant_failed(name, "not ready")?;
                    not_ready.push(e.to_string());
                    continue;
                }
            }
            tx.mark_participant_executing(name)?;
            tracing::debug!(target: "saga", tx_id = %tx.id(), participant = %name, "staging");
            match p.stage_config(shutdown.clone(), tx).await {
                Ok(()) => tx.mark_participant_succeeded(name)?,
                Err(e) => {
                    let message = e.to_string();
                    tx.mark_participant_failed(name, &message)?;
                    tx.mark_failed(&message)?;
                    self.compensate(tx, shutdown.clone()).await;
                    return Err(SagaError::Stage {
                        participant: name.clone(),
                        source: e,
                    });
                }
            }
        }

        if !not_ready.is_empty() {
            let joined = join_errors(&not_ready);
            tx.mark_failed(&joined)?;
            self.compensate(tx, shutdown.clone()).await;
            return Err(SagaError::Joined(joined));
        }

        tx.mark_succeeded()?;
        self.store.set_current(tx.clone());
        if let Err(e) = self.trigger_reload(shutdown).await {
            return Err(SagaError::ReloadFailed(e.to_string()));
        }
        Ok(())
    }

    /// Rolls back every participant that staged successfully, in the same
    /// deterministic order as the stage scan. Compensation errors are logged
    /// and never abort the loop.
    async fn compensate(&self, tx: &Arc<ConfigTransaction>, shutdown: Shutdown) {
        if let Err(e) = tx.begin_compensation() {
            tracing::error!(target: "saga", tx_id = %tx.id(), error = %e, "cannot enter compensation");
            return;
        }
        let staged: Vec<String> = tx
            .participant_states()
            .into_iter()
            .filter(|p| p.state == ParticipantState::Succeeded)
            .map(|p| p.name)
            .collect();
        let participants = self.participants_snapshot();
        for (name, p) in &participants {
            if !staged.contains(name) {
                continue;
            }
            if let Err(e) = tx.mark_participant_compensating(name) {
                tracing::error!(target: "saga", participant = %name, error = %e, "compensation bookkeeping failed");
                continue;
            }
            match p.compensate_config(shutdown.clone(), tx).await {
                Ok(()) => {
                    if let Err(e) = tx.mark_participant_compensated(name) {
                        tracing::error!(target: "saga", participant = %name, error = %e, "compensation bookkeeping failed");
                    }
                }
                Err(e) => {
                    // Collected, never fatal to the compensation loop.
                    tracing::error!(
                        target: "saga",
                        tx_id = %tx.id(),
                        participant = %name,
                        error = %e,
                        "compensation failed"
                    );
                }
            }
        }
        if let Err(e) = tx.mark_compensated() {
            tracing::error!(target: "saga", tx_id = %tx.id(), error = %e, "cannot finish compensation");
            let _ = tx.mark_error(e.to_string());
        }
    }

    /// The post-execution reload phase: commits the staged configuration on
    /// every participant of the current (succeeded) transaction. Errors from
    /// all participants are accumulated; any error puts the transaction into
    /// `error` and is returned joined.
    pub async fn trigger_reload(&self, shutdown: Shutdown) -> Result<(), SagaError> {
        let tx = self
            .store
            .current()
            .ok_or_else(|| SagaError::InvalidArgument("no current transaction".to_string()))?;
        tx.begin_reload()?;
        let mut errors = Vec::new();
        self.commit_all(&tx, &mut errors, shutdown).await;
        if errors.is_empty() {
            tx.mark_completed()?;
            Ok(())
        } else {
            let joined = join_errors(&errors);
            tx.mark_error(&joined)?;
            Err(SagaError::Joined(joined))
        }
    }

    /// The orchestrator-level reload entry point (e.g. SIGHUP): revalidates
    /// the current configuration snapshot and re-runs commit across
    /// participants. No file is re-read and the transaction's lifecycle is
    /// left untouched.
    pub async fn reload_current(&self, shutdown: Shutdown) -> Result<(), SagaError> {
        let tx = self
            .store
            .current()
            .ok_or_else(|| SagaError::InvalidArgument("no current transaction".to_string()))?;
        tx.config()
            .validate()
            .map_err(TransactionError::Validation)?;
        let mut errors = Vec::new();
        self.commit_all(&tx, &mut errors, shutdown).await;
        if errors.is_empty() {
            Ok(())
        } else {
            Err(SagaError::Joined(join_errors(&errors)))
        }
    }

    async fn commit_all(
        &self,
        tx: &Arc<ConfigTransaction>,
        errors: &mut Vec<String>,
        shutdown: Shutdown,
    ) {
        let participants = self.participants_snapshot();
        for (name, p) in &participants {
            tracing::debug!(target: "saga", tx_id = %tx.id(), participant = %name, "committing");
            if let Err(e) = p.commit_config(shutdown.clone()).await {
                errors.push(format!("commit failed for participant {name}: {e}"));
                continue;
            }
            if let Err(e) = self
                .wait_for_ready(name, p.as_ref(), shutdown.clone())
                .await
            {
                errors.push(e.to_string());
            }
        }
    }

    async fn wait_for_ready(
        &self,
        name: &str,
        p: &dyn SagaParticipant,
        mut shutdown: Shutdown,
    ) -> Result<(), SagaError> {
        let deadline = Instant::now() + self.reload_timeout;
        loop {
            if p.is_running() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(SagaError::ParticipantNotReady {
                    name: name.to_string(),
                    timeout_ms: self.reload_timeout.as_millis() as u64,
                });
            }
            tokio::select! {
                _ = tokio::time::sleep(READY_POLL_INTERVAL) => {}
                _ = cancelled(&mut shutdown) => return Err(SagaError::Cancelled),
            }
        }
    }

    /// Read-only status of one transaction by ID.
    pub fn transaction_status(&self, id: &str) -> Result<TransactionStatus, SagaError> {
        let tx = self
            .store
            .by_id(id)
            .ok_or_else(|| SagaError::NotFound(id.to_string()))?;
        Ok(TransactionStatus {
            id: tx.id().to_string(),
            state: tx.state(),
            source: tx.source(),
            source_detail: tx.source_detail().to_string(),
            created_at: tx.created_at(),
            is_valid: tx.is_valid(),
            participants: tx.participant_states(),
        })
    }

    /// Blocks until the current transaction reaches a terminal state.
    pub async fn wait_for_completion(
        &self,
        shutdown: Shutdown,
    ) -> Result<TransactionState, SagaError> {
        let tx = self
            .store
            .current()
            .ok_or_else(|| SagaError::InvalidArgument("no current transaction".to_string()))?;
        Ok(tx.wait_for_completion(shutdown).await?)
    }
}
