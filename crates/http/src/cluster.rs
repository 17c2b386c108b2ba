//! The HTTP listener cluster, a saga participant.

use crate::diff::{plan, ReconcileAction};
use crate::server::HttpServer;
use crate::spec::{build_desired, DesiredState, ServerSpec};
use async_trait::async_trait;
use firelynx_api::app::AppRegistry;
use firelynx_api::participant::{RunState, SagaParticipant};
use firelynx_api::{cancelled, Shutdown};
use firelynx_txn::transaction::ConfigTransaction;
use firelynx_types::error::{join_errors, ParticipantError};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

/// Default bound on delivering a desired set to the serving task.
pub const DEFAULT_SIPHON_TIMEOUT: Duration = Duration::from_secs(60);

struct ReconcileRequest {
    desired: DesiredState,
    done: oneshot::Sender<Vec<ParticipantError>>,
}

/// Owns a dynamic map of HTTP servers keyed by listener ID and reconciles
/// it against the desired set of the current committed configuration.
///
/// Staging assembles the desired set without opening sockets; committing
/// delivers it to the reconciliation task through a single-slot channel
/// (the siphon) and applies the add/remove/update/keep plan. A bind failure
/// within a commit fails that listener's entry and is reported, but
/// listeners already applied in the same pass stay live and unrelated
/// listeners are untouched.
pub struct HttpCluster {
    name: String,
    registry: Arc<dyn AppRegistry>,
    pending: Mutex<Option<DesiredState>>,
    current: Mutex<Option<DesiredState>>,
    siphon_tx: Mutex<Option<mpsc::Sender<ReconcileRequest>>>,
    run_state_tx: watch::Sender<RunState>,
    stop_tx: watch::Sender<bool>,
    siphon_timeout: Duration,
}

impl HttpCluster {
    /// A cluster resolving apps through `registry`, with default timeouts.
    pub fn new(registry: Arc<dyn AppRegistry>) -> Self {
        Self::with_siphon_timeout(registry, DEFAULT_SIPHON_TIMEOUT)
    }

    /// A cluster with a custom siphon delivery bound.
    pub fn with_siphon_timeout(registry: Arc<dyn AppRegistry>, siphon_timeout: Duration) -> Self {
        Self {
            name: "http_cluster".to_string(),
            registry,
            pending: Mutex::new(None),
            current: Mutex::new(None),
            siphon_tx: Mutex::new(None),
            run_state_tx: watch::channel(RunState::Stopped).0,
            stop_tx: watch::channel(false).0,
            siphon_timeout,
        }
    }

    /// The live reconciliation pass: applies the diff between the running
    /// server map and the desired set, collecting per-listener failures.
    async fn reconcile(
        live: &mut BTreeMap<String, HttpServer>,
        desired: DesiredState,
    ) -> Vec<ParticipantError> {
        let live_specs: BTreeMap<String, ServerSpec> = live
            .iter()
            .map(|(id, server)| (id.clone(), server.spec().clone()))
            .collect();
        let actions = plan(&live_specs, &desired);
        let mut failures = Vec::new();
        for action in actions {
            match action {
                ReconcileAction::Remove(id) => {
                    if let Some(server) = live.remove(&id) {
                        server.shutdown().await;
                    }
                }
                ReconcileAction::UpdateRoutes(id) => {
                    let spec = desired.get(&id).cloned();
                    if let (Some(server), Some(spec)) = (live.get_mut(&id), spec) {
                        server.update_routes(spec);
                    }
                }
                ReconcileAction::Replace(id) => {
                    if let Some(server) = live.remove(&id) {
                        server.shutdown().await;
                    }
                    if let Some(spec) = desired.get(&id).cloned() {
                        match HttpServer::start(spec).await {
                            Ok(server) => {
                                live.insert(id, server);
                            }
                            Err(e) => failures.push(e),
                        }
                    }
                }
                ReconcileAction::Add(id) => {
                    if let Some(spec) = desired.get(&id).cloned() {
                        match HttpServer::start(spec).await {
                            Ok(server) => {
                                live.insert(id, server);
                            }
                            Err(e) => failures.push(e),
                        }
                    }
                }
                ReconcileAction::Keep(_) => {}
            }
        }
        failures
    }
}

#[async_trait]
impl SagaParticipant for HttpCluster {
    fn name(&self) -> &str {
        &self.name
    }

    fn run_state(&self) -> watch::Receiver<RunState> {
        self.run_state_tx.subscribe()
    }

    /// The cluster's serving task. Running immediately, even before any
    /// configuration arrives: it serves zero listeners until the first
    /// commit. Each reconciliation completes and signals back before the
    /// next spec is accepted. Exits when the shared shutdown signal fires
    /// or [`stop`](SagaParticipant::stop) is triggered.
    async fn run(self: Arc<Self>, mut shutdown: Shutdown) -> Result<(), ParticipantError> {
        let (tx, mut rx) = mpsc::channel::<ReconcileRequest>(1);
        *self.siphon_tx.lock() = Some(tx);
        let mut stop_rx = self.stop_tx.subscribe();
        self.run_state_tx.send_replace(RunState::Running);
        tracing::info!(target: "http-cluster", "cluster task running");

        let mut live: BTreeMap<String, HttpServer> = BTreeMap::new();
        loop {
            tokio::select! {
                request = rx.recv() => {
                    let Some(ReconcileRequest { desired, done }) = request else { break };
                    let failures = Self::reconcile(&mut live, desired).await;
                    for failure in &failures {
                        tracing::error!(target: "http-cluster", error = %failure, "listener update failed");
                    }
                    let _ = done.send(failures);
                }
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
                _ = cancelled(&mut shutdown) => break,
            }
        }

        self.run_state_tx.send_replace(RunState::Stopping);
        *self.siphon_tx.lock() = None;
        for (_, server) in live {
            server.shutdown().await;
        }
        self.run_state_tx.send_replace(RunState::Stopped);
        tracing::info!(target: "http-cluster", "cluster task stopped");
        Ok(())
    }

    fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Derives and stores the desired server set from the transaction's
    /// snapshot. No sockets are opened.
    async fn stage_config(
        &self,
        _shutdown: Shutdown,
        tx: &ConfigTransaction,
    ) -> Result<(), ParticipantError> {
        let desired = build_desired(tx.config(), self.registry.as_ref())?;
        tracing::debug!(
            target: "http-cluster",
            tx_id = %tx.id(),
            listeners = desired.len(),
            "desired set staged"
        );
        *self.pending.lock() = Some(desired);
        Ok(())
    }

    /// Discards the pending spec. Live servers are untouched: staging
    /// opened nothing, so there is nothing to undo.
    async fn compensate_config(
        &self,
        _shutdown: Shutdown,
        tx: &ConfigTransaction,
    ) -> Result<(), ParticipantError> {
        *self.pending.lock() = None;
        tracing::debug!(target: "http-cluster", tx_id = %tx.id(), "pending spec discarded");
        Ok(())
    }

    /// Swaps the pending spec into current and delivers it to the serving
    /// task for reconciliation. Fails with `SiphonTimeout` if the task does
    /// not accept the spec within the configured bound.
    async fn commit_config(&self, mut shutdown: Shutdown) -> Result<(), ParticipantError> {
        {
            let mut pending = self.pending.lock();
            if let Some(spec) = pending.take() {
                *self.current.lock() = Some(spec);
            }
        }
        let desired = self.current.lock().clone().ok_or_else(|| {
            ParticipantError::InvalidArgument(
                "no configuration has been staged or committed".to_string(),
            )
        })?;

        let sender = self.siphon_tx.lock().clone();
        let (done_tx, done_rx) = oneshot::channel();
        let request = ReconcileRequest {
            desired,
            done: done_tx,
        };
        let timeout_ms = self.siphon_timeout.as_millis() as u64;
        match sender {
            Some(sender) => {
                let delivery = tokio::time::timeout(self.siphon_timeout, sender.send(request));
                tokio::select! {
                    result = delivery => match result {
                        Ok(Ok(())) => {}
                        // Elapsed, or the task dropped its receiver mid-send.
                        Ok(Err(_)) | Err(_) => {
                            return Err(ParticipantError::SiphonTimeout { timeout_ms })
                        }
                    },
                    _ = cancelled(&mut shutdown) => return Err(ParticipantError::Cancelled),
                }
            }
            None => {
                // Task not running: fail after the configured duration, as a
                // live-but-stuck task would.
                tokio::select! {
                    _ = tokio::time::sleep(self.siphon_timeout) => {
                        return Err(ParticipantError::SiphonTimeout { timeout_ms })
                    }
                    _ = cancelled(&mut shutdown) => return Err(ParticipantError::Cancelled),
                }
            }
        }

        tokio::select! {
            outcome = done_rx => match outcome {
                Ok(failures) if failures.is_empty() => Ok(()),
                Ok(mut failures) => {
                    if failures.len() == 1 {
                        Err(failures.remove(0))
                    } else {
                        Err(ParticipantError::Other(join_errors(
                            failures.iter().map(|e| e.to_string()),
                        )))
                    }
                }
                Err(_) => Err(ParticipantError::Other(
                    "cluster task dropped the reconcile request".to_string(),
                )),
            },
            _ = cancelled(&mut shutdown) => Err(ParticipantError::Cancelled),
        }
    }
}
