//! Bounded, addressable in-memory transaction history.

use crate::transaction::{ConfigTransaction, TransactionState};
use firelynx_types::error::TransactionError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Default retention bound for the transaction history.
pub const DEFAULT_MAX_TRANSACTIONS: usize = 20;

/// Default quiet period for the debounced cleanup worker.
pub const DEFAULT_DEBOUNCE_INTERVAL: Duration = Duration::from_millis(100);

enum CleanupMode {
    /// Cleanup runs inline on every `add`.
    Synchronous,
    /// `add` signals a worker which waits for a quiet period, then runs one
    /// cleanup pass and exits.
    Debounced { interval: Duration },
}

struct Inner {
    transactions: Vec<Arc<ConfigTransaction>>,
    current: Option<Arc<ConfigTransaction>>,
}

struct Shared {
    inner: Mutex<Inner>,
    max_transactions: usize,
    mode: CleanupMode,
    // Capacity-1 signal channel; a full channel is a no-op by contract.
    signal_tx: mpsc::Sender<()>,
    // Held by the running worker; its presence here means no worker runs.
    signal_rx: Mutex<Option<mpsc::Receiver<()>>>,
    worker_active: AtomicBool,
}

/// Bounded history of configuration transactions plus a pointer to the
/// current committed one.
///
/// Cheap to clone; clones share state. All readouts return consistent
/// snapshots under concurrent `add`/`set_current`.
#[derive(Clone)]
pub struct TransactionStore {
    shared: Arc<Shared>,
}

impl Default for TransactionStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TRANSACTIONS)
    }
}

impl TransactionStore {
    /// A store with synchronous cleanup: every `add` trims terminal
    /// transactions beyond `max_transactions`.
    pub fn new(max_transactions: usize) -> Self {
        Self::build(max_transactions, CleanupMode::Synchronous)
    }

    /// A store whose cleanup is debounced onto a background worker: `add`
    /// signals the worker, which waits for `interval` of quiet before
    /// trimming once and exiting. At most one worker runs at a time.
    pub fn with_debounced_cleanup(max_transactions: usize, interval: Duration) -> Self {
        Self::build(max_transactions, CleanupMode::Debounced { interval })
    }

    fn build(max_transactions: usize, mode: CleanupMode) -> Self {
        let (signal_tx, signal_rx) = mpsc::channel(1);
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    transactions: Vec::new(),
                    current: None,
                }),
                max_transactions,
                mode,
                signal_tx,
                signal_rx: Mutex::new(Some(signal_rx)),
                worker_active: AtomicBool::new(false),
            }),
        }
    }

    /// Appends a transaction to the history and triggers cleanup according
    /// to the configured mode.
    pub fn add(&self, tx: Arc<ConfigTransaction>) {
        self.shared.inner.lock().transactions.push(tx);
        match self.shared.mode {
            CleanupMode::Synchronous => {
                self.shared.cleanup_to(self.shared.max_transactions);
            }
            CleanupMode::Debounced { interval } => {
                // A full channel means a signal is already pending.
                let _ = self.shared.signal_tx.try_send(());
                self.spawn_worker_if_idle(interval);
            }
        }
    }

    fn spawn_worker_if_idle(&self, interval: Duration) {
        if self
            .shared
            .worker_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let Some(mut rx) = self.shared.signal_rx.lock().take() else {
            // Racing worker already holds the receiver.
            self.shared.worker_active.store(false, Ordering::Release);
            return;
        };
        let shared = self.shared.clone();
        tokio::spawn(async move {
            // Wait for a quiet period: any signal restarts the wait.
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => break,
                    received = rx.recv() => {
                        if received.is_none() {
                            break;
                        }
                    }
                }
            }
            let removed = shared.cleanup_to(shared.max_transactions);
            if removed > 0 {
                tracing::debug!(target: "txn-store", removed, "debounced cleanup pass");
            }
            *shared.signal_rx.lock() = Some(rx);
            shared.worker_active.store(false, Ordering::Release);
        });
    }

    /// Sets the pointer to the current committed transaction.
    pub fn set_current(&self, tx: Arc<ConfigTransaction>) {
        self.shared.inner.lock().current = Some(tx);
    }

    /// Clears the current pointer.
    pub fn clear_current(&self) {
        self.shared.inner.lock().current = None;
    }

    /// The current committed transaction, if any.
    pub fn current(&self) -> Option<Arc<ConfigTransaction>> {
        self.shared.inner.lock().current.clone()
    }

    /// An independent copy of the full history, oldest first.
    pub fn all(&self) -> Vec<Arc<ConfigTransaction>> {
        self.shared.inner.lock().transactions.clone()
    }

    /// Looks a transaction up by ID: the current transaction is checked
    /// first, then the history.
    pub fn by_id(&self, id: &str) -> Option<Arc<ConfigTransaction>> {
        let inner = self.shared.inner.lock();
        if let Some(current) = &inner.current {
            if current.id().to_string() == id {
                return Some(current.clone());
            }
        }
        inner
            .transactions
            .iter()
            .find(|tx| tx.id().to_string() == id)
            .cloned()
    }

    /// A page of the history, oldest first, optionally filtered by state.
    /// `offset` and `limit` apply after filtering.
    pub fn list(
        &self,
        offset: usize,
        limit: usize,
        state: Option<TransactionState>,
    ) -> Vec<Arc<ConfigTransaction>> {
        self.shared
            .inner
            .lock()
            .transactions
            .iter()
            .filter(|tx| state.map_or(true, |s| tx.state() == s))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Removes terminal transactions, oldest first, until the history holds
    /// at most `keep_last` entries. Non-terminal entries are never removed
    /// and original order is preserved. Returns how many were removed.
    pub fn clear(&self, keep_last: i64) -> Result<usize, TransactionError> {
        if keep_last < 0 {
            return Err(TransactionError::InvalidArgument(format!(
                "keep_last must be non-negative, got {keep_last}"
            )));
        }
        Ok(self.shared.cleanup_to(keep_last as usize))
    }
}

impl Shared {
    /// The single cleanup pass shared by every mode.
    fn cleanup_to(&self, keep: usize) -> usize {
        let mut inner = self.inner.lock();
        let mut excess = inner.transactions.len().saturating_sub(keep);
        if excess == 0 {
            return 0;
        }
        let before = inner.transactions.len();
        inner.transactions.retain(|tx| {
            if excess > 0 && tx.state().is_terminal() {
                excess -= 1;
                false
            } else {
                true
            }
        });
        before - inner.transactions.len()
    }
}
