//! The transaction ingress siphon.
//!
//! A single-slot channel through which configuration sources offer validated
//! transactions to the orchestrator. The orchestrator is the sole consumer;
//! sends are context-bounded and return without side effect on cancellation.

use crate::shutdown::{cancelled, Shutdown};
use crate::transaction::ConfigTransaction;
use firelynx_types::error::TransactionError;
use std::sync::Arc;
use tokio::sync::mpsc;

/// The producing half of the ingress siphon.
#[derive(Clone)]
pub struct TransactionSender {
    tx: mpsc::Sender<Arc<ConfigTransaction>>,
}

/// The consuming half, owned by the orchestrator.
pub struct TransactionReceiver {
    rx: mpsc::Receiver<Arc<ConfigTransaction>>,
}

/// Creates the ingress siphon: an unbuffered handoff between configuration
/// sources and the orchestrator.
pub fn transaction_siphon() -> (TransactionSender, TransactionReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (TransactionSender { tx }, TransactionReceiver { rx })
}

impl TransactionSender {
    /// Offers a transaction to the orchestrator, blocking until the slot is
    /// free. Returns [`TransactionError::Cancelled`] without side effect if
    /// the shutdown signal fires first or the consumer is gone.
    pub async fn send(
        &self,
        tx: Arc<ConfigTransaction>,
        mut shutdown: Shutdown,
    ) -> Result<(), TransactionError> {
        tokio::select! {
            permit = self.tx.reserve() => match permit {
                Ok(permit) => {
                    permit.send(tx);
                    Ok(())
                }
                Err(_) => Err(TransactionError::Cancelled),
            },
            _ = cancelled(&mut shutdown) => Err(TransactionError::Cancelled),
        }
    }
}

impl TransactionReceiver {
    /// Receives the next offered transaction. `None` once every sender is
    /// dropped.
    pub async fn recv(&mut self) -> Option<Arc<ConfigTransaction>> {
        self.rx.recv().await
    }
}
