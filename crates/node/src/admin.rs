//! Administrative operations over the running orchestrator.

use firelynx_saga::{SagaOrchestrator, TransactionStatus};
use firelynx_txn::transaction::TransactionState;
use firelynx_types::config::Config;
use firelynx_types::error::{SagaError, ValidationError};
use std::sync::Arc;

/// The status/listing/cleanup surface of a firelynx node. A thin value over
/// the orchestrator; supervisors and management transports build on it.
#[derive(Clone)]
pub struct AdminApi {
    orchestrator: Arc<SagaOrchestrator>,
}

impl AdminApi {
    pub fn new(orchestrator: Arc<SagaOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Status of one transaction. Unknown ID fails with `NotFound`.
    pub fn transaction_status(&self, id: &str) -> Result<TransactionStatus, SagaError> {
        self.orchestrator.transaction_status(id)
    }

    /// A page of the transaction history, oldest first, optionally filtered
    /// by state.
    pub fn list_transactions(
        &self,
        offset: usize,
        limit: usize,
        state: Option<TransactionState>,
    ) -> Vec<TransactionStatus> {
        self.orchestrator
            .store()
            .list(offset, limit, state)
            .into_iter()
            .map(|tx| TransactionStatus {
                id: tx.id().to_string(),
                state: tx.state(),
                source: tx.source(),
                source_detail: tx.source_detail().to_string(),
                created_at: tx.created_at(),
                is_valid: tx.is_valid(),
                participants: tx.participant_states(),
            })
            .collect()
    }

    /// Removes terminal transactions until at most `keep_last` remain,
    /// returning how many were removed. Never removes non-terminal entries;
    /// `keep_last < 0` fails with `InvalidArgument`.
    pub fn clear_transactions(&self, keep_last: i64) -> Result<usize, SagaError> {
        Ok(self.orchestrator.store().clear(keep_last)?)
    }

    /// Runs validation on a snapshot without admitting a transaction or
    /// touching any participant.
    pub fn validate_config(&self, config: &Config) -> Result<(), ValidationError> {
        config.validate()
    }
}
