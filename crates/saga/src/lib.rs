//! The saga orchestrator.
//!
//! Drives every registered [`SagaParticipant`](firelynx_api::participant::SagaParticipant)
//! through `stage → commit` against one configuration transaction at a time,
//! compensating previously-staged participants in deterministic order when
//! anything fails.

pub mod orchestrator;

pub use orchestrator::{SagaOrchestrator, TransactionStatus, DEFAULT_RELOAD_TIMEOUT};
