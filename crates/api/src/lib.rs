//! Core traits and contracts for firelynx.
//!
//! The saga orchestrator, the HTTP cluster, and the application registry all
//! meet through the traits defined here: [`participant::SagaParticipant`]
//! for components driven through stage/commit/compensate,
//! [`app::HttpApp`]/[`app::AppRegistry`] for request handling, and the
//! [`middleware`] composition contract.

pub mod app;
pub mod middleware;
pub mod participant;

pub use firelynx_txn::shutdown::{cancelled, never, shutdown_channel, Shutdown};
