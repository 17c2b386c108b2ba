//! Observability bootstrap for firelynx.
//!
//! The core never installs a global subscriber itself; only the binary
//! calls [`init_tracing`]. Tests and embedders are free to install their
//! own.

pub mod init;

pub use init::{init_tracing, LogFormat};
