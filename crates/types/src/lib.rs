//! Core data structures and error types for firelynx.
//!
//! Everything here is plain data: the declarative configuration snapshot
//! (`config`) and the error taxonomy (`error`). Runtime machinery lives in
//! the crates that consume these types.

pub mod config;
pub mod error;
