//! Process wiring for the firelynx server: the TOML configuration loader
//! and the administrative operations surface. The binary lives in
//! `main.rs`; everything here is reusable by tests and embedders.

pub mod admin;
pub mod loader;

pub use admin::AdminApi;
pub use loader::load_config;
