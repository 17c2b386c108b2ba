//! Applications and their registry.
//!
//! The registry maps app IDs to request handlers. The HTTP cluster looks
//! handlers up at stage time only, so route closures are immune to registry
//! mutation after staging.

pub mod echo;
pub mod registry;

pub use echo::EchoApp;
pub use registry::DynamicAppRegistry;
