//! ID → application lookup.

use crate::echo::EchoApp;
use firelynx_api::app::{AppRegistry, HttpApp};
use firelynx_types::config::Config;
use firelynx_types::error::ParticipantError;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A registry whose contents follow configuration snapshots.
///
/// [`load_snapshot`](Self::load_snapshot) instantiates a handler for every
/// app definition in a snapshot and replaces the registry contents
/// atomically. Handlers captured by already-staged route closures keep
/// working: the cluster holds their `Arc`s independently of the registry.
#[derive(Default)]
pub struct DynamicAppRegistry {
    apps: RwLock<BTreeMap<String, Arc<dyn HttpApp>>>,
}

impl DynamicAppRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the registry contents with handlers for the snapshot's app
    /// definitions. Unknown app kinds fail with `UnsupportedApp`.
    pub fn load_snapshot(&self, config: &Config) -> Result<(), ParticipantError> {
        let mut apps: BTreeMap<String, Arc<dyn HttpApp>> = BTreeMap::new();
        for def in &config.apps {
            let app: Arc<dyn HttpApp> = match def.kind.as_str() {
                "echo" => Arc::new(EchoApp),
                other => {
                    return Err(ParticipantError::UnsupportedApp {
                        detail: format!("app {} declares unsupported type {other}", def.id),
                    })
                }
            };
            apps.insert(def.id.clone(), app);
        }
        tracing::debug!(target: "apps", count = apps.len(), "registry loaded from snapshot");
        *self.apps.write() = apps;
        Ok(())
    }

    /// Registers a handler directly, for embedders with custom apps.
    pub fn insert(&self, id: impl Into<String>, app: Arc<dyn HttpApp>) {
        self.apps.write().insert(id.into(), app);
    }
}

impl AppRegistry for DynamicAppRegistry {
    fn get_app(&self, id: &str) -> Option<Arc<dyn HttpApp>> {
        self.apps.read().get(id).cloned()
    }
}
