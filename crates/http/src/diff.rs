//! The reconciliation plan: what must change to make the live server set
//! equal the desired set.

use crate::spec::{DesiredState, ServerSpec};
use std::collections::BTreeMap;

/// One step of a reconciliation pass, keyed by listener ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Present in desired only: bind and start serving.
    Add(String),
    /// Present in live only: drain and release.
    Remove(String),
    /// Present in both with identical bind parameters but different routes:
    /// swap the handler table atomically, socket stays open.
    UpdateRoutes(String),
    /// Present in both with changed address or timeouts: close and re-open.
    Replace(String),
    /// Present in both, spec-equal: no action.
    Keep(String),
}

/// Computes the reconciliation plan. Removes come first so released
/// addresses are free before any bind; the rest follows listener-ID order.
pub fn plan(live: &BTreeMap<String, ServerSpec>, desired: &DesiredState) -> Vec<ReconcileAction> {
    let mut actions = Vec::new();
    for id in live.keys() {
        if !desired.contains_key(id) {
            actions.push(ReconcileAction::Remove(id.clone()));
        }
    }
    for (id, spec) in desired {
        match live.get(id) {
            None => actions.push(ReconcileAction::Add(id.clone())),
            Some(current) if current.config_eq(spec) => {
                actions.push(ReconcileAction::Keep(id.clone()))
            }
            Some(current) if current.bind_config_eq(spec) => {
                actions.push(ReconcileAction::UpdateRoutes(id.clone()))
            }
            Some(_) => actions.push(ReconcileAction::Replace(id.clone())),
        }
    }
    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::RouteSpec;
    use async_trait::async_trait;
    use axum::body::Body;
    use firelynx_api::app::{HttpRequest, HttpResponse};
    use firelynx_api::middleware::RouteHandler;
    use firelynx_types::config::ListenerTimeouts;
    use std::sync::Arc;

    struct Null;

    #[async_trait]
    impl RouteHandler for Null {
        async fn call(&self, _req: HttpRequest) -> HttpResponse {
            HttpResponse::new(Body::empty())
        }
    }

    fn spec(id: &str, address: &str, fingerprints: &[&str]) -> ServerSpec {
        ServerSpec {
            listener_id: id.into(),
            address: address.into(),
            timeouts: ListenerTimeouts::default(),
            routes: fingerprints
                .iter()
                .map(|fp| RouteSpec {
                    endpoint_id: "ep".into(),
                    app_id: "app".into(),
                    method: None,
                    path_prefix: "/".into(),
                    handler: Arc::new(Null),
                    fingerprint: fp.to_string(),
                })
                .collect(),
        }
    }

    fn as_map(specs: Vec<ServerSpec>) -> BTreeMap<String, ServerSpec> {
        specs
            .into_iter()
            .map(|s| (s.listener_id.clone(), s))
            .collect()
    }

    #[test]
    fn identical_sets_are_all_keep() {
        let live = as_map(vec![spec("a", "127.0.0.1:1", &["r1"])]);
        let desired = as_map(vec![spec("a", "127.0.0.1:1", &["r1"])]);
        assert_eq!(
            plan(&live, &desired),
            vec![ReconcileAction::Keep("a".into())]
        );
    }

    #[test]
    fn classifies_add_remove_update_replace() {
        let live = as_map(vec![
            spec("gone", "127.0.0.1:1", &["r"]),
            spec("routes-changed", "127.0.0.1:2", &["old"]),
            spec("address-changed", "127.0.0.1:3", &["r"]),
            spec("same", "127.0.0.1:4", &["r"]),
        ]);
        let desired = as_map(vec![
            spec("new", "127.0.0.1:9", &["r"]),
            spec("routes-changed", "127.0.0.1:2", &["new"]),
            spec("address-changed", "127.0.0.1:30", &["r"]),
            spec("same", "127.0.0.1:4", &["r"]),
        ]);
        let actions = plan(&live, &desired);
        assert_eq!(
            actions,
            vec![
                ReconcileAction::Remove("gone".into()),
                ReconcileAction::Replace("address-changed".into()),
                ReconcileAction::Add("new".into()),
                ReconcileAction::UpdateRoutes("routes-changed".into()),
                ReconcileAction::Keep("same".into()),
            ]
        );
    }

    #[test]
    fn timeout_change_forces_replace() {
        let live = as_map(vec![spec("a", "127.0.0.1:1", &["r"])]);
        let mut changed = spec("a", "127.0.0.1:1", &["r"]);
        changed.timeouts.drain_ms = 1;
        let desired = as_map(vec![changed]);
        assert_eq!(
            plan(&live, &desired),
            vec![ReconcileAction::Replace("a".into())]
        );
    }
}
