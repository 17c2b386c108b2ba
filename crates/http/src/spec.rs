//! Desired-state assembly: from a configuration snapshot to bound-ready
//! server specs with fully composed handler chains.

use crate::middleware;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::StatusCode;
use firelynx_api::app::{AppRegistry, HttpApp, HttpRequest, HttpResponse};
use firelynx_api::middleware::{compose, ArcHandler, RouteHandler};
use firelynx_types::config::{Config, ListenerTimeouts, StaticData};
use firelynx_types::error::ParticipantError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One route, bound to a concrete handler closure.
#[derive(Debug, Clone)]
pub struct RouteSpec {
    /// The endpoint the route came from.
    pub endpoint_id: String,
    /// The app handling matched requests.
    pub app_id: String,
    /// Normalized method filter; `None` matches any method.
    pub method: Option<String>,
    /// Path prefix to match.
    pub path_prefix: String,
    /// The app invocation wrapped in the endpoint's middleware chain.
    pub handler: ArcHandler,
    /// Configuration identity of the route, used for diffing. Two routes
    /// with equal fingerprints are spec-equal even though their handler
    /// closures are distinct instances.
    pub fingerprint: String,
}

/// The desired shape of one listener: bind parameters plus its route table.
#[derive(Debug, Clone)]
pub struct ServerSpec {
    /// The listener this spec realizes.
    pub listener_id: String,
    /// `host:port` to bind.
    pub address: String,
    /// Listener timeouts.
    pub timeouts: ListenerTimeouts,
    /// Routes in declaration order.
    pub routes: Vec<RouteSpec>,
}

impl ServerSpec {
    /// Whether the bind parameters (address and timeouts) are identical.
    pub fn bind_config_eq(&self, other: &Self) -> bool {
        self.address == other.address && self.timeouts == other.timeouts
    }

    /// Whether the route tables are spec-equal, by ordered fingerprints.
    pub fn routes_eq(&self, other: &Self) -> bool {
        self.routes.len() == other.routes.len()
            && self
                .routes
                .iter()
                .zip(&other.routes)
                .all(|(a, b)| a.fingerprint == b.fingerprint)
    }

    /// Whether the whole spec is equal: bind parameters and routes.
    pub fn config_eq(&self, other: &Self) -> bool {
        self.bind_config_eq(other) && self.routes_eq(other)
    }
}

/// The desired server set, keyed by listener ID.
pub type DesiredState = BTreeMap<String, ServerSpec>;

#[derive(Serialize)]
struct RouteFingerprint<'a> {
    endpoint_id: &'a str,
    app_id: &'a str,
    method: String,
    path_prefix: &'a str,
    static_data: &'a StaticData,
    middlewares: &'a [firelynx_types::config::MiddlewareSpec],
}

/// Invokes the app, mapping handler errors to a minimal 500 so they never
/// tear down the serving task.
struct AppRouteHandler {
    app_id: String,
    app: Arc<dyn HttpApp>,
    static_data: StaticData,
}

#[async_trait]
impl RouteHandler for AppRouteHandler {
    async fn call(&self, req: HttpRequest) -> HttpResponse {
        match self.app.handle_http(req, &self.static_data).await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::error!(
                    target: "http-cluster",
                    app = %self.app_id,
                    error = %e,
                    "handler error"
                );
                let mut resp = HttpResponse::new(Body::from("internal server error"));
                *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                resp
            }
        }
    }
}

/// Builds the desired `{listener_id → ServerSpec}` map from a snapshot.
///
/// For every route: the app is resolved through the registry (a miss fails
/// staging), the endpoint's middleware chain is assembled once and wraps
/// every route on that endpoint, and static data is merged with route-level
/// keys overriding app-level keys. Listeners that end up with zero routes
/// are treated as absent. No sockets are opened here.
pub fn build_desired(
    config: &Config,
    registry: &dyn AppRegistry,
) -> Result<DesiredState, ParticipantError> {
    let mut desired = DesiredState::new();
    for listener in &config.listeners {
        let mut routes = Vec::new();
        for endpoint in config.endpoints_for_listener(&listener.id) {
            let chain = middleware::assemble(&endpoint.middlewares)?;
            for route in &endpoint.routes {
                let app = registry.get_app(&route.app_id).ok_or_else(|| {
                    ParticipantError::UnsupportedApp {
                        detail: format!("no app registered under id {}", route.app_id),
                    }
                })?;
                let mut static_data = config
                    .app(&route.app_id)
                    .map(|a| a.config.clone())
                    .unwrap_or_default();
                for (key, value) in &route.static_data {
                    static_data.insert(key.clone(), value.clone());
                }
                let fingerprint = serde_json::to_string(&RouteFingerprint {
                    endpoint_id: &endpoint.id,
                    app_id: &route.app_id,
                    method: route.rule.method_key(),
                    path_prefix: &route.rule.path_prefix,
                    static_data: &static_data,
                    middlewares: &endpoint.middlewares,
                })
                .map_err(|e| ParticipantError::Other(e.to_string()))?;
                let base: ArcHandler = Arc::new(AppRouteHandler {
                    app_id: route.app_id.clone(),
                    app,
                    static_data,
                });
                routes.push(RouteSpec {
                    endpoint_id: endpoint.id.clone(),
                    app_id: route.app_id.clone(),
                    method: if route.rule.matches_any_method() {
                        None
                    } else {
                        route.rule.method.as_deref().map(str::to_ascii_uppercase)
                    },
                    path_prefix: route.rule.path_prefix.clone(),
                    handler: compose(&chain, base),
                    fingerprint,
                });
            }
        }
        if routes.is_empty() {
            continue;
        }
        desired.insert(
            listener.id.clone(),
            ServerSpec {
                listener_id: listener.id.clone(),
                address: listener.address.clone(),
                timeouts: listener.timeouts.clone(),
                routes,
            },
        );
    }
    Ok(desired)
}
