//! The declarative configuration snapshot.
//!
//! A [`Config`] describes the complete desired topology of a firelynx
//! server: listeners, endpoints with their middleware chains and routes, and
//! application definitions. A snapshot is immutable once constructed; the
//! transaction subsystem shares it behind an `Arc` and never mutates it.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::time::Duration;

/// Static data attached to an app definition or a route, merged at stage
/// time with route-level keys overriding app-level keys.
pub type StaticData = Map<String, Value>;

/// The kind of socket a listener binds.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ListenerType {
    /// A TCP listener serving HTTP.
    #[default]
    Http,
}

/// Timeouts governing a single listener, in milliseconds on the wire
/// surface. Accessors return [`Duration`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListenerTimeouts {
    /// Bound on reading a request, applied per in-flight request.
    #[serde(default = "default_read_ms")]
    pub read_ms: u64,
    /// Bound on writing a response.
    #[serde(default = "default_write_ms")]
    pub write_ms: u64,
    /// Idle keep-alive bound.
    #[serde(default = "default_idle_ms")]
    pub idle_ms: u64,
    /// How long a removed listener drains in-flight requests before its
    /// serving task is forcibly stopped.
    #[serde(default = "default_drain_ms")]
    pub drain_ms: u64,
}

fn default_read_ms() -> u64 {
    30_000
}
fn default_write_ms() -> u64 {
    30_000
}
fn default_idle_ms() -> u64 {
    60_000
}
fn default_drain_ms() -> u64 {
    5_000
}

impl Default for ListenerTimeouts {
    fn default() -> Self {
        Self {
            read_ms: default_read_ms(),
            write_ms: default_write_ms(),
            idle_ms: default_idle_ms(),
            drain_ms: default_drain_ms(),
        }
    }
}

impl ListenerTimeouts {
    /// Request read timeout.
    pub fn read(&self) -> Duration {
        Duration::from_millis(self.read_ms)
    }
    /// Response write timeout.
    pub fn write(&self) -> Duration {
        Duration::from_millis(self.write_ms)
    }
    /// Keep-alive idle timeout.
    pub fn idle(&self) -> Duration {
        Duration::from_millis(self.idle_ms)
    }
    /// Graceful shutdown drain bound.
    pub fn drain(&self) -> Duration {
        Duration::from_millis(self.drain_ms)
    }
}

/// A single listener: one bound socket address serving HTTP.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Listener {
    /// Unique listener ID, referenced by endpoints.
    pub id: String,
    /// Listener kind. Only `http` today.
    #[serde(rename = "type", default)]
    pub kind: ListenerType,
    /// `host:port` to bind.
    pub address: String,
    /// Per-listener timeout set.
    #[serde(default)]
    pub timeouts: ListenerTimeouts,
}

/// A declarative middleware instance on an endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MiddlewareSpec {
    /// Unique within the endpoint; used in logs.
    pub id: String,
    /// Middleware kind, e.g. `console_logger`. Unknown kinds fail staging.
    #[serde(rename = "type")]
    pub kind: String,
    /// Kind-specific options.
    #[serde(default)]
    pub options: StaticData,
}

/// The rule a request must match to select a route.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteRule {
    /// HTTP method filter. `None` or `"*"` matches any method; otherwise an
    /// exact (case-insensitive) match is required.
    #[serde(default)]
    pub method: Option<String>,
    /// Path prefix the request path must start with.
    pub path_prefix: String,
}

impl RouteRule {
    /// Whether this rule accepts any HTTP method.
    pub fn matches_any_method(&self) -> bool {
        match self.method.as_deref() {
            None | Some("*") => true,
            Some(_) => false,
        }
    }

    /// Normalized method filter used for duplicate detection: `*` for any.
    pub fn method_key(&self) -> String {
        if self.matches_any_method() {
            "*".to_string()
        } else {
            self.method.as_deref().unwrap_or("*").to_ascii_uppercase()
        }
    }
}

/// Binds an application to a route rule within an endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Route {
    /// The application handling matched requests.
    pub app_id: String,
    /// Match rule.
    pub rule: RouteRule,
    /// Route-level static data, overriding app-level keys on conflict.
    #[serde(default)]
    pub static_data: StaticData,
}

/// A group of routes sharing a listener and a middleware chain.
///
/// The endpoint's middleware chain wraps every route on the endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Endpoint {
    /// Unique endpoint ID.
    pub id: String,
    /// The listener this endpoint attaches to.
    pub listener_id: String,
    /// Middleware chain, applied in declaration order (first outermost).
    #[serde(default)]
    pub middlewares: Vec<MiddlewareSpec>,
    /// Routes in declaration order.
    #[serde(default)]
    pub routes: Vec<Route>,
}

/// An application definition. The handler implementation is looked up from
/// the application registry by `id`; `config` carries app-level static data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppDefinition {
    /// Unique app ID, referenced by routes.
    pub id: String,
    /// App kind, e.g. `echo`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Kind-specific configuration, merged into route static data.
    #[serde(default)]
    pub config: StaticData,
}

/// The complete declarative configuration snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Listeners in declaration order.
    #[serde(default)]
    pub listeners: Vec<Listener>,
    /// Endpoints in declaration order.
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    /// Application definitions in declaration order.
    #[serde(default)]
    pub apps: Vec<AppDefinition>,
}

impl Config {
    /// Runs the structural and referential checks of the snapshot schema.
    ///
    /// Checked invariants: IDs are non-empty and unique within each
    /// collection; listener addresses are unique; every
    /// `endpoint.listener_id` and `route.app_id` resolves; at most one
    /// endpoint per listener maps the same `(method, path_prefix)` pair.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut listener_ids = HashSet::new();
        let mut addresses = HashSet::new();
        for listener in &self.listeners {
            if listener.id.is_empty() {
                return Err(ValidationError::EmptyId {
                    collection: "listener",
                });
            }
            if !listener_ids.insert(listener.id.as_str()) {
                return Err(ValidationError::DuplicateId {
                    collection: "listener",
                    id: listener.id.clone(),
                });
            }
            if listener.address.is_empty() {
                return Err(ValidationError::EmptyAddress {
                    listener_id: listener.id.clone(),
                });
            }
            if !addresses.insert(listener.address.as_str()) {
                return Err(ValidationError::DuplicateListenerAddress {
                    address: listener.address.clone(),
                });
            }
        }

        let mut app_ids = HashSet::new();
        for app in &self.apps {
            if app.id.is_empty() {
                return Err(ValidationError::EmptyId { collection: "app" });
            }
            if !app_ids.insert(app.id.as_str()) {
                return Err(ValidationError::DuplicateId {
                    collection: "app",
                    id: app.id.clone(),
                });
            }
        }

        let mut endpoint_ids = HashSet::new();
        let mut rules_per_listener = HashSet::new();
        for endpoint in &self.endpoints {
            if endpoint.id.is_empty() {
                return Err(ValidationError::EmptyId {
                    collection: "endpoint",
                });
            }
            if !endpoint_ids.insert(endpoint.id.as_str()) {
                return Err(ValidationError::DuplicateId {
                    collection: "endpoint",
                    id: endpoint.id.clone(),
                });
            }
            if !listener_ids.contains(endpoint.listener_id.as_str()) {
                return Err(ValidationError::UnknownListener {
                    endpoint_id: endpoint.id.clone(),
                    listener_id: endpoint.listener_id.clone(),
                });
            }
            for route in &endpoint.routes {
                if !app_ids.contains(route.app_id.as_str()) {
                    return Err(ValidationError::UnknownApp {
                        endpoint_id: endpoint.id.clone(),
                        app_id: route.app_id.clone(),
                    });
                }
                let key = (
                    endpoint.listener_id.clone(),
                    route.rule.method_key(),
                    route.rule.path_prefix.clone(),
                );
                if !rules_per_listener.insert(key) {
                    return Err(ValidationError::DuplicateRouteRule {
                        listener_id: endpoint.listener_id.clone(),
                        method: route.rule.method_key(),
                        path_prefix: route.rule.path_prefix.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// All endpoints attached to the given listener, in declaration order.
    pub fn endpoints_for_listener<'a>(
        &'a self,
        listener_id: &'a str,
    ) -> impl Iterator<Item = &'a Endpoint> {
        self.endpoints
            .iter()
            .filter(move |e| e.listener_id == listener_id)
    }

    /// Looks up an app definition by ID.
    pub fn app(&self, id: &str) -> Option<&AppDefinition> {
        self.apps.iter().find(|a| a.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn listener(id: &str, address: &str) -> Listener {
        Listener {
            id: id.to_string(),
            kind: ListenerType::Http,
            address: address.to_string(),
            timeouts: ListenerTimeouts::default(),
        }
    }

    fn route(app_id: &str, method: Option<&str>, prefix: &str) -> Route {
        Route {
            app_id: app_id.to_string(),
            rule: RouteRule {
                method: method.map(str::to_string),
                path_prefix: prefix.to_string(),
            },
            static_data: StaticData::new(),
        }
    }

    fn echo_app(id: &str) -> AppDefinition {
        AppDefinition {
            id: id.to_string(),
            kind: "echo".to_string(),
            config: StaticData::new(),
        }
    }

    fn valid_config() -> Config {
        Config {
            listeners: vec![listener("main", "127.0.0.1:8080")],
            endpoints: vec![Endpoint {
                id: "ep".to_string(),
                listener_id: "main".to_string(),
                middlewares: vec![],
                routes: vec![route("echo", Some("GET"), "/echo")],
            }],
            apps: vec![echo_app("echo")],
        }
    }

    #[test]
    fn valid_config_passes() {
        valid_config().validate().expect("should validate");
    }

    #[test]
    fn duplicate_listener_address_is_rejected() {
        let mut cfg = valid_config();
        cfg.listeners.push(listener("second", "127.0.0.1:8080"));
        let err = cfg.validate().unwrap_err();
        assert!(
            err.to_string().contains("duplicate ID: listener address"),
            "unexpected message: {err}"
        );
    }

    #[test]
    fn duplicate_listener_id_is_rejected() {
        let mut cfg = valid_config();
        cfg.listeners.push(listener("main", "127.0.0.1:9090"));
        assert!(matches!(
            cfg.validate().unwrap_err(),
            ValidationError::DuplicateId {
                collection: "listener",
                ..
            }
        ));
    }

    #[test]
    fn unknown_listener_reference_is_rejected() {
        let mut cfg = valid_config();
        cfg.endpoints[0].listener_id = "missing".to_string();
        assert!(matches!(
            cfg.validate().unwrap_err(),
            ValidationError::UnknownListener { .. }
        ));
    }

    #[test]
    fn unknown_app_reference_is_rejected() {
        let mut cfg = valid_config();
        cfg.endpoints[0].routes[0].app_id = "missing".to_string();
        assert!(matches!(
            cfg.validate().unwrap_err(),
            ValidationError::UnknownApp { .. }
        ));
    }

    #[test]
    fn duplicate_route_rule_on_one_listener_is_rejected() {
        let mut cfg = valid_config();
        cfg.endpoints.push(Endpoint {
            id: "ep2".to_string(),
            listener_id: "main".to_string(),
            middlewares: vec![],
            routes: vec![route("echo", Some("GET"), "/echo")],
        });
        assert!(matches!(
            cfg.validate().unwrap_err(),
            ValidationError::DuplicateRouteRule { .. }
        ));
    }

    #[test]
    fn same_rule_on_different_listeners_is_fine() {
        let mut cfg = valid_config();
        cfg.listeners.push(listener("alt", "127.0.0.1:9090"));
        cfg.endpoints.push(Endpoint {
            id: "ep2".to_string(),
            listener_id: "alt".to_string(),
            middlewares: vec![],
            routes: vec![route("echo", Some("GET"), "/echo")],
        });
        cfg.validate().expect("distinct listeners may share rules");
    }

    #[test]
    fn wildcard_and_named_method_are_distinct_rules() {
        let mut cfg = valid_config();
        cfg.endpoints[0]
            .routes
            .push(route("echo", None, "/echo"));
        cfg.validate()
            .expect("wildcard method is a distinct rule key");
    }

    #[test]
    fn empty_id_is_rejected() {
        let mut cfg = valid_config();
        cfg.apps.push(AppDefinition {
            id: String::new(),
            kind: "echo".to_string(),
            config: StaticData::new(),
        });
        assert!(matches!(
            cfg.validate().unwrap_err(),
            ValidationError::EmptyId { collection: "app" }
        ));
    }

    #[test]
    fn snapshot_deserializes_from_toml() {
        let raw = r#"
            [[listeners]]
            id = "main"
            address = "127.0.0.1:8080"

            [listeners.timeouts]
            drain_ms = 250

            [[endpoints]]
            id = "ep"
            listener_id = "main"

            [[endpoints.middlewares]]
            id = "log"
            type = "console_logger"

            [endpoints.middlewares.options]
            preset = "standard"

            [[endpoints.routes]]
            app_id = "echo"

            [endpoints.routes.rule]
            method = "GET"
            path_prefix = "/echo"

            [endpoints.routes.static_data]
            response = "Echo says: Hello!"

            [[apps]]
            id = "echo"
            type = "echo"
        "#;
        let cfg: Config = toml::from_str(raw).expect("toml should parse");
        cfg.validate().expect("parsed snapshot should validate");
        assert_eq!(cfg.listeners[0].timeouts.drain(), Duration::from_millis(250));
        assert_eq!(
            cfg.endpoints[0].routes[0].static_data.get("response"),
            Some(&json!("Echo says: Hello!"))
        );
    }
}
