//! Request-time route matching.

use crate::spec::RouteSpec;
use axum::http::Method;

/// An immutable route table, ordered for dispatch: longest prefix first,
/// declaration order breaking ties. Serving tasks read the table through an
/// atomically swapped `Arc`, so a table is never mutated after construction.
pub struct RouteTable {
    routes: Vec<RouteSpec>,
}

impl RouteTable {
    /// Builds a table from routes in declaration order.
    pub fn new(mut routes: Vec<RouteSpec>) -> Self {
        // Stable sort: equal-length prefixes keep declaration order.
        routes.sort_by(|a, b| b.path_prefix.len().cmp(&a.path_prefix.len()));
        Self { routes }
    }

    /// Selects the route for a request, or `None` for a 404.
    pub fn match_route(&self, method: &Method, path: &str) -> Option<&RouteSpec> {
        self.routes.iter().find(|route| {
            path.starts_with(route.path_prefix.as_str()) && method_matches(route, method)
        })
    }

    /// Number of routes in the table.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

fn method_matches(route: &RouteSpec, method: &Method) -> bool {
    match &route.method {
        None => true,
        Some(filter) => filter.eq_ignore_ascii_case(method.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use firelynx_api::app::{HttpRequest, HttpResponse};
    use firelynx_api::middleware::RouteHandler;
    use std::sync::Arc;

    struct Named(&'static str);

    #[async_trait]
    impl RouteHandler for Named {
        async fn call(&self, _req: HttpRequest) -> HttpResponse {
            HttpResponse::new(Body::from(self.0))
        }
    }

    fn route(prefix: &str, method: Option<&str>, tag: &'static str) -> RouteSpec {
        RouteSpec {
            endpoint_id: "ep".into(),
            app_id: tag.into(),
            method: method.map(str::to_string),
            path_prefix: prefix.into(),
            handler: Arc::new(Named(tag)),
            fingerprint: format!("{prefix}|{method:?}|{tag}"),
        }
    }

    #[test]
    fn longest_prefix_wins() {
        let table = RouteTable::new(vec![
            route("/api", None, "api"),
            route("/api/v2", None, "v2"),
        ]);
        let hit = table.match_route(&Method::GET, "/api/v2/users").unwrap();
        assert_eq!(hit.app_id, "v2");
        let hit = table.match_route(&Method::GET, "/api/users").unwrap();
        assert_eq!(hit.app_id, "api");
    }

    #[test]
    fn declaration_order_breaks_ties() {
        let table = RouteTable::new(vec![
            route("/a", Some("GET"), "first"),
            route("/a", None, "second"),
        ]);
        let hit = table.match_route(&Method::GET, "/a").unwrap();
        assert_eq!(hit.app_id, "first");
        // The method filter on the first route defers POST to the second.
        let hit = table.match_route(&Method::POST, "/a").unwrap();
        assert_eq!(hit.app_id, "second");
    }

    #[test]
    fn method_filter_is_exact_unless_wildcard() {
        let table = RouteTable::new(vec![route("/only-get", Some("GET"), "strict")]);
        assert!(table.match_route(&Method::GET, "/only-get").is_some());
        assert!(table.match_route(&Method::DELETE, "/only-get").is_none());
    }

    #[test]
    fn no_match_is_none() {
        let table = RouteTable::new(vec![route("/echo", None, "echo")]);
        assert!(table.match_route(&Method::GET, "/other").is_none());
    }
}
