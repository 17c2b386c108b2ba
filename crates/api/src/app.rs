//! Application handler and registry contracts.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use firelynx_types::config::StaticData;
use firelynx_types::error::AppError;
use std::sync::Arc;

/// The request type handed to apps and route handlers.
pub type HttpRequest = Request<Body>;
/// The response type produced by apps and route handlers.
pub type HttpResponse = Response<Body>;

/// An application that can handle HTTP requests routed to it.
///
/// `static_data` is the merge of the app definition's config with the
/// matched route's static data (route keys override app keys), computed at
/// stage time.
#[async_trait]
pub trait HttpApp: Send + Sync {
    /// Handles one request. Errors are mapped to HTTP 500 by the routing
    /// layer; a successful handler is responsible for its own status and
    /// body.
    async fn handle_http(
        &self,
        req: HttpRequest,
        static_data: &StaticData,
    ) -> Result<HttpResponse, AppError>;
}

/// ID → application lookup used while building route handlers.
///
/// The cluster looks apps up at stage time only; the route closure captures
/// the returned `Arc` and is immune to later registry mutation for the
/// lifetime of its transaction.
pub trait AppRegistry: Send + Sync {
    /// Returns the handler registered under `id`, if any.
    fn get_app(&self, id: &str) -> Option<Arc<dyn HttpApp>>;
}
