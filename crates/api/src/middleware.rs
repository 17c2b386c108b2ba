//! The middleware composition contract.

use crate::app::{HttpRequest, HttpResponse};
use async_trait::async_trait;
use std::sync::Arc;

/// A fully-assembled request handler: the app invocation wrapped in the
/// endpoint's middleware chain. Infallible at this layer; failures have
/// already been mapped to error responses further in.
#[async_trait]
pub trait RouteHandler: Send + Sync {
    /// Handles one request.
    async fn call(&self, req: HttpRequest) -> HttpResponse;
}

/// A shared, cloneable handler reference.
pub type ArcHandler = Arc<dyn RouteHandler>;

impl std::fmt::Debug for dyn RouteHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn RouteHandler")
    }
}

/// One middleware in an endpoint's chain: wraps a handler, producing a new
/// handler.
pub trait HttpMiddleware: Send + Sync {
    /// Wraps `inner`, returning the composed handler.
    fn wrap(&self, inner: ArcHandler) -> ArcHandler;
}

impl std::fmt::Debug for dyn HttpMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn HttpMiddleware")
    }
}

/// Composes a middleware chain around a handler in declaration order: the
/// first middleware in the list is outermost.
pub fn compose(middlewares: &[Arc<dyn HttpMiddleware>], handler: ArcHandler) -> ArcHandler {
    middlewares
        .iter()
        .rev()
        .fold(handler, |inner, mw| mw.wrap(inner))
}
