//! Middleware assembly: from declarative middleware lists to handler chains.

pub mod console_logger;
pub mod headers;

use axum::extract::ConnectInfo;
use firelynx_api::app::HttpRequest;
use firelynx_api::middleware::HttpMiddleware;
use firelynx_types::config::MiddlewareSpec;
use firelynx_types::error::ParticipantError;
use std::net::SocketAddr;
use std::sync::Arc;

/// Instantiates the middleware chain for one endpoint, in declaration order.
/// Unknown kinds fail staging. Any environment interpolation in middleware
/// options resolves here, at stage time.
pub fn assemble(
    specs: &[MiddlewareSpec],
) -> Result<Vec<Arc<dyn HttpMiddleware>>, ParticipantError> {
    specs
        .iter()
        .map(|spec| match spec.kind.as_str() {
            "console_logger" => console_logger::ConsoleLogger::from_options(&spec.options)
                .map(|mw| Arc::new(mw) as Arc<dyn HttpMiddleware>),
            "headers" => headers::HeadersMiddleware::from_options(&spec.options)
                .map(|mw| Arc::new(mw) as Arc<dyn HttpMiddleware>),
            other => Err(ParticipantError::UnsupportedMiddleware {
                kind: other.to_string(),
            }),
        })
        .collect()
}

/// Derives the client IP for a request: the first `X-Forwarded-For` entry
/// if present, else `X-Real-IP`, else the peer remote address with the port
/// stripped.
pub fn client_ip(req: &HttpRequest) -> String {
    if let Some(xff) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
    {
        if let Some(first) = xff.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    if let Some(real_ip) = req
        .headers()
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
    {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
