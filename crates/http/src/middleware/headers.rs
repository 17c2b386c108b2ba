//! The headers middleware: static response headers for an endpoint.
//!
//! Headers set here are applied before the handler runs; when the handler
//! writes the same header, the handler's value prevails.

use async_trait::async_trait;
use axum::http::header::{HeaderName, HeaderValue};
use firelynx_api::app::{HttpRequest, HttpResponse};
use firelynx_api::middleware::{ArcHandler, HttpMiddleware, RouteHandler};
use firelynx_types::config::StaticData;
use firelynx_types::error::ParticipantError;
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;

/// Sets a fixed map of response headers on every route of its endpoint.
pub struct HeadersMiddleware {
    headers: Arc<Vec<(HeaderName, HeaderValue)>>,
}

impl HeadersMiddleware {
    /// Parses the options map: each key is a header name, each value the
    /// header value as a string. Invalid names or values fail staging.
    pub fn from_options(options: &StaticData) -> Result<Self, ParticipantError> {
        let mut headers = Vec::with_capacity(options.len());
        for (name, value) in options {
            let Value::String(value) = value else {
                return Err(ParticipantError::InvalidArgument(format!(
                    "headers middleware value for {name} must be a string"
                )));
            };
            let name = HeaderName::from_str(name).map_err(|e| {
                ParticipantError::InvalidArgument(format!("invalid header name {name}: {e}"))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                ParticipantError::InvalidArgument(format!("invalid header value for {name}: {e}"))
            })?;
            headers.push((name, value));
        }
        Ok(Self {
            headers: Arc::new(headers),
        })
    }
}

impl HttpMiddleware for HeadersMiddleware {
    fn wrap(&self, inner: ArcHandler) -> ArcHandler {
        Arc::new(SetHeaders {
            headers: self.headers.clone(),
            inner,
        })
    }
}

struct SetHeaders {
    headers: Arc<Vec<(HeaderName, HeaderValue)>>,
    inner: ArcHandler,
}

#[async_trait]
impl RouteHandler for SetHeaders {
    async fn call(&self, req: HttpRequest) -> HttpResponse {
        let mut resp = self.inner.call(req).await;
        for (name, value) in self.headers.iter() {
            // Handler writes prevail over middleware values.
            if !resp.headers().contains_key(name) {
                resp.headers_mut().insert(name.clone(), value.clone());
            }
        }
        resp
    }
}
