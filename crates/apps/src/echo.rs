//! The echo application.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::{HeaderValue, CONTENT_TYPE};
use firelynx_api::app::{HttpApp, HttpRequest, HttpResponse};
use firelynx_types::config::StaticData;
use firelynx_types::error::AppError;
use serde_json::Value;

/// Responds 200 with the `response` key of its static data, falling back to
/// an echo of the request line. The reference app for wiring and tests.
#[derive(Debug, Default)]
pub struct EchoApp;

#[async_trait]
impl HttpApp for EchoApp {
    async fn handle_http(
        &self,
        req: HttpRequest,
        static_data: &StaticData,
    ) -> Result<HttpResponse, AppError> {
        let body = static_data
            .get("response")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("echo: {} {}", req.method(), req.uri().path()));
        let mut resp = HttpResponse::new(Body::from(body));
        resp.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        Ok(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use serde_json::json;

    #[tokio::test]
    async fn responds_with_configured_body() {
        let mut data = StaticData::new();
        data.insert("response".into(), json!("Echo says: Hello!"));
        let resp = EchoApp
            .handle_http(
                Request::builder().uri("/echo").body(Body::empty()).unwrap(),
                &data,
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()["content-type"], "text/plain; charset=utf-8");
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"Echo says: Hello!");
    }

    #[tokio::test]
    async fn falls_back_to_request_line() {
        let resp = EchoApp
            .handle_http(
                Request::builder()
                    .method("POST")
                    .uri("/anything")
                    .body(Body::empty())
                    .unwrap(),
                &StaticData::new(),
            )
            .await
            .unwrap();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"echo: POST /anything");
    }
}
