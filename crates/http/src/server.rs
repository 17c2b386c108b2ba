//! One live HTTP server: a bound socket, a serving task, and an atomically
//! swappable route table.

use crate::router::RouteTable;
use crate::spec::ServerSpec;
use axum::body::Body;
use axum::error_handling::HandleErrorLayer;
use axum::extract::State;
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use axum::Router;
use firelynx_types::error::ParticipantError;
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower::timeout::TimeoutLayer;
use tower::{BoxError, ServiceBuilder};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
struct ServerState {
    // Double indirection: the outer lock is held only to clone the inner
    // Arc, so readers are lock-free with respect to table swaps.
    routes: Arc<RwLock<Arc<RouteTable>>>,
}

async fn dispatch(State(state): State<ServerState>, req: Request<Body>) -> Response<Body> {
    let table = state.routes.read().clone();
    match table.match_route(req.method(), req.uri().path()) {
        Some(route) => route.handler.call(req).await,
        None => {
            let mut resp = Response::new(Body::from("not found"));
            *resp.status_mut() = StatusCode::NOT_FOUND;
            resp
        }
    }
}

async fn map_middleware_error(err: BoxError) -> impl IntoResponse {
    if err.is::<tower::timeout::error::Elapsed>() {
        (StatusCode::REQUEST_TIMEOUT, "request timed out")
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "service error")
    }
}

/// A running listener. Owned and driven exclusively by the cluster's
/// reconciliation task.
pub struct HttpServer {
    spec: ServerSpec,
    routes: Arc<RwLock<Arc<RouteTable>>>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl HttpServer {
    /// Binds the spec's address and starts serving its route table.
    pub async fn start(spec: ServerSpec) -> Result<Self, ParticipantError> {
        let addr: SocketAddr = spec.address.parse().map_err(|e| ParticipantError::Bind {
            address: spec.address.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("{e}")),
        })?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ParticipantError::Bind {
                address: spec.address.clone(),
                source: e,
            })?;

        let routes = Arc::new(RwLock::new(Arc::new(RouteTable::new(spec.routes.clone()))));
        let state = ServerState {
            routes: routes.clone(),
        };
        let app = Router::new()
            .fallback(dispatch)
            .with_state(state)
            // `HandleErrorLayer` must wrap the fallible timeout layer to
            // keep the service infallible.
            .layer(
                ServiceBuilder::new()
                    .layer(HandleErrorLayer::new(map_middleware_error))
                    .layer(TimeoutLayer::new(spec.timeouts.read())),
            )
            .layer(CatchPanicLayer::new())
            .layer(TraceLayer::new_for_http());

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let listener_id = spec.listener_id.clone();
        let address = spec.address.clone();
        tracing::info!(target: "http-cluster", listener = %listener_id, %address, "listener bound");
        let task = tokio::spawn(async move {
            let server = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });
            if let Err(e) = server.await {
                tracing::error!(target: "http-cluster", listener = %listener_id, error = %e, "server error");
            }
        });

        Ok(Self {
            spec,
            routes,
            shutdown_tx,
            task,
        })
    }

    /// The spec this server currently realizes.
    pub fn spec(&self) -> &ServerSpec {
        &self.spec
    }

    /// Swaps in a new route table without touching the socket. The swap is
    /// atomic from a reader's perspective: in-flight requests finish on the
    /// old table, new requests see the new one.
    pub fn update_routes(&mut self, spec: ServerSpec) {
        *self.routes.write() = Arc::new(RouteTable::new(spec.routes.clone()));
        tracing::info!(
            target: "http-cluster",
            listener = %spec.listener_id,
            routes = spec.routes.len(),
            "route table swapped"
        );
        self.spec = spec;
    }

    /// Graceful shutdown: stop accepting, drain in-flight requests up to the
    /// spec's drain timeout, then force-stop the serving task.
    pub async fn shutdown(self) {
        let drain = self.spec.timeouts.drain();
        let _ = self.shutdown_tx.send(true);
        let mut task = self.task;
        tokio::select! {
            _ = &mut task => {}
            _ = tokio::time::sleep(drain) => {
                tracing::warn!(
                    target: "http-cluster",
                    listener = %self.spec.listener_id,
                    "drain timeout exceeded, aborting serving task"
                );
                task.abort();
            }
        }
        tracing::info!(
            target: "http-cluster",
            listener = %self.spec.listener_id,
            address = %self.spec.address,
            "listener released"
        );
    }
}
