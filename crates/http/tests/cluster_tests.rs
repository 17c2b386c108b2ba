//! End-to-end tests driving the HTTP cluster through stage and commit
//! against real sockets.

use async_trait::async_trait;
use axum::body::Body;
use firelynx_api::app::{HttpApp, HttpRequest, HttpResponse};
use firelynx_api::never;
use firelynx_api::participant::{RunState, SagaParticipant};
use firelynx_apps::DynamicAppRegistry;
use firelynx_http::HttpCluster;
use firelynx_txn::transaction::{ConfigTransaction, Source};
use firelynx_types::config::{
    AppDefinition, Config, Endpoint, Listener, MiddlewareSpec, Route, RouteRule, StaticData,
};
use firelynx_types::error::{AppError, ParticipantError};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn listener(id: &str, port: u16) -> Listener {
    let mut l = Listener {
        id: id.to_string(),
        kind: Default::default(),
        address: format!("127.0.0.1:{port}"),
        timeouts: Default::default(),
    };
    // Short drain keeps remove/replace tests fast.
    l.timeouts.drain_ms = 500;
    l
}

fn echo_route(app_id: &str, method: &str, prefix: &str, response: &str) -> Route {
    let mut static_data = StaticData::new();
    static_data.insert("response".into(), json!(response));
    Route {
        app_id: app_id.to_string(),
        rule: RouteRule {
            method: Some(method.to_string()),
            path_prefix: prefix.to_string(),
        },
        static_data,
    }
}

fn echo_config(port: u16) -> Config {
    Config {
        listeners: vec![listener("main", port)],
        endpoints: vec![Endpoint {
            id: "ep".into(),
            listener_id: "main".into(),
            middlewares: vec![],
            routes: vec![echo_route("echo-app", "GET", "/echo", "Echo says: Hello!")],
        }],
        apps: vec![AppDefinition {
            id: "echo-app".into(),
            kind: "echo".into(),
            config: StaticData::new(),
        }],
    }
}

fn registry_for(config: &Config) -> Arc<DynamicAppRegistry> {
    let registry = Arc::new(DynamicAppRegistry::new());
    registry.load_snapshot(config).unwrap();
    registry
}

async fn start_cluster(
    registry: Arc<DynamicAppRegistry>,
) -> (Arc<HttpCluster>, JoinHandle<Result<(), ParticipantError>>) {
    let cluster = Arc::new(HttpCluster::new(registry));
    let task = tokio::spawn(cluster.clone().run(never()));
    cluster
        .run_state()
        .wait_for(|s| *s == RunState::Running)
        .await
        .unwrap();
    (cluster, task)
}

async fn apply(cluster: &Arc<HttpCluster>, config: Config) -> Result<(), ParticipantError> {
    let tx = ConfigTransaction::new(Source::Test, "cluster-test", "req", Arc::new(config));
    tx.run_validation().unwrap();
    cluster.stage_config(never(), &tx).await?;
    cluster.commit_config(never()).await
}

fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

async fn wait_for_http_up(client: &reqwest::Client, url: &str) {
    for _ in 0..100 {
        if client.get(url).send().await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("server at {url} never came up");
}

async fn wait_for_http_down(port: u16) {
    for _ in 0..100 {
        if tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .is_err()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("server on port {port} never went down");
}

async fn stop_cluster(
    cluster: Arc<HttpCluster>,
    task: JoinHandle<Result<(), ParticipantError>>,
) {
    cluster.stop();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn echo_happy_path() {
    let port = free_port();
    let config = echo_config(port);
    let (cluster, task) = start_cluster(registry_for(&config)).await;
    apply(&cluster, config).await.unwrap();

    let client = client();
    let url = format!("http://127.0.0.1:{port}/echo");
    wait_for_http_up(&client, &url).await;
    let resp = client.get(&url).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp.text().await.unwrap().contains("Echo says: Hello!"));

    // No route matches outside the prefix.
    let resp = client
        .get(format!("http://127.0.0.1:{port}/other"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    // Method filter is exact.
    let resp = client.delete(&url).send().await.unwrap();
    assert_eq!(resp.status(), 404);

    stop_cluster(cluster, task).await;
}

#[tokio::test]
async fn add_route_is_atomic_for_unrelated_traffic() {
    let port = free_port();
    let config1 = echo_config(port);
    let (cluster, task) = start_cluster(registry_for(&config1)).await;
    apply(&cluster, config1.clone()).await.unwrap();

    let url_echo = format!("http://127.0.0.1:{port}/echo");
    wait_for_http_up(&client(), &url_echo).await;

    // Hammer /echo while the new route is committed.
    let stop = Arc::new(AtomicBool::new(false));
    let hammer = tokio::spawn({
        let stop = stop.clone();
        let url = url_echo.clone();
        async move {
            let client = client();
            let mut ok = 0usize;
            let mut failed = 0usize;
            while !stop.load(Ordering::Relaxed) {
                match client.get(&url).send().await {
                    Ok(resp) if resp.status() == 200 => ok += 1,
                    _ => failed += 1,
                }
            }
            (ok, failed)
        }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut config2 = config1.clone();
    config2.endpoints[0]
        .routes
        .push(echo_route("echo-app", "GET", "/v2", "V2: Response"));
    apply(&cluster, config2).await.unwrap();

    let client = client();
    let resp = client
        .get(format!("http://127.0.0.1:{port}/v2"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp.text().await.unwrap().contains("V2: Response"));

    // The original route keeps its original body.
    let resp = client.get(&url_echo).send().await.unwrap();
    assert!(resp.text().await.unwrap().contains("Echo says: Hello!"));

    tokio::time::sleep(Duration::from_millis(50)).await;
    stop.store(true, Ordering::Relaxed);
    let (ok, failed) = hammer.await.unwrap();
    assert!(ok > 0, "hammer must have observed successful requests");
    assert_eq!(failed, 0, "no request to /echo may fail during the commit");

    stop_cluster(cluster, task).await;
}

#[tokio::test]
async fn route_only_update_keeps_the_socket_open() {
    let port = free_port();
    let config1 = echo_config(port);
    let (cluster, task) = start_cluster(registry_for(&config1)).await;
    apply(&cluster, config1.clone()).await.unwrap();
    wait_for_http_up(&client(), &format!("http://127.0.0.1:{port}/echo")).await;

    // A connection established before the update must survive it.
    let mut conn = tokio::net::TcpStream::connect(("127.0.0.1", port))
        .await
        .unwrap();

    let mut config2 = config1.clone();
    config2.endpoints[0]
        .routes
        .push(echo_route("echo-app", "GET", "/v2", "V2: Response"));
    apply(&cluster, config2).await.unwrap();

    conn.write_all(b"GET /v2 HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut raw = String::new();
    conn.read_to_string(&mut raw).await.unwrap();
    assert!(raw.starts_with("HTTP/1.1 200"), "got: {raw}");
    assert!(raw.contains("V2: Response"));

    stop_cluster(cluster, task).await;
}

#[tokio::test]
async fn identical_commit_changes_nothing() {
    let port = free_port();
    let config = echo_config(port);
    let (cluster, task) = start_cluster(registry_for(&config)).await;
    apply(&cluster, config.clone()).await.unwrap();
    wait_for_http_up(&client(), &format!("http://127.0.0.1:{port}/echo")).await;

    let mut conn = tokio::net::TcpStream::connect(("127.0.0.1", port))
        .await
        .unwrap();
    // Same snapshot again: the diff is all Keep, the socket survives.
    apply(&cluster, config).await.unwrap();
    conn.write_all(b"GET /echo HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut raw = String::new();
    conn.read_to_string(&mut raw).await.unwrap();
    assert!(raw.starts_with("HTTP/1.1 200"), "got: {raw}");

    stop_cluster(cluster, task).await;
}

#[tokio::test]
async fn listener_swap_moves_traffic() {
    let port1 = free_port();
    let port2 = free_port();
    let config1 = echo_config(port1);
    let (cluster, task) = start_cluster(registry_for(&config1)).await;
    apply(&cluster, config1.clone()).await.unwrap();
    wait_for_http_up(&client(), &format!("http://127.0.0.1:{port1}/echo")).await;

    let mut config2 = config1;
    config2.listeners[0].address = format!("127.0.0.1:{port2}");
    apply(&cluster, config2).await.unwrap();

    let client = client();
    wait_for_http_up(&client, &format!("http://127.0.0.1:{port2}/echo")).await;
    let resp = client
        .get(format!("http://127.0.0.1:{port2}/echo"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    wait_for_http_down(port1).await;

    stop_cluster(cluster, task).await;
}

#[tokio::test]
async fn middleware_headers_yield_to_handler_writes() {
    let port = free_port();
    let mut config = echo_config(port);
    let mut options = StaticData::new();
    options.insert("Content-Type".into(), json!("application/json"));
    options.insert("X-API-Version".into(), json!("v2.1"));
    config.endpoints[0].middlewares.push(MiddlewareSpec {
        id: "hdrs".into(),
        kind: "headers".into(),
        options,
    });
    let (cluster, task) = start_cluster(registry_for(&config)).await;
    apply(&cluster, config).await.unwrap();

    let client = client();
    let url = format!("http://127.0.0.1:{port}/echo");
    wait_for_http_up(&client, &url).await;
    let resp = client.get(&url).send().await.unwrap();
    assert_eq!(resp.headers()["x-api-version"], "v2.1");
    // The echo handler writes Content-Type itself, and its write prevails.
    assert_eq!(resp.headers()["content-type"], "text/plain; charset=utf-8");

    stop_cluster(cluster, task).await;
}

#[tokio::test]
async fn bind_failure_leaves_other_listeners_live() {
    let busy_port = free_port();
    // Hold the port so the cluster's bind fails.
    let _occupier = std::net::TcpListener::bind(format!("127.0.0.1:{busy_port}")).unwrap();
    let good_port = free_port();

    let mut config = echo_config(good_port);
    config.listeners.push(listener("zz-busy", busy_port));
    config.endpoints.push(Endpoint {
        id: "ep-busy".into(),
        listener_id: "zz-busy".into(),
        middlewares: vec![],
        routes: vec![echo_route("echo-app", "GET", "/busy", "never")],
    });

    let (cluster, task) = start_cluster(registry_for(&config)).await;
    let err = apply(&cluster, config).await.unwrap_err();
    assert!(matches!(err, ParticipantError::Bind { .. }), "got: {err}");

    // The healthy listener was applied despite the failure.
    let client = client();
    let url = format!("http://127.0.0.1:{good_port}/echo");
    wait_for_http_up(&client, &url).await;
    assert_eq!(client.get(&url).send().await.unwrap().status(), 200);

    stop_cluster(cluster, task).await;
}

struct PanicApp;

#[async_trait]
impl HttpApp for PanicApp {
    async fn handle_http(
        &self,
        _req: HttpRequest,
        _static_data: &StaticData,
    ) -> Result<HttpResponse, AppError> {
        panic!("handler panic under test");
    }
}

struct FailingApp;

#[async_trait]
impl HttpApp for FailingApp {
    async fn handle_http(
        &self,
        _req: HttpRequest,
        _static_data: &StaticData,
    ) -> Result<HttpResponse, AppError> {
        Err(AppError::Internal("deliberate failure".into()))
    }
}

#[tokio::test]
async fn handler_panics_and_errors_become_500_without_killing_the_server() {
    let port = free_port();
    let mut config = echo_config(port);
    config.apps.push(AppDefinition {
        id: "panics".into(),
        kind: "echo".into(),
        config: StaticData::new(),
    });
    config.apps.push(AppDefinition {
        id: "fails".into(),
        kind: "echo".into(),
        config: StaticData::new(),
    });
    config.endpoints[0].routes.push(Route {
        app_id: "panics".into(),
        rule: RouteRule {
            method: None,
            path_prefix: "/panic".into(),
        },
        static_data: StaticData::new(),
    });
    config.endpoints[0].routes.push(Route {
        app_id: "fails".into(),
        rule: RouteRule {
            method: None,
            path_prefix: "/fail".into(),
        },
        static_data: StaticData::new(),
    });

    let registry = registry_for(&config);
    registry.insert("panics", Arc::new(PanicApp));
    registry.insert("fails", Arc::new(FailingApp));
    let (cluster, task) = start_cluster(registry).await;
    apply(&cluster, config).await.unwrap();

    let client = client();
    let base = format!("http://127.0.0.1:{port}");
    wait_for_http_up(&client, &format!("{base}/echo")).await;

    let resp = client.get(format!("{base}/panic")).send().await.unwrap();
    assert_eq!(resp.status(), 500);
    let resp = client.get(format!("{base}/fail")).send().await.unwrap();
    assert_eq!(resp.status(), 500);

    // The serving task survived both.
    let resp = client.get(format!("{base}/echo")).send().await.unwrap();
    assert_eq!(resp.status(), 200);

    stop_cluster(cluster, task).await;
}

#[tokio::test]
async fn compensate_discards_pending_without_touching_live() {
    let port = free_port();
    let config1 = echo_config(port);
    let (cluster, task) = start_cluster(registry_for(&config1)).await;
    apply(&cluster, config1.clone()).await.unwrap();
    wait_for_http_up(&client(), &format!("http://127.0.0.1:{port}/echo")).await;

    // Stage a snapshot that would remove the listener, then compensate.
    let mut config2 = config1;
    config2.endpoints.clear();
    let tx = ConfigTransaction::new(Source::Test, "cluster-test", "req", Arc::new(config2));
    tx.run_validation().unwrap();
    cluster.stage_config(never(), &tx).await.unwrap();
    cluster.compensate_config(never(), &tx).await.unwrap();

    // The staged change never applied.
    let resp = client()
        .get(format!("http://127.0.0.1:{port}/echo"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    stop_cluster(cluster, task).await;
}
