//! Shared harness: a gateway and a target server on ephemeral ports.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    http::{HeaderMap, Method, StatusCode},
    response::IntoResponse,
    routing::{any, get},
    Json, Router,
};
use bifrost_gateway::config::DispatchConfig;
use bifrost_gateway::dispatch::ReqwestClient;
use bifrost_gateway::{router, serve, FanOut, GatewayState, RouteRegistry};
use bifrost_store::{CorruptPolicy, FileBackend};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct TestGateway {
    pub addr: SocketAddr,
    pub data_dir: PathBuf,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl TestGateway {
    pub async fn start(data_dir: &Path) -> Self {
        let backend = Arc::new(FileBackend::new(data_dir, RouteRegistry::STORE_NAME));
        let registry = RouteRegistry::open(backend, CorruptPolicy::Fail)
            .await
            .unwrap();
        let client = ReqwestClient::new(&DispatchConfig {
            target_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(1),
        })
        .unwrap();
        let state = GatewayState::new(Arc::new(registry), FanOut::new(Arc::new(client)), 1 << 20);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                serve(listener, router(Arc::new(state)), cancel, Duration::from_secs(1))
                    .await
                    .unwrap();
            }
        });

        Self {
            addr,
            data_dir: data_dir.to_path_buf(),
            cancel,
            handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.handle.await.unwrap();
    }
}

/// Starts a target server:
/// - `ANY /echo` answers JSON with the method, `x-tag` header and body it saw
/// - `GET /text` answers plain text
/// - `GET /gone` answers `404` with a text body
pub async fn start_target() -> SocketAddr {
    let app = Router::new()
        .route("/echo", any(echo))
        .route("/text", get(|| async { "plain words" }))
        .route("/gone", get(|| async { (StatusCode::NOT_FOUND, "gone") }));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn echo(method: Method, headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    let body: Value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()))
    };

    Json(json!({
        "method": method.as_str(),
        "tag": headers.get("x-tag").and_then(|v| v.to_str().ok()),
        "body": body,
    }))
}

/// An address nothing is listening on.
pub async fn dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}
