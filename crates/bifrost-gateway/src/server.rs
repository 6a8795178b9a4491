//! Gateway server implementation.
//!
//! Every request goes through a single fallback handler. A stored virtual
//! route for the request's method and path always wins; only when none
//! exists is the request matched against the built-in [`Endpoint`]s.

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{self, Body, Bytes},
    extract::{Request, State},
    http::{header, HeaderMap, Method},
    response::{Html, IntoResponse, Response},
    Json, Router,
};
use bifrost_store::FileBackend;
use http_body_util::LengthLimitError;
use serde_json::Value;
use subtle::ConstantTimeEq;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::config::GatewayConfig;
use crate::dispatch::{FanOut, ReqwestClient};
use crate::error::GatewayError;
use crate::registry::{RegistryKey, RouteDefinition, RouteRegistry, MANAGEMENT_PREFIX};

const LANDING_PAGE: &str = r#"<!doctype html>
<html>
  <head><meta charset="utf-8"><title>Bifrost</title></head>
  <body>Bifrost - <a href="https://github.com/nunogois/bifrost">GitHub</a></body>
</html>
"#;

/// Shared gateway state.
#[derive(Debug)]
pub struct GatewayState {
    registry: Arc<RouteRegistry>,
    fan_out: FanOut,
    max_body_size: usize,
}

impl GatewayState {
    pub fn new(registry: Arc<RouteRegistry>, fan_out: FanOut, max_body_size: usize) -> Self {
        Self {
            registry,
            fan_out,
            max_body_size,
        }
    }
}

/// Built-in endpoints, consulted only when no virtual route matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Landing,
    Health,
    Management { op: ManagementOp, key: RegistryKey },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagementOp {
    Read,
    Create,
    Replace,
    Delete,
}

impl Endpoint {
    pub fn resolve(method: &Method, path: &str) -> Option<Self> {
        match (method, path) {
            (&Method::GET, "/") => Some(Self::Landing),
            (&Method::GET, "/health") => Some(Self::Health),
            _ if path.starts_with(MANAGEMENT_PREFIX) => {
                let op = match *method {
                    Method::GET => ManagementOp::Read,
                    Method::POST => ManagementOp::Create,
                    Method::PUT => ManagementOp::Replace,
                    Method::DELETE => ManagementOp::Delete,
                    _ => return None,
                };
                let key = RegistryKey::from_management_path(path)?;
                Some(Self::Management { op, key })
            }
            _ => None,
        }
    }
}

/// Builds the gateway router around shared state.
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .fallback(handle_request)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the gateway server.
pub async fn run(config: GatewayConfig, cancel: CancellationToken) -> Result<(), GatewayError> {
    let backend = Arc::new(FileBackend::new(
        &config.store.data_dir,
        RouteRegistry::STORE_NAME,
    ));
    let registry = Arc::new(RouteRegistry::open(backend, config.store.on_corrupt).await?);
    tracing::info!(
        data_dir = %config.store.data_dir.display(),
        routes = registry.len().await,
        "Route registry loaded"
    );

    let client = ReqwestClient::new(&config.dispatch)?;
    let state = Arc::new(GatewayState::new(
        registry,
        FanOut::new(Arc::new(client)).with_max_concurrent(config.limits.max_concurrent_targets),
        config.limits.max_body_size,
    ));

    let listener = TcpListener::bind(config.server.bind_address).await?;
    tracing::info!(address = %config.server.bind_address, "Gateway listening");

    serve(listener, router(state), cancel, config.server.shutdown_timeout).await?;

    tracing::info!("Gateway shutdown complete");
    Ok(())
}

/// Serves `app` until `cancel` fires, then waits up to `shutdown_timeout`
/// for in-flight requests before returning.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    cancel: CancellationToken,
    shutdown_timeout: Duration,
) -> Result<(), GatewayError> {
    let graceful = {
        let cancel = cancel.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .into_future()
    };

    let deadline = async {
        cancel.cancelled().await;
        tokio::time::sleep(shutdown_timeout).await;
    };

    tokio::select! {
        result = graceful => result?,
        () = deadline => {
            tracing::warn!(
                timeout_secs = shutdown_timeout.as_secs(),
                "Shutdown timeout elapsed, dropping in-flight requests"
            );
        }
    }

    Ok(())
}

async fn handle_request(
    State(state): State<Arc<GatewayState>>,
    request: Request,
) -> Result<Response, GatewayError> {
    let (parts, body) = request.into_parts();
    let path = parts.uri.path();

    let key = RegistryKey::for_request(&parts.method, path);
    if let Some(route) = state.registry.get(&key).await {
        return invoke(&state, &key, &route, &parts.headers, body).await;
    }

    match Endpoint::resolve(&parts.method, path) {
        Some(Endpoint::Landing) => Ok(Html(LANDING_PAGE).into_response()),
        Some(Endpoint::Health) => Ok(health(&state).await.into_response()),
        Some(Endpoint::Management { op, key }) => manage(&state, op, &key, body).await,
        None => Err(GatewayError::NotFound(format!("{} {path}", parts.method))),
    }
}

async fn invoke(
    state: &GatewayState,
    key: &RegistryKey,
    route: &RouteDefinition,
    headers: &HeaderMap,
    body: Body,
) -> Result<Response, GatewayError> {
    if let Err(e) = authorize(route, headers) {
        tracing::warn!(route_key = %key, "Rejected invocation with wrong or missing token");
        return Err(e);
    }

    let bytes = read_body(body, state.max_body_size).await?;
    let context = serde_json::from_slice::<Value>(&bytes)
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));

    let report = state.fan_out.dispatch(route, &context).await;
    tracing::info!(
        route_key = %key,
        targets = route.targets().len(),
        status = report.status().as_u16(),
        "Route invoked"
    );

    Ok(report.into_response())
}

/// Compares the whole `Authorization` header with the route's token.
fn authorize(route: &RouteDefinition, headers: &HeaderMap) -> Result<(), GatewayError> {
    let Some(expected) = route.required_token() else {
        return Ok(());
    };

    let presented = headers
        .get(header::AUTHORIZATION)
        .map(|value| value.as_bytes())
        .unwrap_or_default();

    if bool::from(presented.ct_eq(expected.as_bytes())) {
        Ok(())
    } else {
        Err(GatewayError::Unauthorized)
    }
}

async fn manage(
    state: &GatewayState,
    op: ManagementOp,
    key: &RegistryKey,
    body: Body,
) -> Result<Response, GatewayError> {
    let registry = &state.registry;

    let definition = match op {
        ManagementOp::Read => registry.read(key).await?,
        ManagementOp::Create => {
            if registry.contains(key).await {
                return Err(GatewayError::Conflict(key.to_string()));
            }
            let definition = parse_definition(&read_body(body, state.max_body_size).await?)?;
            registry.create(key, definition).await?
        }
        ManagementOp::Replace => {
            if !registry.contains(key).await {
                return Err(GatewayError::NotFound(key.to_string()));
            }
            let definition = parse_definition(&read_body(body, state.max_body_size).await?)?;
            registry.replace(key, definition).await?
        }
        ManagementOp::Delete => registry.delete(key).await?,
    };

    Ok(Json(definition).into_response())
}

fn parse_definition(bytes: &Bytes) -> Result<RouteDefinition, GatewayError> {
    serde_json::from_slice(bytes).map_err(|e| GatewayError::InvalidDefinition(e.to_string()))
}

async fn health(state: &GatewayState) -> Json<Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "routes": state.registry.len().await,
    }))
}

async fn read_body(body: Body, limit: usize) -> Result<Bytes, GatewayError> {
    body::to_bytes(body, limit).await.map_err(|e| {
        let inner = e.into_inner();
        let mut source: Option<&(dyn std::error::Error + 'static)> = Some(inner.as_ref());
        while let Some(err) = source {
            if err.is::<LengthLimitError>() {
                return GatewayError::PayloadTooLarge;
            }
            source = err.source();
        }
        GatewayError::BodyUnreadable(inner.to_string())
    })
}
