//! Fan-out of a virtual route to its targets.
//!
//! Every target is rendered against the inbound payload and sent
//! concurrently, up to a configurable number in flight. Outcomes are folded
//! into the result map in declaration order, so when two targets render to
//! the same `METHOD::url` the later declared one wins regardless of which
//! response arrived first.

mod client;

pub use self::client::ReqwestClient;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream::{self, StreamExt};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::error::GatewayError;
use crate::registry::{RegistryKey, RouteDefinition, TargetTemplate};
use crate::template;

/// A rendered request ready to be sent to a target.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<String>,
}

/// What came back from a target.
#[derive(Debug, Clone)]
pub struct OutboundResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// Sends rendered requests to targets.
#[async_trait]
pub trait TargetClient: Send + Sync + std::fmt::Debug {
    /// Errors are transport failures; any HTTP status is a response.
    async fn send(&self, request: OutboundRequest) -> Result<OutboundResponse, GatewayError>;
}

/// Result of one target call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetOutcome {
    pub status: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TargetOutcome {
    /// Outcome for a target that never produced a response.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            body: None,
            error: Some(error.into()),
        }
    }

    pub fn from_response(response: OutboundResponse) -> Self {
        let status = response.status;
        let mut error = (!status.is_success()).then(|| status_text(status));

        let body = if response.body.is_empty() {
            None
        } else if is_json(response.content_type.as_deref()) {
            match serde_json::from_slice(&response.body) {
                Ok(value) => Some(value),
                Err(e) => {
                    error.get_or_insert_with(|| format!("Invalid JSON response body: {e}"));
                    Some(Value::String(
                        String::from_utf8_lossy(&response.body).into_owned(),
                    ))
                }
            }
        } else {
            Some(Value::String(
                String::from_utf8_lossy(&response.body).into_owned(),
            ))
        };

        Self {
            status: status.as_u16(),
            body,
            error,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

fn status_text(status: StatusCode) -> String {
    status
        .canonical_reason()
        .map_or_else(|| status.as_str().to_owned(), str::to_owned)
}

fn is_json(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("application/json"))
}

/// Aggregated outcomes of one fan-out, keyed by `METHOD::url`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FanOutReport {
    outcomes: IndexMap<String, TargetOutcome>,
}

impl FanOutReport {
    /// `502 Bad Gateway` if any target failed, `200 OK` otherwise.
    pub fn status(&self) -> StatusCode {
        if self.outcomes.values().any(TargetOutcome::is_error) {
            StatusCode::BAD_GATEWAY
        } else {
            StatusCode::OK
        }
    }

    pub fn outcomes(&self) -> &IndexMap<String, TargetOutcome> {
        &self.outcomes
    }

    pub fn get(&self, key: &str) -> Option<&TargetOutcome> {
        self.outcomes.get(key)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

impl IntoResponse for FanOutReport {
    fn into_response(self) -> Response {
        (self.status(), Json(self.outcomes)).into_response()
    }
}

/// Default cap on target calls in flight for one fan-out.
pub const DEFAULT_MAX_CONCURRENT_TARGETS: usize = 64;

/// Renders and sends the targets of a route definition.
#[derive(Debug, Clone)]
pub struct FanOut {
    client: Arc<dyn TargetClient>,
    max_concurrent: usize,
}

impl FanOut {
    pub fn new(client: Arc<dyn TargetClient>) -> Self {
        Self {
            client,
            max_concurrent: DEFAULT_MAX_CONCURRENT_TARGETS,
        }
    }

    /// Caps how many targets of one fan-out are called at once. Zero is
    /// treated as one.
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub async fn dispatch(&self, route: &RouteDefinition, context: &Value) -> FanOutReport {
        let targets = route.targets();

        // `buffered` yields results in input order, not completion order.
        let calls: Vec<_> = targets
            .iter()
            .map(|target| self.call_target(target, context))
            .collect();
        let results: Vec<_> = stream::iter(calls)
            .buffered(self.max_concurrent)
            .collect()
            .await;

        let mut outcomes = IndexMap::with_capacity(results.len());
        for (key, outcome) in results {
            outcomes.insert(key.into_string(), outcome);
        }

        FanOutReport { outcomes }
    }

    async fn call_target(
        &self,
        target: &TargetTemplate,
        context: &Value,
    ) -> (RegistryKey, TargetOutcome) {
        let url = match template::render(&target.url, context) {
            Ok(url) => url,
            Err(e) => {
                let key = RegistryKey::new(&target.method, &target.url);
                tracing::warn!(target_key = %key, error = %e, "Target URL template failed to render");
                return (key, TargetOutcome::failed(GatewayError::from(e).to_string()));
            }
        };

        let key = RegistryKey::new(&target.method, &url);

        let request = match build_request(target, url, context) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(target_key = %key, error = %e, "Target request could not be built");
                return (key, TargetOutcome::failed(e.to_string()));
            }
        };

        let outcome = match self.client.send(request).await {
            Ok(response) => TargetOutcome::from_response(response),
            Err(e) => {
                tracing::warn!(target_key = %key, error = %e, "Target request failed");
                TargetOutcome::failed(e.to_string())
            }
        };

        tracing::debug!(target_key = %key, status = outcome.status, "Target completed");
        (key, outcome)
    }
}

fn build_request(
    target: &TargetTemplate,
    url: String,
    context: &Value,
) -> Result<OutboundRequest, GatewayError> {
    let method = Method::from_bytes(target.method.to_ascii_uppercase().as_bytes())
        .map_err(|_| GatewayError::RequestBuildFailed(format!("invalid method {:?}", target.method)))?;

    let headers = match &target.headers {
        Some(templates) => {
            let rendered = render_json(templates, context)?;
            let parsed: BTreeMap<String, String> = serde_json::from_str(&rendered).map_err(|e| {
                GatewayError::RequestBuildFailed(format!("rendered headers are not valid: {e}"))
            })?;
            header_map(parsed)?
        }
        None => HeaderMap::new(),
    };

    let body = target
        .body
        .as_ref()
        .map(|body| render_json(body, context))
        .transpose()?;

    Ok(OutboundRequest {
        method,
        url,
        headers,
        body,
    })
}

/// Serialises `value` to JSON and renders the result as a template.
fn render_json<T: Serialize>(value: &T, context: &Value) -> Result<String, GatewayError> {
    let source = serde_json::to_string(value)
        .map_err(|e| GatewayError::RequestBuildFailed(e.to_string()))?;
    Ok(template::render(&source, context)?)
}

fn header_map(headers: BTreeMap<String, String>) -> Result<HeaderMap, GatewayError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
            GatewayError::RequestBuildFailed(format!("invalid header name {name:?}"))
        })?;
        let value = HeaderValue::from_str(&value).map_err(|_| {
            GatewayError::RequestBuildFailed(format!("invalid value for header {name}"))
        })?;
        map.insert(name, value);
    }
    Ok(map)
}
