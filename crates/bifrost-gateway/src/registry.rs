//! Virtual route definitions and the registry that owns them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bifrost_store::{CorruptPolicy, SnapshotBackend, Store, StoreError};
use http::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GatewayError;

/// Path prefix of the management API.
pub const MANAGEMENT_PREFIX: &str = "/bifrost/";

/// Canonical `METHOD::path` identifier.
///
/// The method is uppercased and the path is kept as given, without a leading
/// slash. Registration, lookup and fan-out result keys are all built here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistryKey(String);

impl RegistryKey {
    pub fn new(method: &str, path: &str) -> Self {
        Self(format!("{}::{path}", method.to_ascii_uppercase()))
    }

    /// Key for an inbound request, built from its method and URI path.
    pub fn for_request(method: &Method, path: &str) -> Self {
        Self::new(method.as_str(), path.strip_prefix('/').unwrap_or(path))
    }

    /// Key named by a management URL, `/bifrost/{method}/{path...}`.
    ///
    /// The path is everything after the first slash following the method and
    /// may be empty (`/bifrost/GET/` names the root). Returns `None` for URLs
    /// outside the management prefix or without a valid method segment.
    pub fn from_management_path(path: &str) -> Option<Self> {
        let rest = path.strip_prefix(MANAGEMENT_PREFIX)?;
        let (method, route_path) = rest.split_once('/')?;
        let method = Method::from_bytes(method.as_bytes()).ok()?;
        Some(Self::new(method.as_str(), route_path))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for RegistryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A virtual route: an optional access token and the targets it fans out to.
///
/// The registry keeps the document exactly as the caller sent it, unknown
/// fields included, and serialises back to it. The typed view is parsed from
/// that document and is read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct RouteDefinition {
    authorization: Option<String>,
    targets: Vec<TargetTemplate>,
    document: Value,
}

#[derive(Deserialize)]
struct RouteFields {
    #[serde(default)]
    authorization: Option<String>,

    #[serde(rename = "routes", alias = "targets")]
    targets: Vec<TargetTemplate>,
}

impl TryFrom<Value> for RouteDefinition {
    type Error = serde_json::Error;

    fn try_from(document: Value) -> Result<Self, Self::Error> {
        let fields = RouteFields::deserialize(&document)?;
        Ok(Self {
            authorization: fields.authorization,
            targets: fields.targets,
            document,
        })
    }
}

impl From<RouteDefinition> for Value {
    fn from(definition: RouteDefinition) -> Self {
        definition.document
    }
}

impl RouteDefinition {
    /// Targets, in declaration order.
    pub fn targets(&self) -> &[TargetTemplate] {
        &self.targets
    }

    /// The token callers must present, if the route is protected.
    pub fn required_token(&self) -> Option<&str> {
        self.authorization.as_deref().filter(|token| !token.is_empty())
    }

    /// The definition as it was registered.
    pub fn document(&self) -> &Value {
        &self.document
    }
}

/// One outbound request template.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TargetTemplate {
    pub url: String,

    #[serde(default = "default_method")]
    pub method: String,

    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,

    #[serde(default)]
    pub body: Option<Value>,
}

fn default_method() -> String {
    Method::GET.as_str().to_owned()
}

/// Route definitions keyed by [`RegistryKey`], persisted on every change.
#[derive(Debug)]
pub struct RouteRegistry {
    store: Store<RouteDefinition>,
}

impl RouteRegistry {
    /// Name of the durable resource backing the registry.
    pub const STORE_NAME: &'static str = "routes";

    pub fn new(store: Store<RouteDefinition>) -> Self {
        Self { store }
    }

    pub async fn open(
        backend: Arc<dyn SnapshotBackend>,
        policy: CorruptPolicy,
    ) -> Result<Self, StoreError> {
        Ok(Self::new(Store::open(backend, policy).await?))
    }

    pub async fn get(&self, key: &RegistryKey) -> Option<RouteDefinition> {
        self.store.get(key.as_str()).await
    }

    pub async fn contains(&self, key: &RegistryKey) -> bool {
        self.store.contains_key(key.as_str()).await
    }

    pub async fn len(&self) -> usize {
        self.store.len().await
    }

    pub async fn is_empty(&self) -> bool {
        self.store.is_empty().await
    }

    pub async fn create(
        &self,
        key: &RegistryKey,
        definition: RouteDefinition,
    ) -> Result<RouteDefinition, GatewayError> {
        if !self
            .store
            .insert_if_absent(key.as_str(), definition.clone())
            .await?
        {
            return Err(GatewayError::Conflict(key.to_string()));
        }

        tracing::info!(route_key = %key, targets = definition.targets().len(), "Route created");
        Ok(definition)
    }

    pub async fn read(&self, key: &RegistryKey) -> Result<RouteDefinition, GatewayError> {
        self.get(key)
            .await
            .ok_or_else(|| GatewayError::NotFound(key.to_string()))
    }

    pub async fn replace(
        &self,
        key: &RegistryKey,
        definition: RouteDefinition,
    ) -> Result<RouteDefinition, GatewayError> {
        self.store
            .replace_if_present(key.as_str(), definition.clone())
            .await?
            .ok_or_else(|| GatewayError::NotFound(key.to_string()))?;

        tracing::info!(route_key = %key, targets = definition.targets().len(), "Route replaced");
        Ok(definition)
    }

    pub async fn delete(&self, key: &RegistryKey) -> Result<RouteDefinition, GatewayError> {
        let removed = self
            .store
            .delete(key.as_str())
            .await?
            .ok_or_else(|| GatewayError::NotFound(key.to_string()))?;

        tracing::info!(route_key = %key, "Route deleted");
        Ok(removed)
    }
}
