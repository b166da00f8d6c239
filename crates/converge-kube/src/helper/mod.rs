//! Resource helper
//!
//! Reconciles serialized manifests against the cluster. Two implementations
//! exist: [`LiveHelper`] talks to the API server, [`FakeHelper`] pretends to
//! for simulated scale testing. [`ResourceHelper`] picks one from the
//! configuration.
//!
//! # Example
//!
//! ```ignore
//! let helper = ResourceHelper::new(HelperConfig::new(Credentials::Kubeconfig(kubeconfig)));
//! match helper.apply(manifest).await? {
//!     ApplyResult::Created => println!("created"),
//!     result => println!("{result}"),
//! }
//! ```

mod fake;
mod live;

pub use fake::{FAKE_APPLY_LATENCIES_MS, FakeHelper};
pub use live::LiveHelper;

use converge_core::{ApplyResult, Manifest, Scheme, TypeMeta};
use kube::Config;
use kube::api::DynamicObject;
use kube::config::Kubeconfig;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::discovery::RestMapping;
use crate::error::{KubeError, Result};
use crate::factory::{FactoryOptions, MetricsOptions};
use crate::metrics::TransportChain;

/// How the helper authenticates
#[derive(Clone)]
pub enum Credentials {
    /// Parsed kubeconfig document; its current context is used
    Kubeconfig(Kubeconfig),
    /// Ready-made REST configuration, cloned before use
    RestConfig(Config),
    /// Service account of the current pod
    InCluster,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Kubeconfig(kc) => f
                .debug_tuple("Kubeconfig")
                .field(&kc.current_context)
                .finish(),
            Credentials::RestConfig(config) => f
                .debug_tuple("RestConfig")
                .field(&config.cluster_url)
                .finish(),
            Credentials::InCluster => f.write_str("InCluster"),
        }
    }
}

/// Helper configuration
#[derive(Debug, Clone)]
pub struct HelperConfig {
    pub credentials: Credentials,
    /// Namespace override; wins over the credentials' namespace
    pub namespace: Option<String>,
    /// Root of the on-disk discovery cache
    pub cache_dir: Option<PathBuf>,
    pub metrics: Option<MetricsOptions>,
    /// Never talk to the server
    pub fake: bool,
    pub scheme: Arc<Scheme>,
    pub transport: TransportChain,
}

impl HelperConfig {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            namespace: None,
            cache_dir: None,
            metrics: None,
            fake: false,
            scheme: Arc::new(Scheme::new()),
            transport: TransportChain::default(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsOptions) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_scheme(mut self, scheme: Arc<Scheme>) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn with_transport(mut self, transport: TransportChain) -> Self {
        self.transport = transport;
        self
    }

    pub fn fake(mut self, fake: bool) -> Self {
        self.fake = fake;
        self
    }

    pub(crate) fn factory_options(&self) -> FactoryOptions {
        FactoryOptions {
            cache_dir: self.cache_dir.clone(),
            metrics: self.metrics.clone(),
            transport: self.transport.clone(),
        }
    }
}

/// Namespace and name of an object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.filter(|ns| !ns.is_empty()).map(str::to_string),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Resolved identity of a manifest
#[derive(Debug, Clone)]
pub struct ResourceInfo {
    pub name: String,
    /// `None` for cluster-scoped kinds
    pub namespace: Option<String>,
    pub api_version: String,
    pub kind: String,
    /// Plural resource; empty when no discovery was done
    pub resource: String,
    pub mapping: Option<RestMapping>,
    pub object: DynamicObject,
}

impl ResourceInfo {
    /// `resource/name`, or `kind/name` without discovery
    pub fn describe(&self) -> String {
        let what = if self.resource.is_empty() {
            self.kind.to_lowercase()
        } else {
            self.resource.clone()
        };
        match &self.namespace {
            Some(ns) => format!("{what}/{} in namespace {ns}", self.name),
            None => format!("{what}/{}", self.name),
        }
    }

    /// The object as untyped JSON
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(&self.object)?)
    }
}

/// Single-document manifest split into its identity
pub(crate) struct ParsedManifest {
    pub document: Value,
    pub type_meta: TypeMeta,
    pub name: String,
    pub namespace: Option<String>,
}

pub(crate) fn parse_single(manifest: &[u8]) -> Result<ParsedManifest> {
    let mut documents = Manifest::new(manifest).documents()?;
    if documents.len() != 1 {
        return Err(KubeError::MalformedManifest {
            count: documents.len(),
        });
    }
    let document = documents.remove(0);

    let type_meta = TypeMeta::from_value(&document)
        .ok_or_else(|| KubeError::InvalidManifest("missing apiVersion or kind".to_string()))?;
    let name = document
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| KubeError::InvalidManifest("missing metadata.name".to_string()))?
        .to_string();
    let namespace = document
        .pointer("/metadata/namespace")
        .and_then(Value::as_str)
        .filter(|ns| !ns.is_empty())
        .map(str::to_string);

    Ok(ParsedManifest {
        document,
        type_meta,
        name,
        namespace,
    })
}

/// Live or fake helper, chosen at construction
pub enum ResourceHelper {
    Live(LiveHelper),
    Fake(FakeHelper),
}

impl ResourceHelper {
    pub fn new(config: HelperConfig) -> Self {
        if config.fake {
            tracing::debug!("using fake resource helper");
            ResourceHelper::Fake(FakeHelper::new(config.scheme.clone(), config.namespace.clone()))
        } else {
            ResourceHelper::Live(LiveHelper::new(config))
        }
    }

    pub fn is_fake(&self) -> bool {
        matches!(self, ResourceHelper::Fake(_))
    }

    /// Identity of a single-resource manifest
    pub async fn info(&self, manifest: &[u8]) -> Result<ResourceInfo> {
        match self {
            ResourceHelper::Live(h) => h.info(manifest).await,
            ResourceHelper::Fake(h) => h.info(manifest),
        }
    }

    /// Create the object or three-way patch it towards the manifest
    pub async fn apply(&self, manifest: &[u8]) -> Result<ApplyResult> {
        match self {
            ResourceHelper::Live(h) => h.apply(manifest).await,
            ResourceHelper::Fake(h) => h.apply(manifest).await,
        }
    }

    pub async fn apply_object<T: Serialize + 'static>(&self, object: &T) -> Result<ApplyResult> {
        match self {
            ResourceHelper::Live(h) => h.apply_object(object).await,
            ResourceHelper::Fake(h) => h.apply_object(object).await,
        }
    }

    /// Create the object, or send the computed patch even when empty
    pub async fn create_or_update(&self, manifest: &[u8]) -> Result<ApplyResult> {
        match self {
            ResourceHelper::Live(h) => h.create_or_update(manifest).await,
            ResourceHelper::Fake(h) => h.create_or_update(manifest),
        }
    }

    pub async fn create_or_update_object<T: Serialize + 'static>(&self, object: &T) -> Result<ApplyResult> {
        match self {
            ResourceHelper::Live(h) => h.create_or_update_object(object).await,
            ResourceHelper::Fake(h) => h.create_or_update_object(object),
        }
    }

    /// Create the object unless it already exists
    pub async fn create(&self, manifest: &[u8]) -> Result<ApplyResult> {
        match self {
            ResourceHelper::Live(h) => h.create(manifest).await,
            ResourceHelper::Fake(h) => h.create(manifest),
        }
    }

    pub async fn create_object<T: Serialize + 'static>(&self, object: &T) -> Result<ApplyResult> {
        match self {
            ResourceHelper::Live(h) => h.create_object(object).await,
            ResourceHelper::Fake(h) => h.create_object(object),
        }
    }

    /// Delete an object; a missing object is not an error
    pub async fn delete(&self, api_version: &str, kind: &str, namespace: Option<&str>, name: &str) -> Result<()> {
        match self {
            ResourceHelper::Live(h) => h.delete(api_version, kind, namespace, name).await,
            ResourceHelper::Fake(h) => h.delete(api_version, kind, namespace, name),
        }
    }

    /// Patch an object; `kind` may also be a plural, singular or short name
    pub async fn patch(
        &self,
        key: &ObjectKey,
        kind: &str,
        api_version: &str,
        patch: &[u8],
        patch_type: &str,
    ) -> Result<()> {
        match self {
            ResourceHelper::Live(h) => h.patch(key, kind, api_version, patch, patch_type).await,
            ResourceHelper::Fake(h) => h.patch(key, kind, api_version, patch, patch_type),
        }
    }
}
