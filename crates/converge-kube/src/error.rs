//! Error types for converge-kube

use thiserror::Error;

/// Result type for converge-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur while reconciling resources
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API or transport error, kept verbatim
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Object does not exist
    #[error("{resource} '{name}' not found")]
    NotFound { resource: String, name: String },

    /// No REST mapping for the requested kind
    #[error("no matches for kind '{kind}' in version '{group_version}': {message}")]
    Discovery {
        group_version: String,
        kind: String,
        message: String,
    },

    /// Manifest did not hold exactly one resource
    #[error("expected exactly one resource in manifest, found {count}")]
    MalformedManifest { count: usize },

    /// Manifest is structurally unusable
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// Unsupported patch type
    #[error("invalid patch type '{0}': expected 'strategic', 'merge' or 'json'")]
    InvalidPatchType(String),

    /// Kubeconfig could not be read or resolved
    #[error("kubeconfig error: {0}")]
    Kubeconfig(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Manifest parsing or object serialization failed
    #[error(transparent)]
    Core(#[from] converge_core::CoreError),

    /// Failure annotated with the operation and resource it happened in
    #[error("failed to {operation} {resource}: {source}")]
    Operation {
        operation: &'static str,
        resource: String,
        #[source]
        source: Box<KubeError>,
    },
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for KubeError {
    fn from(e: serde_yaml::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<kube::config::KubeconfigError> for KubeError {
    fn from(e: kube::config::KubeconfigError) -> Self {
        KubeError::Kubeconfig(e.to_string())
    }
}

impl From<kube::config::InferConfigError> for KubeError {
    fn from(e: kube::config::InferConfigError) -> Self {
        KubeError::Kubeconfig(e.to_string())
    }
}

impl From<kube::config::InClusterError> for KubeError {
    fn from(e: kube::config::InClusterError) -> Self {
        KubeError::Kubeconfig(e.to_string())
    }
}

impl KubeError {
    /// Wrap with the operation and resource it happened in
    pub fn context(self, operation: &'static str, resource: impl Into<String>) -> Self {
        KubeError::Operation {
            operation,
            resource: resource.into(),
            source: Box::new(self),
        }
    }

    /// Innermost error, skipping context wrappers
    pub fn root(&self) -> &KubeError {
        match self {
            KubeError::Operation { source, .. } => source.root(),
            other => other,
        }
    }

    /// Check if this is a Kubernetes 404 Not Found error
    pub fn is_not_found(&self) -> bool {
        match self.root() {
            KubeError::NotFound { .. } => true,
            KubeError::Api(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }

    /// Check if this is a conflict error (409)
    pub fn is_conflict(&self) -> bool {
        matches!(self.root(), KubeError::Api(kube::Error::Api(resp)) if resp.code == 409)
    }
}

/// Attach operation context to a fallible result
pub(crate) trait ResultExt<T> {
    fn context(self, operation: &'static str, resource: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<KubeError>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, operation: &'static str, resource: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().context(operation, resource))
    }
}
