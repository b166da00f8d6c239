//! Converge Kube - Kubernetes integration for converge
//!
//! This crate provides:
//! - **Resource Helper**: Apply, create-or-update, create, patch, delete and info
//!   for single-resource manifests, with a fake variant for scale testing
//! - **Client Factory**: Clients built from a kubeconfig, a REST config or the
//!   in-cluster service account, with a namespace override
//! - **Discovery Cache**: Kind to resource mappings, cached on disk per server
//! - **Transport Metrics**: A composable layer tagging and counting requests
//!   per controller
//! - **Power State**: Hibernate and resume Hive cluster deployments
//! - **Mock Cluster**: In-memory API server for tests

pub mod api;
pub mod discovery;
pub mod error;
pub mod factory;
pub mod helper;
pub mod metrics;
pub mod mock;
pub mod patch;
pub mod power;

pub use api::{KubeResourceApi, PatchRequest, ResourceApi};
pub use discovery::{
    ClientDiscovery, DEFAULT_TTL, DiscoveryCache, DiscoverySource, RestMapper, RestMapping,
    sanitize_host,
};
pub use error::{KubeError, Result};
pub use factory::{ClientFactory, ConfigLoader, FactoryOptions, MetricsOptions, Session};
pub use helper::{
    Credentials, FAKE_APPLY_LATENCIES_MS, FakeHelper, HelperConfig, LiveHelper, ObjectKey,
    ResourceHelper, ResourceInfo,
};
pub use metrics::{
    ControllerMetrics, ControllerMetricsLayer, MetricKey, RequestMetrics, RequestStats,
    RequestTag, RequestTags, StatusClass, TransportChain, TransportService,
};
pub use mock::{MockCluster, MockOp, OperationCounts};
pub use patch::{LAST_APPLIED_ANNOTATION, PatchType};
pub use power::{PowerState, hibernate, resume, set_power_state};
