//! Client construction
//!
//! A [`ClientFactory`] turns credentials into everything an operation needs:
//! the REST configuration, the effective namespace, a `kube::Client` with the
//! transport wrappers installed, and the discovery cache.

use kube::Client;
use kube::client::ClientBuilder;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Config;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use crate::api::{KubeResourceApi, ResourceApi};
use crate::discovery::{ClientDiscovery, DiscoveryCache, RestMapper};
use crate::error::Result;
use crate::metrics::{ControllerMetricsLayer, RequestMetrics, TransportChain};

/// Controller metrics wrapper settings
#[derive(Debug, Clone)]
pub struct MetricsOptions {
    /// Controller name the requests are attributed to
    pub controller: String,
    /// Tag requests as targeting a remote cluster
    pub remote: bool,
    pub registry: RequestMetrics,
}

impl MetricsOptions {
    pub fn new(controller: impl Into<String>, remote: bool, registry: RequestMetrics) -> Self {
        Self {
            controller: controller.into(),
            remote,
            registry,
        }
    }
}

/// Settings shared by both factory constructors
#[derive(Debug, Clone, Default)]
pub struct FactoryOptions {
    /// Root of the on-disk discovery cache; `None` keeps it in memory
    pub cache_dir: Option<PathBuf>,
    pub metrics: Option<MetricsOptions>,
    /// Wrappers installed before the metrics wrapper
    pub transport: TransportChain,
}

/// Effective namespace of a factory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigLoader {
    namespace: String,
    enforced: bool,
}

impl ConfigLoader {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The namespace was set explicitly rather than taken from the credentials
    pub fn enforced(&self) -> bool {
        self.enforced
    }
}

/// Everything an operation talks to
#[derive(Clone)]
pub struct Session {
    pub api: Arc<dyn ResourceApi>,
    pub mapper: RestMapper,
    pub namespace: String,
    pub enforced: bool,
}

/// Builds clients and discovery for one set of credentials
pub struct ClientFactory {
    config: Config,
    loader: ConfigLoader,
    cache_dir: Option<PathBuf>,
    transport: TransportChain,
    client: Client,
    discovery: OnceLock<Arc<DiscoveryCache>>,
}

impl ClientFactory {
    /// Factory for the current context of a kubeconfig document
    pub async fn from_kubeconfig(
        kubeconfig: &Kubeconfig,
        namespace: Option<&str>,
        options: &FactoryOptions,
    ) -> Result<Self> {
        let config =
            Config::from_custom_kubeconfig(kubeconfig.clone(), &KubeConfigOptions::default()).await?;
        Self::build(config, namespace, options, None)
    }

    /// Factory for an in-memory REST configuration.
    ///
    /// The caller's configuration and transport chain are cloned, never
    /// modified. Metrics are always tagged as local.
    pub fn from_rest_config(config: &Config, namespace: Option<&str>, options: &FactoryOptions) -> Result<Self> {
        Self::build(config.clone(), namespace, options, Some(false))
    }

    /// Factory for the service account of the current pod
    pub fn in_cluster(namespace: Option<&str>, options: &FactoryOptions) -> Result<Self> {
        let config = Config::incluster()?;
        Self::build(config, namespace, options, None)
    }

    fn build(
        mut config: Config,
        namespace: Option<&str>,
        options: &FactoryOptions,
        remote_override: Option<bool>,
    ) -> Result<Self> {
        let loader = match namespace.filter(|ns| !ns.is_empty()) {
            Some(ns) => {
                config.default_namespace = ns.to_string();
                ConfigLoader {
                    namespace: ns.to_string(),
                    enforced: true,
                }
            }
            None => ConfigLoader {
                namespace: config.default_namespace.clone(),
                enforced: false,
            },
        };

        let mut transport = options.transport.clone();
        if let Some(metrics) = &options.metrics {
            let remote = remote_override.unwrap_or(metrics.remote);
            transport.push_metrics(ControllerMetricsLayer::new(
                metrics.controller.clone(),
                remote,
                metrics.registry.clone(),
            ));
        }

        let client = ClientBuilder::try_from(config.clone())?
            .with_layer(&transport)
            .build();

        tracing::debug!(
            server = %config.cluster_url,
            namespace = loader.namespace(),
            enforced = loader.enforced(),
            wrappers = transport.len(),
            "client factory ready"
        );

        Ok(Self {
            config,
            loader,
            cache_dir: options.cache_dir.clone(),
            transport,
            client,
            discovery: OnceLock::new(),
        })
    }

    pub fn rest_config(&self) -> &Config {
        &self.config
    }

    pub fn config_loader(&self) -> &ConfigLoader {
        &self.loader
    }

    pub fn transport(&self) -> &TransportChain {
        &self.transport
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    /// Discovery cache for this server, created on first use
    pub fn discovery(&self) -> Arc<DiscoveryCache> {
        self.discovery
            .get_or_init(|| {
                let source = ClientDiscovery::new(self.client.clone(), self.config.cluster_url.to_string());
                Arc::new(DiscoveryCache::new(Arc::new(source), self.cache_dir.as_deref()))
            })
            .clone()
    }

    pub fn rest_mapper(&self) -> RestMapper {
        RestMapper::new(self.discovery())
    }

    pub fn resource_api(&self) -> Arc<dyn ResourceApi> {
        Arc::new(KubeResourceApi::new(self.client.clone()))
    }

    pub fn session(&self) -> Session {
        Session {
            api: self.resource_api(),
            mapper: self.rest_mapper(),
            namespace: self.loader.namespace.clone(),
            enforced: self.loader.enforced,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
current-context: lab
clusters:
  - name: lab
    cluster:
      server: https://api.lab-1.example.com:6443
contexts:
  - name: lab
    context:
      cluster: lab
      user: admin
      namespace: hive
users:
  - name: admin
    user:
      token: not-a-real-token
"#;

    fn rest_config() -> Config {
        let mut config = Config::new("https://127.0.0.1:6443".parse().unwrap());
        config.default_namespace = "default".to_string();
        config
    }

    #[tokio::test]
    async fn test_kubeconfig_namespace_from_context() {
        let kubeconfig = Kubeconfig::from_yaml(KUBECONFIG).unwrap();
        let factory = ClientFactory::from_kubeconfig(&kubeconfig, None, &FactoryOptions::default())
            .await
            .unwrap();

        assert_eq!(factory.config_loader().namespace(), "hive");
        assert!(!factory.config_loader().enforced());
        assert!(
            factory
                .rest_config()
                .cluster_url
                .to_string()
                .starts_with("https://api.lab-1.example.com:6443")
        );
    }

    #[tokio::test]
    async fn test_namespace_override_is_enforced() {
        let kubeconfig = Kubeconfig::from_yaml(KUBECONFIG).unwrap();
        let factory = ClientFactory::from_kubeconfig(&kubeconfig, Some("lab-1"), &FactoryOptions::default())
            .await
            .unwrap();

        assert_eq!(factory.config_loader().namespace(), "lab-1");
        assert!(factory.config_loader().enforced());
        assert_eq!(factory.rest_config().default_namespace, "lab-1");
        assert_eq!(factory.session().namespace, "lab-1");
    }

    #[tokio::test]
    async fn test_rest_config_is_not_mutated() {
        let config = rest_config();
        let mut options = FactoryOptions::default();
        options.metrics = Some(MetricsOptions::new("hibernation", true, RequestMetrics::new()));

        let factory = ClientFactory::from_rest_config(&config, Some("other"), &options).unwrap();

        assert_eq!(config.default_namespace, "default");
        assert_eq!(factory.rest_config().default_namespace, "other");
        assert!(options.transport.is_empty());
        assert_eq!(factory.transport().names(), vec!["controller-metrics:hibernation"]);
    }

    #[tokio::test]
    async fn test_metrics_compose_over_existing_chain() {
        let registry = RequestMetrics::new();
        let mut options = FactoryOptions::default();
        options
            .transport
            .push_metrics(ControllerMetricsLayer::new("outer-service", false, registry.clone()));
        options.metrics = Some(MetricsOptions::new("clusterdeployment", false, registry));

        let factory = ClientFactory::from_rest_config(&rest_config(), None, &options).unwrap();
        assert_eq!(
            factory.transport().names(),
            vec!["controller-metrics:outer-service", "controller-metrics:clusterdeployment"]
        );
        assert_eq!(factory.config_loader().namespace(), "default");
    }

    #[tokio::test]
    async fn test_discovery_is_shared() {
        let factory = ClientFactory::from_rest_config(&rest_config(), None, &FactoryOptions::default()).unwrap();
        let a = factory.discovery();
        let b = factory.discovery();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.host().starts_with("https://127.0.0.1:6443"));
    }
}
