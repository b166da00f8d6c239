//! Global flags and the helper they configure

use clap::Args;
use converge_kube::{Credentials, HelperConfig, KubeError, MetricsOptions, RequestMetrics, ResourceHelper};
use kube::config::Kubeconfig;
use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::{CliError, Result};

/// Flags shared by every command
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Kubeconfig file(s); falls back to ~/.kube/config, then in-cluster credentials
    #[arg(long, global = true, env = "KUBECONFIG")]
    pub kubeconfig: Option<OsString>,

    /// Namespace override; manifests naming another namespace are rejected
    #[arg(short, long, global = true, env = "CONVERGE_NAMESPACE")]
    pub namespace: Option<String>,

    /// Root of the discovery cache (default: home directory)
    #[arg(long, global = true, env = "CONVERGE_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Never contact a cluster; apply sleeps for a sampled latency
    #[arg(long, global = true, env = "CONVERGE_FAKE")]
    pub fake: bool,

    /// Record API requests under this controller name
    #[arg(long, global = true)]
    pub controller: Option<String>,

    /// Tag recorded requests as targeting a remote cluster
    #[arg(long, global = true, requires = "controller")]
    pub remote: bool,

    /// Enable debug output
    #[arg(long, global = true)]
    pub debug: bool,
}

/// What a command runs against
pub struct Context {
    pub helper: ResourceHelper,
    pub metrics: Option<RequestMetrics>,
}

impl Context {
    pub fn new(args: &GlobalArgs) -> Result<Self> {
        let credentials = if args.fake {
            // not used by the fake helper
            Credentials::InCluster
        } else {
            load_credentials(args.kubeconfig.as_ref())?
        };

        let mut config = HelperConfig::new(credentials).fake(args.fake);
        if let Some(ns) = args.namespace.as_deref().filter(|ns| !ns.is_empty()) {
            config = config.with_namespace(ns);
        }
        if let Some(dir) = args.cache_dir.clone().or_else(dirs::home_dir) {
            config = config.with_cache_dir(dir);
        }

        let mut metrics = None;
        if let Some(controller) = &args.controller {
            let registry = RequestMetrics::new();
            config = config.with_metrics(MetricsOptions::new(controller.clone(), args.remote, registry.clone()));
            metrics = Some(registry);
        }

        tracing::debug!(
            fake = config.fake,
            credentials = ?config.credentials,
            cache_dir = ?config.cache_dir,
            "helper configured"
        );

        Ok(Self {
            helper: ResourceHelper::new(config),
            metrics,
        })
    }

    /// Log the requests recorded for the controller, if any
    pub fn report_metrics(&self) {
        let Some(registry) = &self.metrics else {
            return;
        };
        for (key, stats) in registry.snapshot() {
            tracing::info!(
                controller = %key.controller,
                remote = key.remote,
                method = %key.method,
                status = %key.status,
                count = stats.count,
                errors = stats.errors,
                total_latency_ms = stats.total_latency.as_millis() as u64,
                "controller requests"
            );
        }
    }
}

fn load_credentials(kubeconfig: Option<&OsString>) -> Result<Credentials> {
    let paths: Vec<PathBuf> = match kubeconfig {
        Some(value) => std::env::split_paths(value)
            .filter(|p| !p.as_os_str().is_empty())
            .collect(),
        None => dirs::home_dir()
            .map(|home| home.join(".kube").join("config"))
            .filter(|path| path.exists())
            .into_iter()
            .collect(),
    };

    if paths.is_empty() {
        tracing::debug!("no kubeconfig found, using in-cluster credentials");
        return Ok(Credentials::InCluster);
    }

    let mut merged = Kubeconfig::default();
    for path in &paths {
        let next = Kubeconfig::read_from(path).map_err(KubeError::from)?;
        merged = merged.merge(next).map_err(KubeError::from)?;
    }
    if merged.current_context.is_none() {
        return Err(CliError::config(format!(
            "no current-context in {}",
            paths
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }
    Ok(Credentials::Kubeconfig(merged))
}

/// Manifest bytes from a file, or stdin for `-`
pub fn read_manifest(path: &Path) -> Result<Vec<u8>> {
    if path == Path::new("-") {
        let mut buf = Vec::new();
        std::io::stdin().read_to_end(&mut buf)?;
        return Ok(buf);
    }
    std::fs::read(path).map_err(|e| CliError::Io {
        message: format!("{}: {e}", path.display()),
    })
}
