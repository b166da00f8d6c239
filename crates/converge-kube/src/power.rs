//! Hibernating and resuming Hive clusters
//!
//! A `ClusterDeployment` is put to sleep or woken up by setting
//! `spec.powerState`. The change goes through the resource helper as a merge
//! patch, so only that field is touched.

use serde_json::json;
use std::fmt;
use std::str::FromStr;

use crate::error::{KubeError, Result};
use crate::helper::{ObjectKey, ResourceHelper};

pub const CLUSTER_DEPLOYMENT_API_VERSION: &str = "hive.openshift.io/v1";
pub const CLUSTER_DEPLOYMENT_KIND: &str = "ClusterDeployment";

/// Desired power state of a cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Hibernating,
    Running,
}

impl PowerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerState::Hibernating => "Hibernating",
            PowerState::Running => "Running",
        }
    }

    /// Merge patch body setting `spec.powerState`
    pub fn patch(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&json!({"spec": {"powerState": self.as_str()}}))?)
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PowerState {
    type Err = KubeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Hibernating" => Ok(PowerState::Hibernating),
            "Running" => Ok(PowerState::Running),
            other => Err(KubeError::InvalidManifest(format!(
                "unknown power state '{other}': expected 'Hibernating' or 'Running'"
            ))),
        }
    }
}

/// Set the power state of the cluster deployment `key`
pub async fn set_power_state(helper: &ResourceHelper, key: &ObjectKey, state: PowerState) -> Result<()> {
    tracing::debug!(%key, state = %state, "setting power state");
    helper
        .patch(
            key,
            CLUSTER_DEPLOYMENT_KIND,
            CLUSTER_DEPLOYMENT_API_VERSION,
            &state.patch()?,
            "merge",
        )
        .await
}

/// Put the cluster to sleep
pub async fn hibernate(helper: &ResourceHelper, key: &ObjectKey) -> Result<()> {
    set_power_state(helper, key, PowerState::Hibernating).await
}

/// Wake the cluster up
pub async fn resume(helper: &ResourceHelper, key: &ObjectKey) -> Result<()> {
    set_power_state(helper, key, PowerState::Running).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PatchType;
    use crate::discovery::{DiscoveryCache, RestMapper};
    use crate::factory::Session;
    use crate::helper::LiveHelper;
    use crate::mock::{MockCluster, MockOp};
    use converge_core::Scheme;
    use std::sync::Arc;

    const CLUSTER: &[u8] = b"apiVersion: hive.openshift.io/v1
kind: ClusterDeployment
metadata:
  name: lab-1
  namespace: hive
spec:
  baseDomain: example.com
  clusterName: lab-1
";

    fn live(cluster: &MockCluster) -> ResourceHelper {
        let session = Session {
            api: Arc::new(cluster.clone()),
            mapper: RestMapper::new(Arc::new(DiscoveryCache::new(Arc::new(cluster.clone()), None))),
            namespace: "hive".to_string(),
            enforced: false,
        };
        ResourceHelper::Live(LiveHelper::with_session(session, Arc::new(Scheme::new())))
    }

    fn power_state(cluster: &MockCluster) -> Option<String> {
        cluster
            .object("hive.openshift.io/v1", "clusterdeployments", Some("hive"), "lab-1")
            .and_then(|cd| cd["spec"]["powerState"].as_str().map(str::to_string))
    }

    #[test]
    fn test_patch_body() {
        let body: serde_json::Value = serde_json::from_slice(&PowerState::Hibernating.patch().unwrap()).unwrap();
        assert_eq!(body, json!({"spec": {"powerState": "Hibernating"}}));
    }

    #[test]
    fn test_parse_power_state() {
        assert_eq!("Running".parse::<PowerState>().unwrap(), PowerState::Running);
        assert!("Off".parse::<PowerState>().is_err());
    }

    #[tokio::test]
    async fn test_hibernate_then_resume() {
        let cluster = MockCluster::new();
        let helper = live(&cluster);
        helper.apply(CLUSTER).await.unwrap();
        let key = ObjectKey::new(Some("hive"), "lab-1");

        hibernate(&helper, &key).await.unwrap();
        assert_eq!(power_state(&cluster).as_deref(), Some("Hibernating"));

        resume(&helper, &key).await.unwrap();
        assert_eq!(power_state(&cluster).as_deref(), Some("Running"));

        let stored = cluster
            .object("hive.openshift.io/v1", "clusterdeployments", Some("hive"), "lab-1")
            .unwrap();
        assert_eq!(stored["spec"]["baseDomain"], "example.com");

        let types: Vec<_> = cluster.patches().iter().map(|p| p.patch_type()).collect();
        assert_eq!(types, vec![PatchType::Merge, PatchType::Merge]);
    }

    #[tokio::test]
    async fn test_hibernate_missing_cluster() {
        let cluster = MockCluster::new();
        let err = hibernate(&live(&cluster), &ObjectKey::new(Some("hive"), "lab-9"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_resume_propagates_server_error() {
        let cluster = MockCluster::new();
        let helper = live(&cluster);
        helper.apply(CLUSTER).await.unwrap();
        cluster.fail_next(MockOp::Patch, 403, "Forbidden");

        let err = resume(&helper, &ObjectKey::new(Some("hive"), "lab-1"))
            .await
            .unwrap_err();
        assert!(matches!(err.root(), KubeError::Api(kube::Error::Api(resp)) if resp.code == 403));
        assert_eq!(power_state(&cluster), None);
    }

    #[tokio::test]
    async fn test_fake_helper_is_noop() {
        let helper = ResourceHelper::new(
            crate::helper::HelperConfig::new(crate::helper::Credentials::InCluster).fake(true),
        );
        hibernate(&helper, &ObjectKey::new(Some("hive"), "lab-1")).await.unwrap();
    }
}
