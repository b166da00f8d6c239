//! Helper that never talks to a cluster
//!
//! Used for simulated scale testing: `apply` sleeps for a latency drawn from
//! a table shaped like real API server round trips and reports `configured`.
//! Everything else returns immediately.

use converge_core::{ApplyResult, Scheme, Serializer};
use kube::api::DynamicObject;
use rand::seq::IndexedRandom;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use super::{ObjectKey, ResourceInfo, parse_single};
use crate::error::Result;

/// Apply latencies in milliseconds, sampled uniformly
pub const FAKE_APPLY_LATENCIES_MS: [u64; 10] = [27, 27, 27, 27, 27, 45, 45, 45, 53, 230];

#[derive(Debug, Clone)]
pub struct FakeHelper {
    scheme: Arc<Scheme>,
    namespace: Option<String>,
}

impl FakeHelper {
    pub fn new(scheme: Arc<Scheme>, namespace: Option<String>) -> Self {
        Self { scheme, namespace }
    }

    pub fn sample_latency() -> Duration {
        let ms = FAKE_APPLY_LATENCIES_MS
            .choose(&mut rand::rng())
            .copied()
            .unwrap_or(FAKE_APPLY_LATENCIES_MS[0]);
        Duration::from_millis(ms)
    }

    /// Identity parsed from the manifest alone
    pub fn info(&self, manifest: &[u8]) -> Result<ResourceInfo> {
        let parsed = parse_single(manifest)?;
        let namespace = parsed.namespace.or_else(|| self.namespace.clone());
        let object: DynamicObject = serde_json::from_value(parsed.document)?;
        Ok(ResourceInfo {
            name: parsed.name,
            namespace,
            api_version: parsed.type_meta.api_version,
            kind: parsed.type_meta.kind,
            resource: String::new(),
            mapping: None,
            object,
        })
    }

    pub async fn apply(&self, manifest: &[u8]) -> Result<ApplyResult> {
        let latency = Self::sample_latency();
        tracing::debug!(
            bytes = manifest.len(),
            sleep_ms = latency.as_millis() as u64,
            "fake apply"
        );
        tokio::time::sleep(latency).await;
        Ok(ApplyResult::Configured)
    }

    pub async fn apply_object<T: Serialize + 'static>(&self, object: &T) -> Result<ApplyResult> {
        let data = Serializer::default().serialize(object, &self.scheme)?;
        self.apply(&data).await
    }

    pub fn create_or_update(&self, _manifest: &[u8]) -> Result<ApplyResult> {
        Ok(ApplyResult::Configured)
    }

    pub fn create_or_update_object<T: Serialize + 'static>(&self, object: &T) -> Result<ApplyResult> {
        let data = Serializer::default().serialize(object, &self.scheme)?;
        self.create_or_update(&data)
    }

    pub fn create(&self, _manifest: &[u8]) -> Result<ApplyResult> {
        Ok(ApplyResult::Configured)
    }

    pub fn create_object<T: Serialize + 'static>(&self, object: &T) -> Result<ApplyResult> {
        let data = Serializer::default().serialize(object, &self.scheme)?;
        self.create(&data)
    }

    pub fn delete(&self, api_version: &str, kind: &str, namespace: Option<&str>, name: &str) -> Result<()> {
        tracing::debug!(api_version, kind, namespace, name, "fake delete");
        Ok(())
    }

    pub fn patch(
        &self,
        key: &ObjectKey,
        kind: &str,
        api_version: &str,
        _patch: &[u8],
        patch_type: &str,
    ) -> Result<()> {
        tracing::debug!(%key, kind, api_version, patch_type, "fake patch");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KubeError;
    use std::time::Instant;

    const CONFIGMAP: &[u8] = b"apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: lab-1-settings\n";

    fn helper() -> FakeHelper {
        FakeHelper::new(Arc::new(Scheme::new()), Some("hive".to_string()))
    }

    #[test]
    fn test_sample_latency_in_table() {
        for _ in 0..200 {
            let ms = FakeHelper::sample_latency().as_millis() as u64;
            assert!(FAKE_APPLY_LATENCIES_MS.contains(&ms), "unexpected latency {ms}");
        }
    }

    #[tokio::test]
    async fn test_apply_sleeps_and_configures() {
        let start = Instant::now();
        assert_eq!(helper().apply(CONFIGMAP).await.unwrap(), ApplyResult::Configured);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(27));
        // slowest entry plus room for a busy scheduler
        assert!(elapsed < Duration::from_millis(230 + 500), "took {elapsed:?}");
    }

    #[derive(Serialize)]
    struct Gizmo {
        name: String,
    }

    #[tokio::test]
    async fn test_object_variants_require_registration() {
        let gizmo = Gizmo { name: "a".into() };
        let helper = helper();

        let err = helper.apply_object(&gizmo).await.unwrap_err();
        assert!(matches!(err, KubeError::Core(_)));
        assert!(matches!(helper.create_object(&gizmo), Err(KubeError::Core(_))));
        assert!(matches!(
            helper.create_or_update_object(&gizmo),
            Err(KubeError::Core(_))
        ));

        let registered = FakeHelper::new(
            Arc::new(Scheme::new().with::<Gizmo>("example.io/v1", "Gizmo")),
            None,
        );
        assert_eq!(registered.create_object(&gizmo).unwrap(), ApplyResult::Configured);
        assert_eq!(
            registered.create_or_update_object(&gizmo).unwrap(),
            ApplyResult::Configured
        );
    }

    #[test]
    fn test_info_without_cluster() {
        let info = helper().info(CONFIGMAP).unwrap();
        assert_eq!(info.name, "lab-1-settings");
        assert_eq!(info.namespace.as_deref(), Some("hive"));
        assert_eq!(info.kind, "ConfigMap");
        assert!(info.mapping.is_none());
        assert_eq!(info.describe(), "configmap/lab-1-settings in namespace hive");

        let other = helper()
            .info(b"apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n  namespace: other\n")
            .unwrap();
        assert_eq!(other.namespace.as_deref(), Some("other"));
    }

    #[test]
    fn test_info_multi_document() {
        let two = [CONFIGMAP, b"---\n".as_slice(), CONFIGMAP].concat();
        assert!(matches!(
            helper().info(&two),
            Err(KubeError::MalformedManifest { count: 2 })
        ));
    }

    #[test]
    fn test_writes_are_noops() {
        let helper = helper();
        assert_eq!(helper.create(CONFIGMAP).unwrap(), ApplyResult::Configured);
        assert_eq!(helper.create_or_update(CONFIGMAP).unwrap(), ApplyResult::Configured);
        helper.delete("v1", "ConfigMap", Some("hive"), "a").unwrap();
        helper
            .patch(&ObjectKey::new(Some("hive"), "a"), "cm", "v1", b"{}", "merge")
            .unwrap();
    }

    #[test]
    fn test_patch_skips_validation() {
        helper()
            .patch(&ObjectKey::new(None, "a"), "cm", "v1", b"not: [valid", "replace")
            .unwrap();
    }
}
