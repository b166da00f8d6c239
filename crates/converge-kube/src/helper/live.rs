//! Helper that talks to the API server

use converge_core::{ApplyResult, ChangeTracker, Scheme, Serializer};
use kube::api::DynamicObject;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::OnceCell;

use super::{Credentials, HelperConfig, ObjectKey, ResourceInfo, parse_single};
use crate::api::PatchRequest;
use crate::discovery::RestMapping;
use crate::error::{KubeError, Result, ResultExt};
use crate::factory::{ClientFactory, FactoryOptions, Session};
use crate::patch::{
    PatchType, is_empty_patch, last_applied, parse_patch_body, three_way_merge_patch,
    with_last_applied,
};

struct Connector {
    credentials: Credentials,
    namespace: Option<String>,
    options: FactoryOptions,
}

impl Connector {
    async fn connect(&self) -> Result<Session> {
        let namespace = self.namespace.as_deref();
        let factory = match &self.credentials {
            Credentials::Kubeconfig(kubeconfig) => {
                ClientFactory::from_kubeconfig(kubeconfig, namespace, &self.options).await?
            }
            Credentials::RestConfig(config) => {
                ClientFactory::from_rest_config(config, namespace, &self.options)?
            }
            Credentials::InCluster => ClientFactory::in_cluster(namespace, &self.options)?,
        };
        Ok(factory.session())
    }
}

/// What an existing object gets when the manifest is re-submitted
#[derive(Clone, Copy, PartialEq, Eq)]
enum OnExisting {
    /// Three-way patch; `unchanged` when converged
    Apply,
    /// Send the patch regardless; always `configured`
    Update,
    /// Leave it alone
    Keep,
}

/// Resource helper backed by a live cluster
pub struct LiveHelper {
    connector: Option<Connector>,
    session: OnceCell<Session>,
    scheme: Arc<Scheme>,
}

impl LiveHelper {
    /// Helper that connects on first use
    pub fn new(config: HelperConfig) -> Self {
        let options = config.factory_options();
        Self {
            connector: Some(Connector {
                credentials: config.credentials,
                namespace: config.namespace,
                options,
            }),
            session: OnceCell::new(),
            scheme: config.scheme,
        }
    }

    /// Helper over an existing session
    pub fn with_session(session: Session, scheme: Arc<Scheme>) -> Self {
        Self {
            connector: None,
            session: OnceCell::new_with(Some(session)),
            scheme,
        }
    }

    async fn session(&self) -> Result<&Session> {
        self.session
            .get_or_try_init(|| async {
                match &self.connector {
                    Some(connector) => connector.connect().await,
                    None => Err(KubeError::InvalidConfig("helper has no credentials".to_string())),
                }
            })
            .await
    }

    pub async fn info(&self, manifest: &[u8]) -> Result<ResourceInfo> {
        let session = self.session().await?;
        let parsed = parse_single(manifest)?;
        let api_version = parsed.type_meta.api_version.clone();
        let kind = parsed.type_meta.kind.clone();

        let mapping = session
            .mapper
            .mapping_for(&api_version, &kind)
            .await
            .context("resolve", format!("{api_version}/{kind}"))?;

        let mut document = parsed.document;
        let namespace = if mapping.namespaced {
            let namespace = match parsed.namespace {
                Some(ns) if session.enforced && ns != session.namespace => {
                    return Err(KubeError::InvalidManifest(format!(
                        "the namespace from the provided object \"{ns}\" does not match the namespace \"{}\"",
                        session.namespace
                    )));
                }
                Some(ns) => ns,
                None => session.namespace.clone(),
            };
            if let Some(metadata) = document.get_mut("metadata").and_then(Value::as_object_mut) {
                metadata.insert("namespace".into(), Value::String(namespace.clone()));
            }
            Some(namespace)
        } else {
            None
        };

        let object: DynamicObject = serde_json::from_value(document)?;
        Ok(ResourceInfo {
            name: parsed.name,
            namespace,
            api_version,
            kind,
            resource: mapping.resource.clone(),
            mapping: Some(mapping),
            object,
        })
    }

    pub async fn apply(&self, manifest: &[u8]) -> Result<ApplyResult> {
        self.reconcile(manifest, OnExisting::Apply).await
    }

    pub async fn apply_object<T: Serialize + 'static>(&self, object: &T) -> Result<ApplyResult> {
        let data = self.serialize(object)?;
        self.apply(&data).await
    }

    pub async fn create_or_update(&self, manifest: &[u8]) -> Result<ApplyResult> {
        self.reconcile(manifest, OnExisting::Update).await
    }

    pub async fn create_or_update_object<T: Serialize + 'static>(&self, object: &T) -> Result<ApplyResult> {
        let data = self.serialize(object)?;
        self.create_or_update(&data).await
    }

    pub async fn create(&self, manifest: &[u8]) -> Result<ApplyResult> {
        self.reconcile(manifest, OnExisting::Keep).await
    }

    pub async fn create_object<T: Serialize + 'static>(&self, object: &T) -> Result<ApplyResult> {
        let data = self.serialize(object)?;
        self.create(&data).await
    }

    pub async fn delete(&self, api_version: &str, kind: &str, namespace: Option<&str>, name: &str) -> Result<()> {
        let session = self.session().await?;
        let mapping = session
            .mapper
            .mapping_for(api_version, kind)
            .await
            .context("resolve", format!("{api_version}/{kind}"))?;
        let namespace = scoped_namespace(&mapping, namespace, session);

        match session.api.delete(&mapping, namespace, name).await {
            Ok(()) => {
                tracing::info!(resource = %mapping.resource, name, namespace, "deleted");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                tracing::info!(resource = %mapping.resource, name, namespace, "resource has already been deleted");
                Ok(())
            }
            Err(e) => Err(e.context("delete", format!("{}/{name}", mapping.resource))),
        }
    }

    pub async fn patch(
        &self,
        key: &ObjectKey,
        kind: &str,
        api_version: &str,
        patch: &[u8],
        patch_type: &str,
    ) -> Result<()> {
        let patch_type: PatchType = patch_type.parse()?;
        let body = parse_patch_body(patch)?;
        if patch_type == PatchType::Json && !body.is_array() {
            return Err(KubeError::InvalidManifest(
                "a json patch must be a list of operations".to_string(),
            ));
        }

        let session = self.session().await?;
        let mapping = session
            .mapper
            .resolve(api_version, kind)
            .await
            .context("resolve", format!("{api_version}/{kind}"))?;
        let namespace = scoped_namespace(&mapping, key.namespace.as_deref(), session);

        session
            .api
            .patch(&mapping, namespace, &key.name, &PatchRequest::new(patch_type, body))
            .await
            .context("patch", format!("{}/{}", mapping.resource, key.name))?;

        tracing::info!(
            resource = %mapping.resource,
            name = %key.name,
            namespace,
            patch_type = %patch_type,
            "patched"
        );
        Ok(())
    }

    fn serialize<T: Serialize + 'static>(&self, object: &T) -> Result<Vec<u8>> {
        Ok(Serializer::default().serialize(object, &self.scheme)?)
    }

    async fn reconcile(&self, manifest: &[u8], on_existing: OnExisting) -> Result<ApplyResult> {
        let info = self.info(manifest).await?;
        let session = self.session().await?;
        let mapping = info
            .mapping
            .as_ref()
            .ok_or_else(|| KubeError::InvalidConfig("resource info without mapping".to_string()))?;
        let namespace = info.namespace.as_deref();
        let target = format!("{}/{}", mapping.resource, info.name);
        let desired = info.to_value()?;

        let mut tracker = ChangeTracker::new();
        match session.api.get(mapping, namespace, &info.name).await {
            Err(e) if e.is_not_found() => {
                let object = match on_existing {
                    OnExisting::Keep => desired,
                    OnExisting::Apply | OnExisting::Update => with_last_applied(&desired)?,
                };
                session
                    .api
                    .create(mapping, namespace, &object)
                    .await
                    .context("create", &target)?;
                tracker.record(ApplyResult::Created);
            }
            Err(e) => return Err(e.context("get", target)),
            Ok(_) if on_existing == OnExisting::Keep => {
                tracker.record(ApplyResult::Unchanged);
            }
            Ok(live) => {
                let modified = with_last_applied(&desired)?;
                let original = last_applied(&live);
                let patch = three_way_merge_patch(original.as_ref(), &modified, &live);

                if on_existing == OnExisting::Apply && is_empty_patch(&patch) {
                    tracker.record(ApplyResult::Unchanged);
                } else {
                    tracing::debug!(resource = %target, patch = %patch, "sending merge patch");
                    session
                        .api
                        .patch(mapping, namespace, &info.name, &PatchRequest::Merge(patch))
                        .await
                        .context("patch", &target)?;
                    tracker.record(ApplyResult::Configured);
                }
            }
        }

        let result = tracker.result();
        tracing::info!(
            resource = %mapping.resource,
            name = %info.name,
            namespace,
            result = %result,
            "reconciled"
        );
        Ok(result)
    }
}

fn scoped_namespace<'a>(mapping: &RestMapping, namespace: Option<&'a str>, session: &'a Session) -> Option<&'a str> {
    if !mapping.namespaced {
        return None;
    }
    namespace
        .filter(|ns| !ns.is_empty())
        .or(Some(session.namespace.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{DiscoveryCache, RestMapper};
    use crate::mock::{MockCluster, MockOp};
    use converge_core::{CoreError, MetaTime};
    use serde_json::json;

    const CONFIGMAP: &[u8] = b"apiVersion: v1
kind: ConfigMap
metadata:
  name: lab-1-settings
data:
  timezone: Europe/Paris
";

    const CONFIGMAP_CHANGED: &[u8] = b"apiVersion: v1
kind: ConfigMap
metadata:
  name: lab-1-settings
data:
  timezone: America/Panama
";

    fn session_for(cluster: &MockCluster, namespace: &str, enforced: bool) -> Session {
        Session {
            api: Arc::new(cluster.clone()),
            mapper: RestMapper::new(Arc::new(DiscoveryCache::new(Arc::new(cluster.clone()), None))),
            namespace: namespace.to_string(),
            enforced,
        }
    }

    fn helper(cluster: &MockCluster) -> LiveHelper {
        LiveHelper::with_session(session_for(cluster, "hive", false), Arc::new(Scheme::new()))
    }

    #[tokio::test]
    async fn test_apply_created_unchanged_configured() {
        let cluster = MockCluster::new();
        let helper = helper(&cluster);

        assert_eq!(helper.apply(CONFIGMAP).await.unwrap(), ApplyResult::Created);

        cluster.reset_counts();
        assert_eq!(helper.apply(CONFIGMAP).await.unwrap(), ApplyResult::Unchanged);
        assert_eq!(cluster.counts().writes(), 0);

        assert_eq!(helper.apply(CONFIGMAP_CHANGED).await.unwrap(), ApplyResult::Configured);
        let stored = cluster
            .object("v1", "configmaps", Some("hive"), "lab-1-settings")
            .unwrap();
        assert_eq!(stored["data"]["timezone"], "America/Panama");
    }

    #[tokio::test]
    async fn test_apply_records_last_applied() {
        let cluster = MockCluster::new();
        helper(&cluster).apply(CONFIGMAP).await.unwrap();

        let stored = cluster
            .object("v1", "configmaps", Some("hive"), "lab-1-settings")
            .unwrap();
        let recorded = last_applied(&stored).unwrap();
        assert_eq!(recorded["data"]["timezone"], "Europe/Paris");
        assert_eq!(recorded["metadata"]["namespace"], "hive");
    }

    #[tokio::test]
    async fn test_apply_removes_dropped_fields() {
        let cluster = MockCluster::new();
        let helper = helper(&cluster);
        helper
            .apply(b"apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\ndata:\n  keep: k\n  drop: d\n")
            .await
            .unwrap();

        let result = helper
            .apply(b"apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\ndata:\n  keep: k\n")
            .await
            .unwrap();
        assert_eq!(result, ApplyResult::Configured);

        let stored = cluster.object("v1", "configmaps", Some("hive"), "a").unwrap();
        assert_eq!(stored["data"], json!({"keep": "k"}));
    }

    #[tokio::test]
    async fn test_apply_multi_document_fails() {
        let cluster = MockCluster::new();
        let two = [CONFIGMAP, b"---\n".as_slice(), CONFIGMAP_CHANGED].concat();

        let err = helper(&cluster).apply(&two).await.unwrap_err();
        assert!(matches!(err, KubeError::MalformedManifest { count: 2 }));
        assert_eq!(cluster.counts().writes(), 0);
    }

    #[tokio::test]
    async fn test_apply_propagates_server_error() {
        let cluster = MockCluster::new();
        cluster.fail_next(MockOp::Get, 503, "ServiceUnavailable");

        let err = helper(&cluster).apply(CONFIGMAP).await.unwrap_err();
        assert!(!err.is_not_found());
        assert!(matches!(err.root(), KubeError::Api(kube::Error::Api(resp)) if resp.code == 503));
        assert_eq!(cluster.counts().creates, 0);
    }

    fn injected(err: &KubeError, code: u16) -> bool {
        matches!(err.root(), KubeError::Api(kube::Error::Api(resp)) if resp.code == code)
    }

    #[tokio::test]
    async fn test_apply_create_failure_propagates() {
        let cluster = MockCluster::new();
        cluster.fail_next(MockOp::Create, 500, "InternalError");

        let err = helper(&cluster).apply(CONFIGMAP).await.unwrap_err();
        assert!(injected(&err, 500), "unexpected error: {err}");
        assert!(matches!(err, KubeError::Operation { operation: "create", .. }));
        assert_eq!(cluster.counts().creates, 1);
        assert_eq!(cluster.object_count(), 0);
    }

    #[tokio::test]
    async fn test_apply_patch_failure_propagates() {
        let cluster = MockCluster::new();
        let helper = helper(&cluster);
        helper.apply(CONFIGMAP).await.unwrap();
        cluster.fail_next(MockOp::Patch, 409, "Conflict");

        let err = helper.apply(CONFIGMAP_CHANGED).await.unwrap_err();
        assert!(injected(&err, 409), "unexpected error: {err}");
        assert!(matches!(err, KubeError::Operation { operation: "patch", .. }));

        let stored = cluster
            .object("v1", "configmaps", Some("hive"), "lab-1-settings")
            .unwrap();
        assert_eq!(stored["data"]["timezone"], "Europe/Paris");
    }

    #[tokio::test]
    async fn test_apply_discovery_failure_propagates() {
        let cluster = MockCluster::new();
        cluster.fail_next(MockOp::Discovery, 503, "ServiceUnavailable");

        let err = helper(&cluster).apply(CONFIGMAP).await.unwrap_err();
        assert!(injected(&err, 503), "unexpected error: {err}");
        assert!(!matches!(err.root(), KubeError::Discovery { .. }));
        assert_eq!(cluster.counts().gets, 0);
        assert_eq!(cluster.counts().writes(), 0);
    }

    #[tokio::test]
    async fn test_apply_unknown_kind() {
        let cluster = MockCluster::new();
        let err = helper(&cluster)
            .apply(b"apiVersion: example.io/v1\nkind: Gizmo\nmetadata:\n  name: g\n")
            .await
            .unwrap_err();
        assert!(matches!(err.root(), KubeError::Discovery { .. }));
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let cluster = MockCluster::new();
        let helper = helper(&cluster);

        assert_eq!(helper.create(CONFIGMAP).await.unwrap(), ApplyResult::Created);
        assert_eq!(helper.create(CONFIGMAP_CHANGED).await.unwrap(), ApplyResult::Unchanged);

        let stored = cluster
            .object("v1", "configmaps", Some("hive"), "lab-1-settings")
            .unwrap();
        assert_eq!(stored["data"]["timezone"], "Europe/Paris");
        assert_eq!(cluster.counts().patches, 0);
    }

    #[tokio::test]
    async fn test_create_or_update_existing_is_configured() {
        let cluster = MockCluster::new();
        let helper = helper(&cluster);

        assert_eq!(helper.create_or_update(CONFIGMAP).await.unwrap(), ApplyResult::Created);
        assert_eq!(helper.create_or_update(CONFIGMAP).await.unwrap(), ApplyResult::Configured);

        let patches = cluster.patches();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0], PatchRequest::Merge(json!({})));
    }

    #[tokio::test]
    async fn test_info_fills_namespace() {
        let cluster = MockCluster::new();
        let info = helper(&cluster).info(CONFIGMAP).await.unwrap();

        assert_eq!(info.name, "lab-1-settings");
        assert_eq!(info.namespace.as_deref(), Some("hive"));
        assert_eq!(info.resource, "configmaps");
        assert_eq!(info.object.metadata.namespace.as_deref(), Some("hive"));
        assert_eq!(info.describe(), "configmaps/lab-1-settings in namespace hive");
    }

    #[tokio::test]
    async fn test_info_cluster_scoped() {
        let cluster = MockCluster::new();
        let info = helper(&cluster)
            .info(b"apiVersion: v1\nkind: Namespace\nmetadata:\n  name: lab-1\n")
            .await
            .unwrap();
        assert_eq!(info.namespace, None);
        assert!(!info.mapping.unwrap().namespaced);
    }

    #[tokio::test]
    async fn test_info_enforced_namespace_mismatch() {
        let cluster = MockCluster::new();
        let helper = LiveHelper::with_session(session_for(&cluster, "hive", true), Arc::new(Scheme::new()));

        let err = helper
            .info(b"apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n  namespace: other\n")
            .await
            .unwrap_err();
        assert!(matches!(err, KubeError::InvalidManifest(_)));

        let info = helper
            .info(b"apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n  namespace: hive\n")
            .await
            .unwrap();
        assert_eq!(info.namespace.as_deref(), Some("hive"));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let cluster = MockCluster::new();
        let helper = helper(&cluster);

        helper.delete("v1", "ConfigMap", Some("hive"), "lab-1-settings").await.unwrap();

        helper.apply(CONFIGMAP).await.unwrap();
        helper.delete("v1", "ConfigMap", Some("hive"), "lab-1-settings").await.unwrap();
        assert_eq!(cluster.object_count(), 0);

        helper.delete("v1", "ConfigMap", Some("hive"), "lab-1-settings").await.unwrap();
        assert_eq!(cluster.counts().deletes, 3);
    }

    #[tokio::test]
    async fn test_delete_propagates_other_errors() {
        let cluster = MockCluster::new();
        cluster.fail_next(MockOp::Delete, 403, "Forbidden");

        let err = helper(&cluster)
            .delete("v1", "ConfigMap", Some("hive"), "a")
            .await
            .unwrap_err();
        assert!(matches!(err, KubeError::Operation { operation: "delete", .. }));
    }

    #[tokio::test]
    async fn test_patch_types() {
        let cluster = MockCluster::new();
        let helper = helper(&cluster);
        helper.apply(CONFIGMAP).await.unwrap();
        let key = ObjectKey::new(Some("hive"), "lab-1-settings");

        helper
            .patch(&key, "cm", "v1", br#"{"data":{"timezone":"Asia/Tokyo"}}"#, "merge")
            .await
            .unwrap();
        helper
            .patch(&key, "configmaps", "v1", b"data:\n  extra: x\n", "")
            .await
            .unwrap();
        helper
            .patch(
                &key,
                "ConfigMap",
                "v1",
                br#"[{"op":"remove","path":"/data/extra"}]"#,
                "json",
            )
            .await
            .unwrap();

        let types: Vec<_> = cluster.patches().iter().map(PatchRequest::patch_type).collect();
        assert_eq!(types, vec![PatchType::Merge, PatchType::Strategic, PatchType::Json]);

        let stored = cluster
            .object("v1", "configmaps", Some("hive"), "lab-1-settings")
            .unwrap();
        assert_eq!(stored["data"], json!({"timezone": "Asia/Tokyo"}));
    }

    #[tokio::test]
    async fn test_invalid_patch_type_before_any_call() {
        let cluster = MockCluster::new();
        let helper = helper(&cluster);
        let key = ObjectKey::new(Some("hive"), "a");

        let err = helper.patch(&key, "cm", "v1", b"{}", "replace").await.unwrap_err();
        assert!(matches!(err, KubeError::InvalidPatchType(ref t) if t == "replace"));
        assert_eq!(cluster.counts(), Default::default());
    }

    #[tokio::test]
    async fn test_patch_missing_object() {
        let cluster = MockCluster::new();
        let err = helper(&cluster)
            .patch(&ObjectKey::new(Some("hive"), "nope"), "cm", "v1", b"{}", "merge")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct ObjectMeta {
        name: String,
        creation_timestamp: MetaTime,
    }

    #[derive(Serialize)]
    struct ConfigMap {
        metadata: ObjectMeta,
        data: std::collections::BTreeMap<String, String>,
    }

    fn typed_configmap() -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: "typed".to_string(),
                creation_timestamp: MetaTime::zero(),
            },
            data: [("company".to_string(), "Acme".to_string())].into(),
        }
    }

    #[tokio::test]
    async fn test_apply_object_omits_zero_time() {
        let cluster = MockCluster::new();
        let scheme = Arc::new(Scheme::new().with::<ConfigMap>("v1", "ConfigMap"));
        let helper = LiveHelper::with_session(session_for(&cluster, "hive", false), scheme);

        assert_eq!(
            helper.apply_object(&typed_configmap()).await.unwrap(),
            ApplyResult::Created
        );
        assert_eq!(
            helper.apply_object(&typed_configmap()).await.unwrap(),
            ApplyResult::Unchanged
        );

        let stored = cluster.object("v1", "configmaps", Some("hive"), "typed").unwrap();
        let recorded = last_applied(&stored).unwrap();
        assert!(recorded["metadata"].get("creationTimestamp").is_none());

        assert_eq!(
            helper.create_object(&typed_configmap()).await.unwrap(),
            ApplyResult::Unchanged
        );
        assert_eq!(
            helper.create_or_update_object(&typed_configmap()).await.unwrap(),
            ApplyResult::Configured
        );
    }

    #[tokio::test]
    async fn test_apply_object_unregistered_type() {
        let cluster = MockCluster::new();
        let err = helper(&cluster).apply_object(&typed_configmap()).await.unwrap_err();
        assert!(matches!(err, KubeError::Core(CoreError::UnregisteredType { .. })));
        assert_eq!(cluster.counts().gets, 0);
    }
}
