//! In-memory cluster for testing
//!
//! Serves discovery documents and stores objects, so the discovery cache and
//! the resource helper can be exercised without an API server. Strategic
//! merge patches are applied as plain merge patches.

use async_trait::async_trait;
use converge_core::MetaTime;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    APIGroup, APIGroupList, APIResource, APIResourceList, GroupVersionForDiscovery,
};
use kube::core::ErrorResponse;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::api::{PatchRequest, ResourceApi};
use crate::discovery::{DiscoverySource, RestMapping};
use crate::error::{KubeError, Result};

const MOCK_HOST: &str = "https://mock.cluster.local:6443";
const VERBS: [&str; 6] = ["create", "delete", "get", "list", "patch", "update"];

/// Operation kinds that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Get,
    Create,
    Patch,
    Delete,
    Discovery,
}

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperationCounts {
    pub gets: usize,
    pub creates: usize,
    pub patches: usize,
    pub deletes: usize,
    pub discovery_fetches: usize,
}

impl OperationCounts {
    /// Calls that can modify objects
    pub fn writes(&self) -> usize {
        self.creates + self.patches + self.deletes
    }
}

/// (apiVersion/resource, namespace, name)
type ObjectKey = (String, String, String);

struct State {
    resources: Vec<(String, APIResource)>,
    objects: BTreeMap<ObjectKey, Value>,
    operations: OperationCounts,
    failures: HashMap<MockOp, ErrorResponse>,
    patches: Vec<PatchRequest>,
}

/// Fake API server holding discovery data and objects
#[derive(Clone)]
pub struct MockCluster {
    host: Arc<str>,
    state: Arc<RwLock<State>>,
    next_uid: Arc<AtomicU64>,
}

impl MockCluster {
    /// Cluster serving a few core, apps and hive kinds
    pub fn new() -> Self {
        let cluster = Self::empty(MOCK_HOST);
        cluster.add_resource("v1", "ConfigMap", "configmaps", true, &["cm"]);
        cluster.add_resource("v1", "Secret", "secrets", true, &[]);
        cluster.add_resource("v1", "Namespace", "namespaces", false, &["ns"]);
        cluster.add_resource("v1", "Pod", "pods", true, &["po"]);
        cluster.add_resource("v1", "Pod", "pods/log", true, &[]);
        cluster.add_resource("v1", "Pod", "pods/status", true, &[]);
        cluster.add_resource("apps/v1", "Deployment", "deployments", true, &["deploy"]);
        cluster.add_resource(
            "hive.openshift.io/v1",
            "ClusterDeployment",
            "clusterdeployments",
            true,
            &["cd"],
        );
        cluster.add_resource("hive.openshift.io/v1", "MachinePool", "machinepools", true, &["mp"]);
        cluster
    }

    /// Cluster without any resources
    pub fn empty(host: &str) -> Self {
        Self {
            host: Arc::from(host),
            state: Arc::new(RwLock::new(State {
                resources: Vec::new(),
                objects: BTreeMap::new(),
                operations: OperationCounts::default(),
                failures: HashMap::new(),
                patches: Vec::new(),
            })),
            next_uid: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Serve `plural` for `kind` under `api_version`
    pub fn add_resource(
        &self,
        api_version: &str,
        kind: &str,
        plural: &str,
        namespaced: bool,
        short_names: &[&str],
    ) {
        let resource = APIResource {
            name: plural.to_string(),
            kind: kind.to_string(),
            namespaced,
            singular_name: if plural.contains('/') {
                String::new()
            } else {
                kind.to_lowercase()
            },
            short_names: if short_names.is_empty() {
                None
            } else {
                Some(short_names.iter().map(|s| s.to_string()).collect())
            },
            verbs: VERBS.iter().map(|v| v.to_string()).collect(),
            ..Default::default()
        };
        self.write().resources.push((api_version.to_string(), resource));
    }

    /// Make the next call of `op` fail with an API error
    pub fn fail_next(&self, op: MockOp, code: u16, reason: &str) {
        self.write().failures.insert(
            op,
            ErrorResponse {
                status: "Failure".to_string(),
                message: format!("injected {reason}"),
                reason: reason.to_string(),
                code,
            },
        );
    }

    /// Get operation counts for assertions
    pub fn counts(&self) -> OperationCounts {
        self.read().operations.clone()
    }

    /// Reset operation counts
    pub fn reset_counts(&self) {
        self.write().operations = OperationCounts::default();
    }

    /// Patches received so far, oldest first
    pub fn patches(&self) -> Vec<PatchRequest> {
        self.read().patches.clone()
    }

    /// Stored object, if any
    pub fn object(&self, api_version: &str, resource: &str, namespace: Option<&str>, name: &str) -> Option<Value> {
        let key = (
            format!("{api_version}/{resource}"),
            namespace.unwrap_or_default().to_string(),
            name.to_string(),
        );
        self.read().objects.get(&key).cloned()
    }

    pub fn object_count(&self) -> usize {
        self.read().objects.len()
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn key(mapping: &RestMapping, namespace: Option<&str>, name: &str) -> ObjectKey {
        let namespace = if mapping.namespaced {
            namespace.unwrap_or_default()
        } else {
            ""
        };
        (
            format!("{}/{}", mapping.api_version(), mapping.resource),
            namespace.to_string(),
            name.to_string(),
        )
    }

    /// Count the call and return the injected failure, if one is pending
    fn begin(&self, op: MockOp) -> Result<()> {
        let mut state = self.write();
        let ops = &mut state.operations;
        match op {
            MockOp::Get => ops.gets += 1,
            MockOp::Create => ops.creates += 1,
            MockOp::Patch => ops.patches += 1,
            MockOp::Delete => ops.deletes += 1,
            MockOp::Discovery => ops.discovery_fetches += 1,
        }
        match state.failures.remove(&op) {
            Some(resp) => Err(KubeError::Api(kube::Error::Api(resp))),
            None => Ok(()),
        }
    }

    fn not_found(mapping: &RestMapping, name: &str) -> KubeError {
        KubeError::NotFound {
            resource: mapping.resource.clone(),
            name: name.to_string(),
        }
    }

    fn api_error(code: u16, reason: &str, message: String) -> KubeError {
        KubeError::Api(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message,
            reason: reason.to_string(),
            code,
        }))
    }
}

impl Default for MockCluster {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DiscoverySource for MockCluster {
    fn host(&self) -> &str {
        &self.host
    }

    async fn server_groups(&self) -> Result<APIGroupList> {
        self.begin(MockOp::Discovery)?;

        let state = self.read();
        let mut groups: Vec<APIGroup> = Vec::new();
        for (group_version, _) in &state.resources {
            let (group, version) = match group_version.rsplit_once('/') {
                Some((group, version)) => (group, version),
                None => ("", group_version.as_str()),
            };
            let entry = GroupVersionForDiscovery {
                group_version: group_version.clone(),
                version: version.to_string(),
            };
            match groups.iter_mut().find(|g| g.name == group) {
                Some(existing) => {
                    if !existing.versions.contains(&entry) {
                        existing.versions.push(entry);
                    }
                }
                None => groups.push(APIGroup {
                    name: group.to_string(),
                    preferred_version: Some(entry.clone()),
                    versions: vec![entry],
                    ..Default::default()
                }),
            }
        }
        Ok(APIGroupList { groups })
    }

    async fn server_resources(&self, group_version: &str) -> Result<APIResourceList> {
        self.begin(MockOp::Discovery)?;

        let resources: Vec<APIResource> = self
            .read()
            .resources
            .iter()
            .filter(|(gv, _)| gv == group_version)
            .map(|(_, r)| r.clone())
            .collect();
        if resources.is_empty() {
            return Err(Self::api_error(
                404,
                "NotFound",
                format!("the server could not find the requested resource {group_version}"),
            ));
        }
        Ok(APIResourceList {
            group_version: group_version.to_string(),
            resources,
        })
    }
}

#[async_trait]
impl ResourceApi for MockCluster {
    async fn get(&self, mapping: &RestMapping, namespace: Option<&str>, name: &str) -> Result<Value> {
        self.begin(MockOp::Get)?;
        self.read()
            .objects
            .get(&Self::key(mapping, namespace, name))
            .cloned()
            .ok_or_else(|| Self::not_found(mapping, name))
    }

    async fn create(&self, mapping: &RestMapping, namespace: Option<&str>, object: &Value) -> Result<Value> {
        self.begin(MockOp::Create)?;

        let name = object
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .ok_or_else(|| Self::api_error(422, "Invalid", "metadata.name: Required value".to_string()))?
            .to_string();
        let key = Self::key(mapping, namespace, &name);

        let mut stored = object.clone();
        let uid = self.next_uid.fetch_add(1, Ordering::SeqCst);
        if let Some(metadata) = stored.get_mut("metadata").and_then(Value::as_object_mut) {
            metadata.insert("uid".into(), json!(format!("00000000-0000-0000-0000-{uid:012}")));
            metadata.insert("resourceVersion".into(), json!("1"));
            metadata.insert(
                "creationTimestamp".into(),
                json!(MetaTime::now().to_rfc3339()),
            );
            if mapping.namespaced {
                if let Some(ns) = namespace {
                    metadata.insert("namespace".into(), json!(ns));
                }
            }
        }

        let mut state = self.write();
        if state.objects.contains_key(&key) {
            return Err(Self::api_error(
                409,
                "AlreadyExists",
                format!("{} \"{name}\" already exists", mapping.resource),
            ));
        }
        state.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn patch(
        &self,
        mapping: &RestMapping,
        namespace: Option<&str>,
        name: &str,
        patch: &PatchRequest,
    ) -> Result<Value> {
        self.begin(MockOp::Patch)?;

        let mut state = self.write();
        state.patches.push(patch.clone());
        let object = state
            .objects
            .get_mut(&Self::key(mapping, namespace, name))
            .ok_or_else(|| Self::not_found(mapping, name))?;

        let before = object.clone();
        match patch {
            PatchRequest::Merge(body) | PatchRequest::Strategic(body) => json_patch::merge(object, body),
            PatchRequest::Json(ops) => {
                let ops: json_patch::Patch = serde_json::from_value(ops.clone())?;
                json_patch::patch(object, &ops.0)
                    .map_err(|e| Self::api_error(422, "Invalid", e.to_string()))?;
            }
        }

        if *object != before {
            let version = object
                .pointer("/metadata/resourceVersion")
                .and_then(Value::as_str)
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0);
            if let Some(metadata) = object.get_mut("metadata").and_then(Value::as_object_mut) {
                metadata.insert("resourceVersion".into(), json!((version + 1).to_string()));
            }
        }
        Ok(object.clone())
    }

    async fn delete(&self, mapping: &RestMapping, namespace: Option<&str>, name: &str) -> Result<()> {
        self.begin(MockOp::Delete)?;
        self.write()
            .objects
            .remove(&Self::key(mapping, namespace, name))
            .map(|_| ())
            .ok_or_else(|| Self::not_found(mapping, name))
    }
}
