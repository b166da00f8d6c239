//! Object-level API calls
//!
//! [`ResourceApi`] is the seam between the resource helper and the API
//! server. Objects travel as untyped JSON; the [`RestMapping`] says where
//! they live.

use async_trait::async_trait;
use kube::Client;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams, PostParams};
use serde_json::Value;

use crate::discovery::RestMapping;
use crate::error::{KubeError, Result};
use crate::patch::PatchType;

/// Patch body tagged with its flavour
#[derive(Debug, Clone, PartialEq)]
pub enum PatchRequest {
    Json(Value),
    Merge(Value),
    Strategic(Value),
}

impl PatchRequest {
    pub fn new(patch_type: PatchType, body: Value) -> Self {
        match patch_type {
            PatchType::Json => PatchRequest::Json(body),
            PatchType::Merge => PatchRequest::Merge(body),
            PatchType::Strategic => PatchRequest::Strategic(body),
        }
    }

    pub fn patch_type(&self) -> PatchType {
        match self {
            PatchRequest::Json(_) => PatchType::Json,
            PatchRequest::Merge(_) => PatchType::Merge,
            PatchRequest::Strategic(_) => PatchType::Strategic,
        }
    }

    pub fn body(&self) -> &Value {
        match self {
            PatchRequest::Json(v) | PatchRequest::Merge(v) | PatchRequest::Strategic(v) => v,
        }
    }
}

/// CRUD on a single object
///
/// `namespace` is ignored for cluster-scoped mappings. Missing objects are
/// reported as [`KubeError::NotFound`].
#[async_trait]
pub trait ResourceApi: Send + Sync {
    async fn get(&self, mapping: &RestMapping, namespace: Option<&str>, name: &str) -> Result<Value>;

    async fn create(&self, mapping: &RestMapping, namespace: Option<&str>, object: &Value) -> Result<Value>;

    async fn patch(
        &self,
        mapping: &RestMapping,
        namespace: Option<&str>,
        name: &str,
        patch: &PatchRequest,
    ) -> Result<Value>;

    async fn delete(&self, mapping: &RestMapping, namespace: Option<&str>, name: &str) -> Result<()>;
}

/// [`ResourceApi`] over a `kube::Client`
#[derive(Clone)]
pub struct KubeResourceApi {
    client: Client,
}

impl KubeResourceApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, mapping: &RestMapping, namespace: Option<&str>) -> Api<DynamicObject> {
        let resource = mapping.api_resource();
        match namespace {
            Some(ns) if mapping.namespaced => Api::namespaced_with(self.client.clone(), ns, &resource),
            _ => Api::all_with(self.client.clone(), &resource),
        }
    }
}

fn map_not_found(error: kube::Error, mapping: &RestMapping, name: &str) -> KubeError {
    match error {
        kube::Error::Api(ref resp) if resp.code == 404 => KubeError::NotFound {
            resource: mapping.resource.clone(),
            name: name.to_string(),
        },
        other => KubeError::Api(other),
    }
}

#[async_trait]
impl ResourceApi for KubeResourceApi {
    async fn get(&self, mapping: &RestMapping, namespace: Option<&str>, name: &str) -> Result<Value> {
        let object = self
            .api(mapping, namespace)
            .get(name)
            .await
            .map_err(|e| map_not_found(e, mapping, name))?;
        Ok(serde_json::to_value(object)?)
    }

    async fn create(&self, mapping: &RestMapping, namespace: Option<&str>, object: &Value) -> Result<Value> {
        let object: DynamicObject = serde_json::from_value(object.clone())?;
        let created = self
            .api(mapping, namespace)
            .create(&PostParams::default(), &object)
            .await?;
        Ok(serde_json::to_value(created)?)
    }

    async fn patch(
        &self,
        mapping: &RestMapping,
        namespace: Option<&str>,
        name: &str,
        patch: &PatchRequest,
    ) -> Result<Value> {
        let patch: Patch<Value> = match patch {
            PatchRequest::Json(ops) => Patch::Json(serde_json::from_value(ops.clone())?),
            PatchRequest::Merge(body) => Patch::Merge(body.clone()),
            PatchRequest::Strategic(body) => Patch::Strategic(body.clone()),
        };
        let patched = self
            .api(mapping, namespace)
            .patch(name, &PatchParams::default(), &patch)
            .await
            .map_err(|e| map_not_found(e, mapping, name))?;
        Ok(serde_json::to_value(patched)?)
    }

    async fn delete(&self, mapping: &RestMapping, namespace: Option<&str>, name: &str) -> Result<()> {
        self.api(mapping, namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_not_found(e, mapping, name))?;
        Ok(())
    }
}
