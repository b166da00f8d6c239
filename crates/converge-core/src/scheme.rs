//! Explicit type registry
//!
//! Maps Rust types to the `apiVersion`/`kind` pair they are sent to the API
//! server as. A `Scheme` is built once at startup and handed to the
//! serializer and the resource helper by reference.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::TypeId;
use std::collections::HashMap;

use crate::error::{CoreError, Result};

/// apiVersion + kind of a serialized object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeMeta {
    pub api_version: String,
    pub kind: String,
}

impl TypeMeta {
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
        }
    }

    /// Read apiVersion/kind from a JSON object, if both are present and non-empty
    pub fn from_value(value: &Value) -> Option<Self> {
        let api_version = value.get("apiVersion")?.as_str()?;
        let kind = value.get("kind")?.as_str()?;
        if api_version.is_empty() || kind.is_empty() {
            return None;
        }
        Some(Self::new(api_version, kind))
    }

    /// Split apiVersion into (group, version); the core group is ""
    pub fn group_version(&self) -> (&str, &str) {
        match self.api_version.rsplit_once('/') {
            Some((group, version)) => (group, version),
            None => ("", self.api_version.as_str()),
        }
    }
}

/// Registry of Rust types and the kinds they serialize as
#[derive(Debug, Clone, Default)]
pub struct Scheme {
    kinds: HashMap<TypeId, TypeMeta>,
}

impl Scheme {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` as `apiVersion`/`kind`
    pub fn register<T: 'static>(
        &mut self,
        api_version: impl Into<String>,
        kind: impl Into<String>,
    ) -> &mut Self {
        self.kinds
            .insert(TypeId::of::<T>(), TypeMeta::new(api_version, kind));
        self
    }

    /// Builder-style variant of [`Scheme::register`]
    pub fn with<T: 'static>(mut self, api_version: &str, kind: &str) -> Self {
        self.register::<T>(api_version, kind);
        self
    }

    pub fn type_meta<T: 'static>(&self) -> Option<&TypeMeta> {
        self.kinds.get(&TypeId::of::<T>())
    }

    pub fn is_registered<T: 'static>(&self) -> bool {
        self.kinds.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Stamp the registered apiVersion/kind of `T` onto a serialized object.
    ///
    /// Unregistered types are accepted only when the object already carries
    /// both fields.
    pub fn set_type_meta<T: 'static>(&self, value: &mut Value) -> Result<()> {
        let Some(object) = value.as_object_mut() else {
            return Err(CoreError::InvalidManifest {
                message: format!(
                    "{} did not serialize to a JSON object",
                    std::any::type_name::<T>()
                ),
            });
        };

        match self.type_meta::<T>() {
            Some(meta) => {
                object.insert("apiVersion".into(), Value::String(meta.api_version.clone()));
                object.insert("kind".into(), Value::String(meta.kind.clone()));
                Ok(())
            }
            None if TypeMeta::from_value(value).is_some() => Ok(()),
            None => Err(CoreError::UnregisteredType {
                type_name: std::any::type_name::<T>(),
            }),
        }
    }
}
