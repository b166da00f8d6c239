//! Patch computation
//!
//! Three-way JSON merge patches in the style of client-side `kubectl apply`,
//! plus the patch type accepted by the explicit patch operation.

use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::{KubeError, Result};

/// Annotation holding the last configuration applied by this tool
pub const LAST_APPLIED_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

/// Patch flavours understood by the API server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PatchType {
    /// RFC 6902 JSON patch
    Json,
    /// RFC 7386 JSON merge patch
    Merge,
    /// Kubernetes strategic merge patch
    #[default]
    Strategic,
}

impl PatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatchType::Json => "json",
            PatchType::Merge => "merge",
            PatchType::Strategic => "strategic",
        }
    }
}

impl fmt::Display for PatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PatchType {
    type Err = KubeError;

    /// An empty string selects the strategic merge patch
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "strategic" => Ok(PatchType::Strategic),
            "merge" => Ok(PatchType::Merge),
            "json" => Ok(PatchType::Json),
            other => Err(KubeError::InvalidPatchType(other.to_string())),
        }
    }
}

/// Parse a patch body given as JSON or YAML
pub fn parse_patch_body(bytes: &[u8]) -> Result<Value> {
    let value: Value = serde_yaml::from_slice(bytes)?;
    Ok(value)
}

/// Compute the merge patch that moves `current` to `modified`.
///
/// - keys of `modified` whose value differs from `current` are set; nested
///   objects recurse, arrays and scalars are replaced wholesale
/// - keys only present in `current` are left alone
/// - keys present in `original` but dropped from `modified` are deleted
///   (set to `null`) if `current` still has them
///
/// Changes always win over deletions; there is no conflict detection.
pub fn three_way_merge_patch(original: Option<&Value>, modified: &Value, current: &Value) -> Value {
    match modified.as_object() {
        Some(modified) => Value::Object(diff_objects(
            original.and_then(Value::as_object),
            modified,
            current.as_object(),
        )),
        None if modified == current => Value::Object(Map::new()),
        None => modified.clone(),
    }
}

fn diff_objects(
    original: Option<&Map<String, Value>>,
    modified: &Map<String, Value>,
    current: Option<&Map<String, Value>>,
) -> Map<String, Value> {
    let mut patch = Map::new();

    if let (Some(original), Some(current)) = (original, current) {
        for key in original.keys() {
            if !modified.contains_key(key) && current.contains_key(key) {
                patch.insert(key.clone(), Value::Null);
            }
        }
    }

    for (key, desired) in modified {
        let live = current.and_then(|c| c.get(key));
        match (desired, live) {
            (Value::Object(desired), Some(Value::Object(live))) => {
                let original = original.and_then(|o| o.get(key)).and_then(Value::as_object);
                let nested = diff_objects(original, desired, Some(live));
                if !nested.is_empty() {
                    patch.insert(key.clone(), Value::Object(nested));
                }
            }
            (Value::Null, None) => {}
            (desired, Some(live)) if desired == live => {}
            (desired, _) => {
                patch.insert(key.clone(), desired.clone());
            }
        }
    }

    patch
}

/// True for `{}`
pub fn is_empty_patch(patch: &Value) -> bool {
    patch.as_object().is_some_and(Map::is_empty)
}

/// Copy of `object` without the last-applied annotation
pub fn strip_last_applied(object: &Value) -> Value {
    let mut object = object.clone();
    if let Some(metadata) = object.get_mut("metadata").and_then(Value::as_object_mut) {
        let now_empty = match metadata.get_mut("annotations").and_then(Value::as_object_mut) {
            Some(annotations) => {
                annotations.remove(LAST_APPLIED_ANNOTATION);
                annotations.is_empty()
            }
            None => false,
        };
        if now_empty {
            metadata.remove("annotations");
        }
    }
    object
}

/// Desired object with a refreshed last-applied annotation
pub fn with_last_applied(desired: &Value) -> Result<Value> {
    let stripped = strip_last_applied(desired);
    let serialized = serde_json::to_string(&stripped)?;

    let mut object = stripped;
    let metadata = object
        .as_object_mut()
        .ok_or_else(|| KubeError::InvalidManifest("expected a JSON object".to_string()))?
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()));
    let annotations = metadata
        .as_object_mut()
        .ok_or_else(|| KubeError::InvalidManifest("metadata is not an object".to_string()))?
        .entry("annotations")
        .or_insert_with(|| Value::Object(Map::new()));
    annotations
        .as_object_mut()
        .ok_or_else(|| KubeError::InvalidManifest("metadata.annotations is not an object".to_string()))?
        .insert(LAST_APPLIED_ANNOTATION.to_string(), Value::String(serialized));

    Ok(object)
}

/// Previously applied configuration recorded on a live object
pub fn last_applied(live: &Value) -> Option<Value> {
    let raw = live
        .pointer("/metadata/annotations")?
        .get(LAST_APPLIED_ANNOTATION)?
        .as_str()?;
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(error = %e, "ignoring unparsable last-applied annotation");
            None
        }
    }
}
