//! Manifest parsing
//!
//! A manifest is a byte buffer holding one or more YAML or JSON documents.
//! `*List` documents are flattened into their items.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{CoreError, Result};

/// Borrowed manifest bytes
#[derive(Debug, Clone, Copy)]
pub struct Manifest<'a> {
    bytes: &'a [u8],
}

impl<'a> Manifest<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Parse every non-empty document
    pub fn documents(&self) -> Result<Vec<Value>> {
        let mut out = Vec::new();
        for document in serde_yaml::Deserializer::from_slice(self.bytes) {
            let value = Value::deserialize(document)?;
            if value.is_null() {
                continue;
            }
            flatten_into(value, &mut out)?;
        }
        Ok(out)
    }
}

impl<'a> From<&'a [u8]> for Manifest<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Self::new(bytes)
    }
}

impl<'a> From<&'a str> for Manifest<'a> {
    fn from(text: &'a str) -> Self {
        Self::new(text.as_bytes())
    }
}

fn flatten_into(value: Value, out: &mut Vec<Value>) -> Result<()> {
    if !value.is_object() {
        return Err(CoreError::InvalidManifest {
            message: format!("expected an object, found {}", type_name(&value)),
        });
    }

    let is_list = value
        .get("kind")
        .and_then(Value::as_str)
        .is_some_and(|kind| kind.ends_with("List"));

    match value {
        Value::Object(mut map) if is_list && map.get("items").is_some_and(Value::is_array) => {
            if let Some(Value::Array(items)) = map.remove("items") {
                for item in items {
                    flatten_into(item, out)?;
                }
            }
            Ok(())
        }
        other => {
            out.push(other);
            Ok(())
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Produces one manifest per target resource type
///
/// Implemented by whatever builds desired state (templates, generated
/// objects, files on disk) so provisioning code does not care where the
/// bytes came from.
pub trait ManifestSource: Send + Sync {
    fn manifests(&self) -> Result<Vec<Vec<u8>>>;
}

/// Fixed set of manifests held in memory
#[derive(Debug, Clone, Default)]
pub struct StaticManifests(pub Vec<Vec<u8>>);

impl ManifestSource for StaticManifests {
    fn manifests(&self) -> Result<Vec<Vec<u8>>> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_yaml_document() {
        let docs = Manifest::from("apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n")
            .documents()
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["metadata"]["name"], "a");
    }

    #[test]
    fn test_json_document() {
        let docs = Manifest::from(r#"{"apiVersion":"v1","kind":"Secret","metadata":{"name":"s"}}"#)
            .documents()
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["kind"], "Secret");
    }

    #[test]
    fn test_multi_document_skips_empty() {
        let text = "---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n---\n---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: b\n";
        let docs = Manifest::from(text).documents().unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1]["metadata"]["name"], "b");
    }

    #[test]
    fn test_list_is_flattened() {
        let text = r#"
apiVersion: v1
kind: List
items:
  - apiVersion: v1
    kind: ConfigMap
    metadata:
      name: one
  - apiVersion: v1
    kind: ConfigMap
    metadata:
      name: two
"#;
        let docs = Manifest::from(text).documents().unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["metadata"]["name"], "one");
    }

    #[test]
    fn test_empty_manifest() {
        assert!(Manifest::from("").documents().unwrap().is_empty());
    }

    #[test]
    fn test_scalar_document_rejected() {
        let err = Manifest::from("just a string").documents().unwrap_err();
        assert!(matches!(err, CoreError::InvalidManifest { .. }));
    }

    #[test]
    fn test_invalid_yaml() {
        let err = Manifest::from("kind: [unclosed").documents().unwrap_err();
        assert!(matches!(err, CoreError::YamlParse(_)));
    }

    #[test]
    fn test_static_source() {
        let source = StaticManifests(vec![b"kind: A".to_vec(), b"kind: B".to_vec()]);
        assert_eq!(source.manifests().unwrap().len(), 2);
    }
}
