//! Provision command - apply a set of manifests, then notify

use converge_core::{
    ApplyResult, LogNotifier, Manifest, ManifestSource, NotificationFields, Notifier, StaticManifests,
};
use std::path::PathBuf;

use crate::context::{Context, read_manifest};
use crate::display;
use crate::error::{CliError, Result};

/// Fields handed to the notifier after a successful run
#[derive(Debug, Clone, Default)]
pub struct Notification {
    pub console_url: Option<String>,
    pub company: Option<String>,
    pub cluster_id: Option<String>,
    pub timezone: Option<String>,
    pub credentials: Vec<(String, String)>,
}

impl Notification {
    pub fn fields(&self) -> NotificationFields {
        let mut fields = NotificationFields::new();
        if let Some(url) = &self.console_url {
            fields = fields.console_url(url);
        }
        if let Some(company) = &self.company {
            fields = fields.company(company);
        }
        if let Some(id) = &self.cluster_id {
            fields = fields.cluster_id(id);
        }
        if let Some(tz) = &self.timezone {
            fields = fields.timezone(tz);
        }
        for (name, url) in &self.credentials {
            fields = fields.credential_link(name, url);
        }
        fields
    }
}

/// `NAME=URL` credential link
pub fn parse_credential(value: &str) -> std::result::Result<(String, String), String> {
    match value.split_once('=') {
        Some((name, url)) if !name.is_empty() && !url.is_empty() => Ok((name.to_string(), url.to_string())),
        _ => Err(format!("expected NAME=URL, got '{value}'")),
    }
}

/// Split every file into single-resource manifests
fn load(files: &[PathBuf]) -> Result<StaticManifests> {
    let mut manifests = Vec::new();
    for file in files {
        let bytes = read_manifest(file)?;
        for document in Manifest::new(&bytes).documents()? {
            manifests.push(serde_json::to_vec(&document).map_err(|e| CliError::Internal {
                message: e.to_string(),
            })?);
        }
    }
    Ok(StaticManifests(manifests))
}

pub async fn run(context: &Context, files: &[PathBuf], notification: &Notification) -> Result<()> {
    let source = load(files)?;
    let manifests = source.manifests()?;
    tracing::info!(resources = manifests.len(), "provisioning");

    let mut changed = 0;
    for manifest in &manifests {
        let info = context.helper.info(manifest).await?;
        let result = context.helper.apply(manifest).await?;
        if result.is_change() {
            changed += 1;
        }
        display::print_result(&info, result);
        if result == ApplyResult::Unknown {
            tracing::warn!(resource = %display::object_ref(&info), "apply outcome unknown");
        }
    }
    tracing::info!(resources = manifests.len(), changed, "provisioned");

    let fields = notification.fields();
    if !fields.is_empty() {
        LogNotifier.notify(&fields).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_credential() {
        assert_eq!(
            parse_credential("kubeadmin=https://vault.example.com/s/1").unwrap(),
            ("kubeadmin".to_string(), "https://vault.example.com/s/1".to_string())
        );
        assert!(parse_credential("kubeadmin").is_err());
        assert!(parse_credential("=https://x").is_err());
    }

    #[test]
    fn test_notification_fields() {
        let notification = Notification {
            company: Some("Acme".into()),
            cluster_id: Some("lab-1".into()),
            credentials: vec![("kubeconfig".into(), "https://vault.example.com/s/2".into())],
            ..Default::default()
        };
        let fields = notification.fields();
        assert_eq!(fields.get("company"), Some("Acme"));
        assert_eq!(fields.credential_links().count(), 1);
        assert!(Notification::default().fields().is_empty());
    }

    #[test]
    fn test_load_splits_documents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lab.yaml");
        std::fs::write(
            &path,
            "apiVersion: v1\nkind: Namespace\nmetadata:\n  name: lab-1\n---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: settings\n",
        )
        .unwrap();

        let manifests = load(&[path]).unwrap().manifests().unwrap();
        assert_eq!(manifests.len(), 2);
        let second: serde_json::Value = serde_json::from_slice(&manifests[1]).unwrap();
        assert_eq!(second["kind"], "ConfigMap");
    }
}
