//! Display formatting for CLI output

use clap::ValueEnum;
use console::style;
use converge_core::ApplyResult;
use converge_kube::{PowerState, ResourceInfo};
use serde_json::{Value, json};

use crate::error::{CliError, Result};

/// Output format for `info`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Yaml,
    Json,
}

/// `kind/name` the way kubectl prints it
pub fn object_ref(info: &ResourceInfo) -> String {
    kind_ref(&info.kind, &info.name)
}

fn kind_ref(kind: &str, name: &str) -> String {
    format!("{}/{name}", kind.to_lowercase())
}

pub fn print_result(info: &ResourceInfo, result: ApplyResult) {
    let marker = match result {
        ApplyResult::Created => style("+").green().bold(),
        ApplyResult::Configured => style("~").yellow().bold(),
        ApplyResult::Unchanged => style("=").dim(),
        ApplyResult::Unknown => style("?").red().bold(),
    };
    println!("{} {} {}", marker, style(object_ref(info)).cyan(), result);
}

pub fn print_deleted(kind: &str, name: &str) {
    println!(
        "{} {} deleted",
        style("-").red().bold(),
        style(kind_ref(kind, name)).cyan()
    );
}

pub fn print_patched(kind: &str, name: &str) {
    println!(
        "{} {} patched",
        style("~").yellow().bold(),
        style(kind_ref(kind, name)).cyan()
    );
}

pub fn print_power_state(name: &str, state: PowerState) {
    println!(
        "{} {} {}",
        style("~").yellow().bold(),
        style(kind_ref("ClusterDeployment", name)).cyan(),
        state.as_str().to_lowercase()
    );
}

/// Identity of a resource as structured data
pub fn info_value(info: &ResourceInfo) -> Value {
    let mut value = json!({
        "name": info.name,
        "apiVersion": info.api_version,
        "kind": info.kind,
    });
    if let Some(ns) = &info.namespace {
        value["namespace"] = json!(ns);
    }
    if let Some(mapping) = &info.mapping {
        value["resource"] = json!(mapping.resource);
        value["namespaced"] = json!(mapping.namespaced);
        if !mapping.short_names.is_empty() {
            value["shortNames"] = json!(mapping.short_names);
        }
    }
    value
}

pub fn print_info(info: &ResourceInfo, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            println!("{:<12} {}", style("Name:").bold(), info.name);
            if let Some(ns) = &info.namespace {
                println!("{:<12} {}", style("Namespace:").bold(), ns);
            }
            println!("{:<12} {}", style("APIVersion:").bold(), info.api_version);
            println!("{:<12} {}", style("Kind:").bold(), info.kind);
            if let Some(mapping) = &info.mapping {
                let scope = if mapping.namespaced { "Namespaced" } else { "Cluster" };
                println!("{:<12} {}", style("Resource:").bold(), mapping.resource);
                println!("{:<12} {}", style("Scope:").bold(), scope);
            }
        }
        OutputFormat::Yaml => {
            let text = serde_yaml::to_string(&info_value(info))
                .map_err(|e| CliError::Internal { message: e.to_string() })?;
            print!("{text}");
        }
        OutputFormat::Json => {
            let text = serde_json::to_string_pretty(&info_value(info))
                .map_err(|e| CliError::Internal { message: e.to_string() })?;
            println!("{text}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge_kube::RestMapping;
    use kube::api::{DynamicObject, ObjectMeta};

    fn info(mapping: Option<RestMapping>) -> ResourceInfo {
        ResourceInfo {
            name: "lab-1-settings".into(),
            namespace: Some("hive".into()),
            api_version: "v1".into(),
            kind: "ConfigMap".into(),
            resource: mapping.as_ref().map(|m| m.resource.clone()).unwrap_or_default(),
            mapping,
            object: DynamicObject {
                types: None,
                metadata: ObjectMeta::default(),
                data: Value::Null,
            },
        }
    }

    fn configmaps() -> RestMapping {
        RestMapping {
            group: String::new(),
            version: "v1".into(),
            kind: "ConfigMap".into(),
            resource: "configmaps".into(),
            singular: "configmap".into(),
            namespaced: true,
            short_names: vec!["cm".into()],
        }
    }

    #[test]
    fn test_object_ref() {
        assert_eq!(object_ref(&info(None)), "configmap/lab-1-settings");
        // same form whether or not the kind was resolved against a cluster
        assert_eq!(object_ref(&info(Some(configmaps()))), "configmap/lab-1-settings");
        assert_eq!(kind_ref("ClusterDeployment", "lab-1"), "clusterdeployment/lab-1");
    }

    #[test]
    fn test_info_value() {
        let value = info_value(&info(Some(configmaps())));
        assert_eq!(value["resource"], "configmaps");
        assert_eq!(value["namespace"], "hive");
        assert_eq!(value["namespaced"], true);
        assert_eq!(value["shortNames"], json!(["cm"]));

        let value = info_value(&info(None));
        assert!(value.get("resource").is_none());
    }
}
