//! CLI error types with exit code handling
//!
//! This module provides a unified error type for CLI operations that
//! maps errors to appropriate exit codes.

use converge_core::CoreError;
use converge_kube::KubeError;
use miette::Diagnostic;
use thiserror::Error;

use crate::exit_codes;

/// CLI-specific error type that includes exit code information
#[derive(Error, Debug, Diagnostic, Clone)]
pub enum CliError {
    /// Manifest could not be used as given
    #[error("Manifest error: {message}")]
    #[diagnostic(code(converge::cli::manifest))]
    Manifest {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// The cluster does not serve the requested kind
    #[error("Discovery error: {message}")]
    #[diagnostic(
        code(converge::cli::discovery),
        help("check the apiVersion and kind, or remove the discovery cache to force a refresh")
    )]
    Discovery { message: String },

    /// Server-side or transport failure
    #[error("API error: {message}")]
    #[diagnostic(code(converge::cli::api))]
    Api { message: String },

    /// Credentials could not be loaded
    #[error("Configuration error: {message}")]
    #[diagnostic(
        code(converge::cli::config),
        help("pass --kubeconfig, set KUBECONFIG, or run inside a pod")
    )]
    Config { message: String },

    /// IO error (file not found, permissions, etc.)
    #[error("IO error: {message}")]
    #[diagnostic(code(converge::cli::io))]
    Io { message: String },

    /// Internal error (runtime, unexpected failure)
    #[error("Internal error: {message}")]
    #[diagnostic(code(converge::cli::internal))]
    Internal { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Manifest { .. } => exit_codes::MANIFEST_ERROR,
            CliError::Discovery { .. } => exit_codes::DISCOVERY_ERROR,
            CliError::Api { .. } => exit_codes::API_ERROR,
            CliError::Config { .. } => exit_codes::CONFIG_ERROR,
            CliError::Io { .. } => exit_codes::IO_ERROR,
            CliError::Internal { .. } => exit_codes::ERROR,
        }
    }

    /// Create a manifest error
    pub fn manifest(message: impl Into<String>) -> Self {
        Self::Manifest {
            message: message.into(),
            help: None,
        }
    }

    /// Create a manifest error with help text
    pub fn manifest_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Manifest {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Notify { message } => CliError::Internal { message },
            other => CliError::manifest(other.to_string()),
        }
    }
}

impl From<KubeError> for CliError {
    fn from(err: KubeError) -> Self {
        let message = err.to_string();
        match err.root() {
            KubeError::MalformedManifest { .. } => CliError::manifest_with_help(
                message,
                "split the file so that each document holds one resource, or use `converge provision`",
            ),
            KubeError::InvalidPatchType(_) => {
                CliError::manifest_with_help(message, "use --type strategic, merge or json")
            }
            KubeError::InvalidManifest(_) | KubeError::Core(_) | KubeError::Serialization(_) => {
                CliError::manifest(message)
            }
            KubeError::Discovery { .. } => CliError::Discovery { message },
            KubeError::Kubeconfig(_) | KubeError::InvalidConfig(_) => CliError::Config { message },
            KubeError::Io(_) => CliError::Io { message },
            _ => CliError::Api { message },
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kube_errors_map_to_exit_codes() {
        let err: CliError = KubeError::MalformedManifest { count: 2 }.into();
        assert_eq!(err.exit_code(), exit_codes::MANIFEST_ERROR);

        let err: CliError = KubeError::Discovery {
            group_version: "example.io/v1".into(),
            kind: "Gizmo".into(),
            message: "no matches".into(),
        }
        .context("resolve", "example.io/v1/Gizmo")
        .into();
        assert_eq!(err.exit_code(), exit_codes::DISCOVERY_ERROR);

        let err: CliError = KubeError::InvalidConfig("no server".into()).into();
        assert_eq!(err.exit_code(), exit_codes::CONFIG_ERROR);

        let err: CliError = KubeError::NotFound {
            resource: "configmaps".into(),
            name: "a".into(),
        }
        .into();
        assert_eq!(err.exit_code(), exit_codes::API_ERROR);
    }

    #[test]
    fn test_context_kept_in_message() {
        let err: CliError = KubeError::InvalidPatchType("replace".into())
            .context("patch", "configmaps/a")
            .into();
        insta::assert_snapshot!(err.to_string(), @"Manifest error: failed to patch configmaps/a: invalid patch type 'replace': expected 'strategic', 'merge' or 'json'");
    }
}
