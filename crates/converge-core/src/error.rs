//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Failed to parse manifest: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to encode JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid manifest: {message}")]
    InvalidManifest { message: String },

    #[error("no kind is registered for the type {type_name}")]
    UnregisteredType { type_name: &'static str },

    #[error("Serialization error: {message}")]
    Serialize { message: String },

    #[error("Notification failed: {message}")]
    Notify { message: String },
}

impl serde::ser::Error for CoreError {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        CoreError::Serialize {
            message: msg.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::UnregisteredType {
            type_name: "lab::ClusterDeployment",
        };
        insta::assert_snapshot!(err.to_string(), @"no kind is registered for the type lab::ClusterDeployment");

        let err = <CoreError as serde::ser::Error>::custom("key must be a string");
        insta::assert_snapshot!(err.to_string(), @"Serialization error: key must be a string");
    }
}
