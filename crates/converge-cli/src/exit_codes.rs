//! Standard exit codes for CLI operations
//!
//! These exit codes follow Unix conventions and sysexits.h where applicable.

/// Success - operation completed without errors
pub const SUCCESS: u8 = 0;

/// General error - unspecified failure
pub const ERROR: u8 = 1;

/// Manifest error - unparseable, several resources, missing identity
pub const MANIFEST_ERROR: u8 = 2;

/// API error - the server rejected or failed the request
pub const API_ERROR: u8 = 3;

/// Discovery error - apiVersion/kind not served by the cluster
pub const DISCOVERY_ERROR: u8 = 4;

/// IO error - file not found, permission denied, etc.
pub const IO_ERROR: u8 = 5;

/// Configuration error - kubeconfig or in-cluster credentials unusable
pub const CONFIG_ERROR: u8 = 78;
