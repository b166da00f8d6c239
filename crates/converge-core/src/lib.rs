//! Converge Core - cluster-independent building blocks
//!
//! This crate provides:
//! - Manifest parsing (multi-document YAML/JSON, list flattening)
//! - An explicit type registry ([`Scheme`]) mapping Rust types to kinds
//! - A JSON serializer that omits zero-valued timestamps
//! - Apply outcomes and the change tracker
//! - Notification interfaces used after provisioning

pub mod error;
pub mod manifest;
pub mod notify;
pub mod result;
pub mod scheme;
pub mod serializer;
pub mod time;

pub use error::{CoreError, Result};
pub use manifest::{Manifest, ManifestSource, StaticManifests};
pub use notify::{LogNotifier, NotificationFields, Notifier};
pub use result::{ApplyResult, ChangeTracker};
pub use scheme::{Scheme, TypeMeta};
pub use serializer::{Serializer, serialize};
pub use time::MetaTime;
