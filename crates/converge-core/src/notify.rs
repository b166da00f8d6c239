//! Post-provisioning notifications
//!
//! After cluster objects are applied, a [`Notifier`] receives a flat string
//! map describing the result. Delivery (email, chat, ...) is up to the
//! implementation; [`LogNotifier`] just logs the fields.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;

pub const CONSOLE_URL: &str = "console_url";
pub const COMPANY: &str = "company";
pub const CLUSTER_ID: &str = "cluster_id";
pub const TIMEZONE: &str = "timezone";
const CREDENTIAL_PREFIX: &str = "credentials.";

/// String map handed to a [`Notifier`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationFields(BTreeMap<String, String>);

impl NotificationFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn console_url(self, url: impl Into<String>) -> Self {
        self.with(CONSOLE_URL, url)
    }

    pub fn company(self, name: impl Into<String>) -> Self {
        self.with(COMPANY, name)
    }

    pub fn cluster_id(self, id: impl Into<String>) -> Self {
        self.with(CLUSTER_ID, id)
    }

    pub fn timezone(self, tz: impl Into<String>) -> Self {
        self.with(TIMEZONE, tz)
    }

    /// Link to a credential (kubeadmin password, kubeconfig, ...)
    pub fn credential_link(self, name: &str, url: impl Into<String>) -> Self {
        self.with(&format!("{CREDENTIAL_PREFIX}{name}"), url)
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn credential_links(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().filter_map(|(k, v)| {
            k.strip_prefix(CREDENTIAL_PREFIX)
                .map(|name| (name, v.as_str()))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Receives notification fields after a successful apply
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, fields: &NotificationFields) -> Result<()>;
}

/// Emits the fields as a `tracing` event
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, fields: &NotificationFields) -> Result<()> {
        tracing::info!(
            cluster_id = fields.get(CLUSTER_ID).unwrap_or_default(),
            company = fields.get(COMPANY).unwrap_or_default(),
            console_url = fields.get(CONSOLE_URL).unwrap_or_default(),
            timezone = fields.get(TIMEZONE).unwrap_or_default(),
            "cluster ready"
        );
        for (name, url) in fields.credential_links() {
            tracing::info!(credential = name, url, "credential link");
        }
        Ok(())
    }
}
