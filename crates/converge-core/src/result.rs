//! Outcome of a reconciliation call

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What a helper operation did to the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyResult {
    Created,
    Configured,
    Unchanged,
    Unknown,
}

impl ApplyResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Configured => "configured",
            Self::Unchanged => "unchanged",
            Self::Unknown => "unknown",
        }
    }

    /// Whether the cluster was modified
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Created | Self::Configured)
    }
}

impl fmt::Display for ApplyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApplyResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "configured" => Ok(Self::Configured),
            "unchanged" => Ok(Self::Unchanged),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown apply result '{other}'")),
        }
    }
}

/// Collects outcome signals emitted while applying a manifest
///
/// The final result is the single recorded signal; zero or several signals
/// collapse to [`ApplyResult::Unknown`].
#[derive(Debug, Clone, Default)]
pub struct ChangeTracker {
    signals: Vec<ApplyResult>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, result: ApplyResult) {
        self.signals.push(result);
    }

    pub fn signals(&self) -> &[ApplyResult] {
        &self.signals
    }

    pub fn result(&self) -> ApplyResult {
        match self.signals.as_slice() {
            [only] => *only,
            _ => ApplyResult::Unknown,
        }
    }
}
