//! Server-generated timestamps
//!
//! `MetaTime` mirrors the Kubernetes `metav1.Time` wire format: RFC 3339 with
//! second precision. Its zero value means "no time has been set".

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Timestamp whose zero value is omitted by [`crate::serializer::Serializer`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MetaTime(pub Option<DateTime<Utc>>);

impl MetaTime {
    /// Newtype name used by the serializer to recognize this field type
    pub const NEWTYPE_NAME: &'static str = "converge.MetaTime";

    /// The zero value
    pub const fn zero() -> Self {
        Self(None)
    }

    /// Current time truncated to seconds
    pub fn now() -> Self {
        Self::from(Utc::now())
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_none()
    }

    /// Wire representation (`None` for the zero value)
    pub fn to_rfc3339(&self) -> Option<String> {
        self.0
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
    }
}

impl From<DateTime<Utc>> for MetaTime {
    fn from(t: DateTime<Utc>) -> Self {
        // the wire format has second precision
        let secs = t.timestamp();
        Self(DateTime::from_timestamp(secs, 0).or(Some(t)))
    }
}

impl Serialize for MetaTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_newtype_struct(Self::NEWTYPE_NAME, &self.to_rfc3339())
    }
}

impl<'de> Deserialize<'de> for MetaTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw.as_deref() {
            None | Some("") => Ok(Self::zero()),
            Some(s) => DateTime::parse_from_rfc3339(s)
                .map(|t| Self(Some(t.with_timezone(&Utc))))
                .map_err(serde::de::Error::custom),
        }
    }
}
