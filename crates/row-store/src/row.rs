use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::Result;

/// Version number of a row, used for compare-and-swap writes.
///
/// A row is created at version 1 and every successful update increments it
/// by one. Version 0 never appears on a stored row.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the placeholder version (0) of a row that does not exist.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the version (1) assigned to a freshly inserted row.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Version> for i64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

/// A stored row as returned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// The logical table the row belongs to (e.g. "orders").
    pub table: String,

    /// The row key, unique within its table.
    pub key: String,

    /// The current version of the row.
    pub version: Version,

    /// The row payload as JSON.
    pub data: serde_json::Value,

    /// When the row was last written.
    pub updated_at: DateTime<Utc>,
}

impl Row {
    /// Deserializes the row payload into a typed value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<Versioned<T>> {
        let value = serde_json::from_value(self.data.clone())?;
        Ok(Versioned {
            key: self.key.clone(),
            version: self.version,
            value,
        })
    }
}

/// A typed row value together with the version it was read at.
///
/// The version is what a subsequent compare-and-swap must present.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub key: String,
    pub version: Version,
    pub value: T,
}
