//! Strongly-typed identifiers for license records.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

const PREFIX: &str = "lic";

/// Identifier of a [`LicenseRecord`](crate::LicenseRecord).
///
/// Serialized as a bare UUID; displayed as `lic_<uuid>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", PREFIX, self.0)
    }
}

impl std::str::FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let uuid_str = s.strip_prefix("lic_").unwrap_or(s);
        Ok(Self(Uuid::parse_str(uuid_str)?))
    }
}
