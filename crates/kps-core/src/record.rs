//! License records held by the remote authority.

use crate::ids::RecordId;
use crate::Result;
use crate::term::Term;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Stored status of a license record.
///
/// `EXPIRED` is never stored; see [`LicenseRecord::effective_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordStatus {
    Active,
    Transferred,
    Renewed,
    #[serde(other)]
    Unknown,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Active => "ACTIVE",
            RecordStatus::Transferred => "TRANSFERRED",
            RecordStatus::Renewed => "RENEWED",
            RecordStatus::Unknown => "UNKNOWN",
        }
    }

    /// Parse a stored status; unrecognised values map to `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "ACTIVE" => RecordStatus::Active,
            "TRANSFERRED" => RecordStatus::Transferred,
            "RENEWED" => RecordStatus::Renewed,
            _ => RecordStatus::Unknown,
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status as seen at a given instant, with expiry folded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EffectiveStatus {
    Active,
    Transferred,
    Renewed,
    Expired,
    Unknown,
}

impl fmt::Display for EffectiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EffectiveStatus::Active => "ACTIVE",
            EffectiveStatus::Transferred => "TRANSFERRED",
            EffectiveStatus::Renewed => "RENEWED",
            EffectiveStatus::Expired => "EXPIRED",
            EffectiveStatus::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Nullable columns read as the type's default.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Who a license was sold to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerDetails {
    #[serde(default, deserialize_with = "null_as_default")]
    pub shop_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub owner_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub phone: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub address: String,
}

impl OwnerDetails {
    pub fn is_empty(&self) -> bool {
        self.shop_name.is_empty()
            && self.owner_name.is_empty()
            && self.phone.is_empty()
            && self.address.is_empty()
    }
}

/// A license grant as stored by the remote authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LicenseRecord {
    pub id: RecordId,
    pub machine_id: String,
    pub key: String,
    pub plan: String,
    /// Fractional days; sub-day values are trial grants.
    pub duration_days: f64,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub owner: OwnerDetails,
    #[serde(default)]
    pub transferred_to: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub price: f64,
}

impl LicenseRecord {
    pub fn term(&self) -> Result<Term> {
        Term::from_days(self.duration_days)
    }

    /// `None` when `duration_days` is out of range or the expiry would
    /// fall outside the representable calendar.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let term = self.term().ok()?;
        self.created_at.checked_add_signed(term.as_delta())
    }

    /// Entitlement left at `now`, clamped at zero. A record without a
    /// usable expiry has none left.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Term {
        match self.expires_at() {
            Some(expiry) => Term::from_millis((expiry - now).num_milliseconds().max(0)),
            None => Term::ZERO,
        }
    }

    /// Stored status with expiry applied. An ACTIVE record whose expiry
    /// cannot be computed reads as `Unknown`.
    pub fn effective_status(&self, now: DateTime<Utc>) -> EffectiveStatus {
        match self.status {
            RecordStatus::Active => match self.expires_at() {
                Some(expiry) if expiry < now => EffectiveStatus::Expired,
                Some(_) => EffectiveStatus::Active,
                None => EffectiveStatus::Unknown,
            },
            RecordStatus::Transferred => EffectiveStatus::Transferred,
            RecordStatus::Renewed => EffectiveStatus::Renewed,
            RecordStatus::Unknown => EffectiveStatus::Unknown,
        }
    }
}

/// Profile an install reports about itself, one per machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineRegistration {
    pub machine_id: String,
    #[serde(flatten)]
    pub owner: OwnerDetails,
    pub updated_at: DateTime<Utc>,
}
