//! Per-install machine fingerprint.
//!
//! The fingerprint is random, generated on first start and kept in the
//! trust store for the life of the install. It is not derived from
//! hardware, so it only changes if the store is wiped.

use kps_core::ports::{TrustSlot, TrustStore};
use kps_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;
use uuid::Uuid;

/// Stable identifier of one install.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MachineFingerprint(String);

impl MachineFingerprint {
    /// Wrap an existing fingerprint in canonical (trimmed, uppercase) form.
    pub fn new(id: &str) -> Self {
        Self(id.trim().to_uppercase())
    }

    /// Generate a fresh `XXXX-XXXX-XXXX-XXXX` fingerprint from 64 random bits.
    pub fn generate() -> Self {
        let hex = Uuid::new_v4().simple().to_string().to_uppercase();
        // Skip the version and variant nibbles; hex[0..8] and hex[20..28] are fully random.
        let bits = format!("{}{}", &hex[0..8], &hex[20..28]);
        Self(format!(
            "{}-{}-{}-{}",
            &bits[0..4],
            &bits[4..8],
            &bits[8..12],
            &bits[12..16]
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MachineFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MachineFingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Read the stored fingerprint, creating and persisting one if absent.
///
/// A storage failure here is fatal for the caller: nothing can be
/// licensed without a stable fingerprint.
pub fn get_or_create(store: &dyn TrustStore) -> Result<MachineFingerprint> {
    if let Some(existing) = store.get(TrustSlot::MachineId)?
        && !existing.trim().is_empty()
    {
        return Ok(MachineFingerprint::new(&existing));
    }

    let fingerprint = MachineFingerprint::generate();
    store
        .set(TrustSlot::MachineId, fingerprint.as_str())
        .map_err(|e| Error::Storage(format!("cannot persist machine fingerprint: {}", e)))?;
    info!(machine_id = %fingerprint, "Generated machine fingerprint");
    Ok(fingerprint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryTrustStore;

    #[test]
    fn test_generated_shape() {
        let fp = MachineFingerprint::generate();
        let groups: Vec<&str> = fp.as_str().split('-').collect();
        assert_eq!(groups.len(), 4);
        for group in groups {
            assert_eq!(group.len(), 4);
            assert!(group.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
        }
    }

    #[test]
    fn test_generated_fingerprints_differ() {
        assert_ne!(MachineFingerprint::generate(), MachineFingerprint::generate());
    }

    #[test]
    fn test_new_canonicalizes() {
        assert_eq!(MachineFingerprint::new("  shop-ab12 ").as_str(), "SHOP-AB12");
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let store = MemoryTrustStore::default();
        let first = get_or_create(&store).unwrap();
        let second = get_or_create(&store).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            store.get(TrustSlot::MachineId).unwrap().as_deref(),
            Some(first.as_str())
        );
    }

    #[test]
    fn test_get_or_create_keeps_existing() {
        let store = MemoryTrustStore::default();
        store.set(TrustSlot::MachineId, "SHOP-AB12-CD34").unwrap();
        assert_eq!(get_or_create(&store).unwrap().as_str(), "SHOP-AB12-CD34");
    }

    #[test]
    fn test_blank_stored_value_is_replaced() {
        let store = MemoryTrustStore::default();
        store.set(TrustSlot::MachineId, "   ").unwrap();
        let fp = get_or_create(&store).unwrap();
        assert_eq!(fp.as_str().len(), 19);
    }
}
