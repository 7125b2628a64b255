//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the licensing core and its
//! storage adapters: the remote authority that holds license records, and
//! the local trust store that keeps per-install state.

use crate::ids::RecordId;
use crate::record::{LicenseRecord, MachineRegistration, RecordStatus};
use crate::{Error, Result};
use async_trait::async_trait;
use std::fmt;

/// Record store that issued keys are reconciled against.
///
/// `Ok(None)` from [`find`](RemoteAuthority::find) is an authoritative
/// "no such key". `Err` means the store could not be asked.
#[async_trait]
pub trait RemoteAuthority: Send + Sync {
    /// Look up the record for a key issued to a machine.
    async fn find(&self, key: &str, machine_id: &str) -> Result<Option<LicenseRecord>>;

    /// Update the stored status of a record.
    async fn update_status(
        &self,
        id: RecordId,
        status: RecordStatus,
        transferred_to: Option<&str>,
    ) -> Result<()>;

    /// Insert a new record.
    async fn insert(&self, record: &LicenseRecord) -> Result<()>;

    /// Insert or replace the registration for `registration.machine_id`.
    async fn upsert_registration(&self, registration: &MachineRegistration) -> Result<()>;

    /// Get the registration for a machine.
    async fn registration(&self, machine_id: &str) -> Result<Option<MachineRegistration>>;

    /// List all records, oldest first.
    async fn list(&self) -> Result<Vec<LicenseRecord>>;

    /// List all registrations.
    async fn list_registrations(&self) -> Result<Vec<MachineRegistration>>;

    /// Write records back by id, replacing existing ones. Returns the count written.
    async fn restore(&self, records: &[LicenseRecord]) -> Result<usize>;

    /// Mark `id` as superseded and store its replacement.
    ///
    /// The default runs two sequential writes. Stores with transactions
    /// should override this so both writes land or neither does.
    async fn supersede(
        &self,
        id: RecordId,
        status: RecordStatus,
        transferred_to: Option<&str>,
        replacement: &LicenseRecord,
    ) -> Result<()> {
        self.update_status(id, status, transferred_to).await?;
        self.insert(replacement)
            .await
            .map_err(|e| Error::PartialSupersede {
                superseded: id,
                reason: e.to_string(),
            })
    }

    /// Short adapter name for logs.
    fn name(&self) -> &str;
}

/// Named slots in the local trust store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrustSlot {
    MachineId,
    LicenseKey,
    AdminPassword,
    Profile,
}

impl TrustSlot {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrustSlot::MachineId => "machine_id",
            TrustSlot::LicenseKey => "license_key",
            TrustSlot::AdminPassword => "admin_password",
            TrustSlot::Profile => "profile",
        }
    }
}

impl fmt::Display for TrustSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persistent per-install key-value store.
pub trait TrustStore: Send + Sync {
    fn get(&self, slot: TrustSlot) -> Result<Option<String>>;

    fn set(&self, slot: TrustSlot, value: &str) -> Result<()>;

    fn remove(&self, slot: TrustSlot) -> Result<()>;
}
