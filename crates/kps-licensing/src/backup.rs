//! Backup export and import of the authority's contents.

use chrono::{DateTime, Utc};
use kps_core::ports::RemoteAuthority;
use kps_core::{Error, LicenseRecord, MachineRegistration, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

pub const BACKUP_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backup {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub records: Vec<LicenseRecord>,
    #[serde(default)]
    pub registrations: Vec<MachineRegistration>,
}

impl Backup {
    /// Snapshot every record and registration.
    pub async fn export(authority: &dyn RemoteAuthority) -> Result<Self> {
        let records = authority.list().await?;
        let registrations = authority.list_registrations().await?;
        info!(
            records = records.len(),
            registrations = registrations.len(),
            "Exported backup"
        );
        Ok(Self {
            version: BACKUP_VERSION,
            exported_at: Utc::now(),
            records,
            registrations,
        })
    }

    pub async fn write(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    pub async fn read(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let backup: Backup = serde_json::from_str(&content)?;
        if backup.version != BACKUP_VERSION {
            return Err(Error::InvalidRequest(format!(
                "unsupported backup version {} (expected {})",
                backup.version, BACKUP_VERSION
            )));
        }
        Ok(backup)
    }

    /// Write the backup into `authority`. Returns the number of records restored.
    pub async fn import(&self, authority: &dyn RemoteAuthority) -> Result<usize> {
        let restored = authority.restore(&self.records).await?;
        for registration in &self.registrations {
            authority.upsert_registration(registration).await?;
        }
        info!(
            records = restored,
            registrations = self.registrations.len(),
            "Imported backup"
        );
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryAuthority;
    use kps_core::{OwnerDetails, RecordId, RecordStatus};

    fn record(key: &str, status: RecordStatus) -> LicenseRecord {
        LicenseRecord {
            id: RecordId::new(),
            machine_id: "SHOP-AB12-CD34".to_string(),
            key: key.to_string(),
            plan: "PRO".to_string(),
            duration_days: 0.5,
            status,
            created_at: DateTime::from_timestamp_millis(1_767_225_600_000).unwrap(),
            owner: OwnerDetails::default(),
            transferred_to: None,
            price: 0.0,
        }
    }

    #[tokio::test]
    async fn test_export_write_read_import() {
        let source = MemoryAuthority::new();
        source.insert(&record("K1", RecordStatus::Renewed)).await.unwrap();
        source.insert(&record("K2", RecordStatus::Active)).await.unwrap();
        source
            .upsert_registration(&MachineRegistration {
                machine_id: "SHOP-AB12-CD34".to_string(),
                owner: OwnerDetails::default(),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.json");
        let backup = Backup::export(&source).await.unwrap();
        backup.write(&path).await.unwrap();

        let read = Backup::read(&path).await.unwrap();
        assert_eq!(read, backup);

        let target = MemoryAuthority::new();
        assert_eq!(read.import(&target).await.unwrap(), 2);
        assert_eq!(target.list().await.unwrap(), source.list().await.unwrap());
        assert_eq!(target.list_registrations().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_import_twice_does_not_duplicate() {
        let source = MemoryAuthority::new();
        source.insert(&record("K1", RecordStatus::Active)).await.unwrap();
        let backup = Backup::export(&source).await.unwrap();

        let target = MemoryAuthority::new();
        backup.import(&target).await.unwrap();
        backup.import(&target).await.unwrap();
        assert_eq!(target.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_unknown_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.json");
        let future = r#"{"version":2,"exported_at":"2026-01-01T00:00:00Z","records":[]}"#;
        tokio::fs::write(&path, future).await.unwrap();

        assert!(matches!(
            Backup::read(&path).await,
            Err(Error::InvalidRequest(_))
        ));
    }
}
