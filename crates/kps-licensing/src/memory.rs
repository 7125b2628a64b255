//! In-memory remote authority.
//!
//! Used by tests and by the CLI's `memory` backend. It can be switched
//! into an unreachable state or slowed down to exercise the validator's
//! fallback paths.

use async_trait::async_trait;
use kps_core::ports::RemoteAuthority;
use kps_core::{Error, LicenseRecord, MachineRegistration, RecordId, RecordStatus, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryAuthority {
    records: RwLock<Vec<LicenseRecord>>,
    registrations: RwLock<HashMap<String, MachineRegistration>>,
    unreachable: AtomicBool,
    latency_ms: AtomicU64,
}

impl MemoryAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with a network error.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    async fn reach(&self) -> Result<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(Error::Network("memory authority is offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteAuthority for MemoryAuthority {
    async fn find(&self, key: &str, machine_id: &str) -> Result<Option<LicenseRecord>> {
        self.reach().await?;
        let records = self.records.read().await;
        Ok(records
            .iter()
            .find(|r| r.key == key && r.machine_id == machine_id)
            .cloned())
    }

    async fn update_status(
        &self,
        id: RecordId,
        status: RecordStatus,
        transferred_to: Option<&str>,
    ) -> Result<()> {
        self.reach().await?;
        let mut records = self.records.write().await;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| Error::RecordNotFound(id.to_string()))?;
        record.status = status;
        if let Some(target) = transferred_to {
            record.transferred_to = Some(target.to_string());
        }
        Ok(())
    }

    async fn insert(&self, record: &LicenseRecord) -> Result<()> {
        self.reach().await?;
        let mut records = self.records.write().await;
        if records.iter().any(|r| r.id == record.id) {
            return Err(Error::Conflict(record.id));
        }
        records.push(record.clone());
        Ok(())
    }

    async fn upsert_registration(&self, registration: &MachineRegistration) -> Result<()> {
        self.reach().await?;
        self.registrations
            .write()
            .await
            .insert(registration.machine_id.clone(), registration.clone());
        Ok(())
    }

    async fn registration(&self, machine_id: &str) -> Result<Option<MachineRegistration>> {
        self.reach().await?;
        Ok(self.registrations.read().await.get(machine_id).cloned())
    }

    async fn list(&self) -> Result<Vec<LicenseRecord>> {
        self.reach().await?;
        let mut records = self.records.read().await.clone();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    async fn list_registrations(&self) -> Result<Vec<MachineRegistration>> {
        self.reach().await?;
        let mut registrations: Vec<_> = self.registrations.read().await.values().cloned().collect();
        registrations.sort_by(|a, b| a.machine_id.cmp(&b.machine_id));
        Ok(registrations)
    }

    async fn restore(&self, incoming: &[LicenseRecord]) -> Result<usize> {
        self.reach().await?;
        let mut records = self.records.write().await;
        for record in incoming {
            match records.iter_mut().find(|r| r.id == record.id) {
                Some(existing) => *existing = record.clone(),
                None => records.push(record.clone()),
            }
        }
        Ok(incoming.len())
    }

    /// Both writes happen under one lock, and only if `id` is still ACTIVE.
    async fn supersede(
        &self,
        id: RecordId,
        status: RecordStatus,
        transferred_to: Option<&str>,
        replacement: &LicenseRecord,
    ) -> Result<()> {
        self.reach().await?;
        let mut records = self.records.write().await;
        if records.iter().any(|r| r.id == replacement.id) {
            return Err(Error::Conflict(replacement.id));
        }
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| Error::RecordNotFound(id.to_string()))?;
        if record.status != RecordStatus::Active {
            return Err(Error::Conflict(id));
        }
        record.status = status;
        if let Some(target) = transferred_to {
            record.transferred_to = Some(target.to_string());
        }
        records.push(replacement.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
