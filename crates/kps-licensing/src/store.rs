//! Local trust store implementations.

use kps_core::ports::{TrustSlot, TrustStore};
use kps_core::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

const STORE_FILE: &str = "trust.json";

/// Trust store persisted as a JSON document in the data directory.
///
/// The whole document is rewritten on every change through a temp file and
/// a rename, so a crash leaves either the old or the new contents.
pub struct FileTrustStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
}

impl FileTrustStore {
    /// Open (or create) the store under `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| {
            Error::Storage(format!("cannot create {}: {}", dir.display(), e))
        })?;
        let path = dir.join(STORE_FILE);

        let entries = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| {
                Error::Storage(format!("cannot read {}: {}", path.display(), e))
            })?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content).map_err(|e| {
                    Error::Storage(format!("corrupt trust store {}: {}", path.display(), e))
                })?
            }
        } else {
            BTreeMap::new()
        };

        debug!(path = %path.display(), entries = entries.len(), "Opened trust store");
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let content = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)
            .and_then(|_| std::fs::rename(&tmp, &self.path))
            .map_err(|e| Error::Storage(format!("cannot write {}: {}", self.path.display(), e)))
    }

    fn update<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<String, String>),
    {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| Error::Storage("trust store lock poisoned".to_string()))?;
        let mut next = entries.clone();
        change(&mut next);
        self.persist(&next)?;
        *entries = next;
        Ok(())
    }
}

impl TrustStore for FileTrustStore {
    fn get(&self, slot: TrustSlot) -> Result<Option<String>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| Error::Storage("trust store lock poisoned".to_string()))?;
        Ok(entries.get(slot.as_str()).cloned())
    }

    fn set(&self, slot: TrustSlot, value: &str) -> Result<()> {
        self.update(|entries| {
            entries.insert(slot.as_str().to_string(), value.to_string());
        })?;
        debug!(slot = %slot, "Trust store updated");
        Ok(())
    }

    fn remove(&self, slot: TrustSlot) -> Result<()> {
        self.update(|entries| {
            entries.remove(slot.as_str());
        })
    }
}

/// Volatile trust store for tests and throwaway sessions.
#[derive(Default)]
pub struct MemoryTrustStore {
    entries: RwLock<HashMap<TrustSlot, String>>,
}

impl TrustStore for MemoryTrustStore {
    fn get(&self, slot: TrustSlot) -> Result<Option<String>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| Error::Storage("trust store lock poisoned".to_string()))?;
        Ok(entries.get(&slot).cloned())
    }

    fn set(&self, slot: TrustSlot, value: &str) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| Error::Storage("trust store lock poisoned".to_string()))?;
        entries.insert(slot, value.to_string());
        Ok(())
    }

    fn remove(&self, slot: TrustSlot) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| Error::Storage("trust store lock poisoned".to_string()))?;
        entries.remove(&slot);
        Ok(())
    }
}
