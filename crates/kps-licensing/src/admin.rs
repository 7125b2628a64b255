//! Admin password gate for the issuing surface.

use kps_core::ports::{TrustSlot, TrustStore};
use kps_core::{Error, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// Checks admin passwords against the trust store.
///
/// Until a password has been set, the configured default is accepted.
pub struct AdminGate {
    store: Arc<dyn TrustStore>,
    default_password: String,
}

impl AdminGate {
    pub fn new(store: Arc<dyn TrustStore>, default_password: impl Into<String>) -> Self {
        Self {
            store,
            default_password: default_password.into(),
        }
    }

    fn current(&self) -> Result<String> {
        Ok(self
            .store
            .get(TrustSlot::AdminPassword)?
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| self.default_password.clone()))
    }

    pub fn verify(&self, candidate: &str) -> Result<()> {
        if candidate == self.current()? {
            Ok(())
        } else {
            warn!("Rejected admin password");
            Err(Error::AdminDenied)
        }
    }

    /// Replace the admin password after checking the current one.
    pub fn set_password(&self, current: &str, new_password: &str) -> Result<()> {
        self.verify(current)?;
        if new_password.is_empty() {
            return Err(Error::InvalidRequest(
                "admin password cannot be empty".to_string(),
            ));
        }
        self.store.set(TrustSlot::AdminPassword, new_password)?;
        info!("Admin password changed");
        Ok(())
    }

    pub fn is_default(&self) -> Result<bool> {
        Ok(self.current()? == self.default_password)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryTrustStore;

    fn gate() -> AdminGate {
        AdminGate::new(Arc::new(MemoryTrustStore::default()), "admin")
    }

    #[test]
    fn test_default_password_until_changed() {
        let gate = gate();
        assert!(gate.verify("admin").is_ok());
        assert!(gate.is_default().unwrap());
        assert!(matches!(gate.verify("nope"), Err(Error::AdminDenied)));
    }

    #[test]
    fn test_set_password() {
        let gate = gate();
        gate.set_password("admin", "s3cret").unwrap();
        assert!(gate.verify("s3cret").is_ok());
        assert!(gate.verify("admin").is_err());
        assert!(!gate.is_default().unwrap());
    }

    #[test]
    fn test_set_password_requires_current() {
        let gate = gate();
        assert!(matches!(
            gate.set_password("wrong", "s3cret"),
            Err(Error::AdminDenied)
        ));
        assert!(matches!(
            gate.set_password("admin", ""),
            Err(Error::InvalidRequest(_))
        ));
        assert!(gate.verify("admin").is_ok());
    }
}
