//! Client-side license context.
//!
//! Built once at startup and passed to whatever needs to know whether the
//! install is licensed. Only the raw key is persisted; the entitlement is
//! recomputed from it on [`open`](LicenseContext::open) and after every
//! change.

use crate::machine::{self, MachineFingerprint};
use crate::types::ValidationResult;
use crate::validator::LicenseValidator;
use chrono::{DateTime, Utc};
use kps_core::ports::{TrustSlot, TrustStore};
use kps_core::{MachineRegistration, OwnerDetails, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// What the install is entitled to right now.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EntitlementState {
    pub is_licensed: bool,
    pub expiry: Option<DateTime<Utc>>,
    pub plan: Option<String>,
}

impl EntitlementState {
    fn from_result(result: &ValidationResult) -> Self {
        if result.valid {
            Self {
                is_licensed: true,
                expiry: result.expiry,
                plan: result.plan.clone(),
            }
        } else {
            Self::default()
        }
    }
}

pub struct LicenseContext {
    store: Arc<dyn TrustStore>,
    validator: LicenseValidator,
    fingerprint: MachineFingerprint,
    state: EntitlementState,
    last: Option<ValidationResult>,
    free_option_limit: usize,
}

impl LicenseContext {
    /// Load the fingerprint (creating it on first run) and validate any stored key.
    pub async fn open(
        store: Arc<dyn TrustStore>,
        validator: LicenseValidator,
        free_option_limit: usize,
    ) -> Result<Self> {
        let fingerprint = machine::get_or_create(store.as_ref())?;
        let mut context = Self {
            store,
            validator,
            fingerprint,
            state: EntitlementState::default(),
            last: None,
            free_option_limit,
        };
        context.refresh().await?;
        Ok(context)
    }

    pub fn fingerprint(&self) -> &MachineFingerprint {
        &self.fingerprint
    }

    pub fn state(&self) -> &EntitlementState {
        &self.state
    }

    /// Result of the most recent validation, if a key was stored.
    pub fn last_result(&self) -> Option<&ValidationResult> {
        self.last.as_ref()
    }

    pub fn stored_key(&self) -> Result<Option<String>> {
        self.store.get(TrustSlot::LicenseKey)
    }

    /// Re-validate the stored key.
    pub async fn refresh(&mut self) -> Result<&EntitlementState> {
        match self.stored_key()? {
            Some(key) if !key.trim().is_empty() => {
                let result = self
                    .validator
                    .validate(&key, self.fingerprint.as_str())
                    .await;
                if !result.valid {
                    warn!(reason = %result.message(), "Stored license no longer valid");
                }
                self.state = EntitlementState::from_result(&result);
                self.last = Some(result);
            }
            _ => {
                self.state = EntitlementState::default();
                self.last = None;
            }
        }
        Ok(&self.state)
    }

    /// Validate `key` and keep it if it is accepted.
    ///
    /// A rejected key leaves the stored key and current state untouched.
    pub async fn activate(&mut self, key: &str) -> Result<ValidationResult> {
        let result = self
            .validator
            .validate(key, self.fingerprint.as_str())
            .await;
        if result.valid {
            self.store.set(TrustSlot::LicenseKey, key.trim())?;
            self.state = EntitlementState::from_result(&result);
            self.last = Some(result.clone());
            info!(plan = ?result.plan, state = ?result.state, "License activated");
        } else {
            warn!(reason = %result.message(), "Activation rejected");
        }
        Ok(result)
    }

    /// Forget the stored key.
    pub fn deactivate(&mut self) -> Result<()> {
        self.store.remove(TrustSlot::LicenseKey)?;
        self.state = EntitlementState::default();
        self.last = None;
        info!("License deactivated");
        Ok(())
    }

    pub fn profile(&self) -> Result<OwnerDetails> {
        match self.store.get(TrustSlot::Profile)? {
            Some(raw) if !raw.trim().is_empty() => Ok(serde_json::from_str(&raw)?),
            _ => Ok(OwnerDetails::default()),
        }
    }

    /// Save the profile locally and report it to the authority.
    ///
    /// Returns whether the authority accepted it. The local copy is kept
    /// either way.
    pub async fn update_profile(&self, profile: OwnerDetails) -> Result<bool> {
        self.store
            .set(TrustSlot::Profile, &serde_json::to_string(&profile)?)?;

        let Some(authority) = self.validator.authority() else {
            return Ok(false);
        };
        let registration = MachineRegistration {
            machine_id: self.fingerprint.as_str().to_string(),
            owner: profile,
            updated_at: Utc::now(),
        };
        match tokio::time::timeout(
            self.validator.policy().remote_timeout,
            authority.upsert_registration(&registration),
        )
        .await
        {
            Ok(Ok(())) => {
                info!(machine_id = %self.fingerprint, "Registration updated");
                Ok(true)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Could not report profile to authority");
                Ok(false)
            }
            Err(_) => {
                warn!("Timed out reporting profile to authority");
                Ok(false)
            }
        }
    }

    /// Whether `selected_options` options may be used at once.
    pub fn allows(&self, selected_options: usize) -> bool {
        self.state.is_licensed || selected_options <= self.free_option_limit
    }
}
