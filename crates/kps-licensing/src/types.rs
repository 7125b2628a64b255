//! Validation types and structures.

use crate::codec::LicenseKey;
use chrono::{DateTime, Utc};
use kps_core::EffectiveStatus;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Where a validation pass ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationState {
    /// Failed format, machine, signature or expiry checks.
    LocallyInvalid,
    /// Passed local checks; no authority was configured.
    LocallyValid,
    /// Authority holds an ACTIVE record for the key.
    RemoteConfirmed,
    /// Authority holds a record that is no longer ACTIVE.
    RemoteRevoked,
    /// Authority answered and has no record for the key.
    RemoteDenied,
    /// Authority could not be asked; local checks were trusted.
    TrustFallback,
}

/// Reason a key was not accepted. The display strings are shown to end users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    #[error("Invalid Format")]
    MalformedKey,

    #[error("Wrong Machine")]
    WrongMachine,

    #[error("Tampered")]
    TamperedSignature,

    #[error("Expired")]
    Expired,

    #[error("Revoked or expired in database")]
    RevokedRemotely,

    #[error("Unknown Key")]
    UnknownKey,

    #[error("Authority Unreachable")]
    AuthorityUnreachable,
}

/// How much the validator trusts a key it could not confirm remotely.
#[derive(Debug, Clone)]
pub struct TrustPolicy {
    /// Accept locally valid keys when the authority cannot be reached.
    pub offline_fallback: bool,
    /// Upper bound on one authority lookup; elapsing counts as unreachable.
    pub remote_timeout: Duration,
}

impl Default for TrustPolicy {
    fn default() -> Self {
        Self {
            offline_fallback: true,
            remote_timeout: Duration::from_secs(10),
        }
    }
}

/// License validation result.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    /// Whether the key grants entitlement.
    pub valid: bool,
    pub state: ValidationState,
    /// Why the key was refused (if invalid).
    pub reason: Option<Rejection>,
    /// Decoded expiry, when the key decoded and belongs to this machine.
    pub expiry: Option<DateTime<Utc>>,
    pub plan: Option<String>,
    /// Status reported by the authority, when it answered with a record.
    pub remote_status: Option<EffectiveStatus>,
    pub validated_at: DateTime<Utc>,
}

impl ValidationResult {
    pub fn accepted(state: ValidationState, key: &LicenseKey, at: DateTime<Utc>) -> Self {
        Self {
            valid: true,
            state,
            reason: None,
            expiry: key.expiry(),
            plan: Some(key.plan.clone()),
            remote_status: None,
            validated_at: at,
        }
    }

    pub fn rejected(
        state: ValidationState,
        reason: Rejection,
        key: Option<&LicenseKey>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            valid: false,
            state,
            reason: Some(reason),
            expiry: key.and_then(LicenseKey::expiry),
            plan: key.map(|k| k.plan.clone()),
            remote_status: None,
            validated_at: at,
        }
    }

    pub fn with_remote_status(mut self, status: EffectiveStatus) -> Self {
        self.remote_status = Some(status);
        self
    }

    /// User-facing message for the outcome.
    pub fn message(&self) -> String {
        match (self.reason, self.state) {
            (Some(reason), _) => reason.to_string(),
            (None, ValidationState::TrustFallback) => "Licensed (offline)".to_string(),
            (None, _) => "Licensed".to_string(),
        }
    }
}
