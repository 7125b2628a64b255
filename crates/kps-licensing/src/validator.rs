//! License validation.
//!
//! A key goes through the local checks first (format, machine, signature,
//! expiry) and only then through the remote authority. The authority can
//! answer in three ways and each is handled differently:
//!
//! - a record: its effective status decides, overriding the signature;
//! - no record: the key was never issued, and that answer is final;
//! - an error or timeout: the authority could not be asked, and the local
//!   verdict stands if [`TrustPolicy::offline_fallback`] is set.

use crate::codec::LicenseKey;
use crate::signature::SignatureScheme;
use crate::types::{Rejection, TrustPolicy, ValidationResult, ValidationState};
use chrono::{DateTime, Utc};
use kps_core::ports::RemoteAuthority;
use kps_core::{EffectiveStatus, LicenseRecord, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of the local checks.
#[derive(Debug, Clone)]
pub enum LocalCheck {
    Valid(LicenseKey),
    Invalid(ValidationResult),
}

/// Decides whether a key entitles this machine.
pub struct LicenseValidator {
    scheme: SignatureScheme,
    policy: TrustPolicy,
    authority: Option<Arc<dyn RemoteAuthority>>,
}

impl LicenseValidator {
    /// Create a validator with no remote authority.
    pub fn new(scheme: SignatureScheme, policy: TrustPolicy) -> Self {
        Self {
            scheme,
            policy,
            authority: None,
        }
    }

    pub fn with_authority(mut self, authority: Arc<dyn RemoteAuthority>) -> Self {
        self.authority = Some(authority);
        self
    }

    pub fn policy(&self) -> &TrustPolicy {
        &self.policy
    }

    pub fn authority(&self) -> Option<&Arc<dyn RemoteAuthority>> {
        self.authority.as_ref()
    }

    /// Validate a key for `fingerprint` at the current time.
    pub async fn validate(&self, key: &str, fingerprint: &str) -> ValidationResult {
        self.validate_at(key, fingerprint, Utc::now()).await
    }

    pub async fn validate_at(
        &self,
        key: &str,
        fingerprint: &str,
        now: DateTime<Utc>,
    ) -> ValidationResult {
        let decoded = match self.check_local(key, fingerprint, now) {
            LocalCheck::Valid(decoded) => decoded,
            LocalCheck::Invalid(result) => return result,
        };

        let Some(authority) = self.authority.as_ref() else {
            return self.without_authority(&decoded, now);
        };

        match self.lookup(authority.as_ref(), &decoded).await {
            Ok(Some(record)) => self.reconcile(&decoded, &record, now),
            Ok(None) => {
                warn!(
                    key_prefix = key_prefix(&decoded),
                    authority = authority.name(),
                    "Authority has no record for a locally valid key"
                );
                ValidationResult::rejected(
                    ValidationState::RemoteDenied,
                    Rejection::UnknownKey,
                    Some(&decoded),
                    now,
                )
            }
            Err(e) => self.unreachable(&decoded, &e.to_string(), now),
        }
    }

    /// Format, machine binding, signature and expiry, in that order.
    pub fn check_local(&self, key: &str, fingerprint: &str, now: DateTime<Utc>) -> LocalCheck {
        let decoded = match LicenseKey::decode(key) {
            Ok(decoded) => decoded,
            Err(e) => {
                debug!(error = %e, "License key failed to decode");
                return LocalCheck::Invalid(ValidationResult::rejected(
                    ValidationState::LocallyInvalid,
                    Rejection::MalformedKey,
                    None,
                    now,
                ));
            }
        };

        // A key for another machine is never valid here, whatever its signature.
        if decoded.fingerprint != fingerprint.trim().to_uppercase() {
            debug!(key_machine = %decoded.fingerprint, "License key bound to another machine");
            return LocalCheck::Invalid(ValidationResult::rejected(
                ValidationState::LocallyInvalid,
                Rejection::WrongMachine,
                None,
                now,
            ));
        }

        if !self.scheme.verify(&decoded) {
            warn!(key_prefix = key_prefix(&decoded), "License key signature mismatch");
            return LocalCheck::Invalid(ValidationResult::rejected(
                ValidationState::LocallyInvalid,
                Rejection::TamperedSignature,
                None,
                now,
            ));
        }

        if now.timestamp_millis() > decoded.expiry_ms {
            debug!(expiry_ms = decoded.expiry_ms, "License key expired");
            return LocalCheck::Invalid(ValidationResult::rejected(
                ValidationState::LocallyInvalid,
                Rejection::Expired,
                Some(&decoded),
                now,
            ));
        }

        LocalCheck::Valid(decoded)
    }

    async fn lookup(
        &self,
        authority: &dyn RemoteAuthority,
        key: &LicenseKey,
    ) -> Result<Option<LicenseRecord>> {
        let raw = key.encode();
        match tokio::time::timeout(
            self.policy.remote_timeout,
            authority.find(&raw, &key.fingerprint),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(kps_core::Error::Network(format!(
                "{} did not answer within {:?}",
                authority.name(),
                self.policy.remote_timeout
            ))),
        }
    }

    fn reconcile(
        &self,
        key: &LicenseKey,
        record: &LicenseRecord,
        now: DateTime<Utc>,
    ) -> ValidationResult {
        let status = record.effective_status(now);
        if status == EffectiveStatus::Active {
            info!(record_id = %record.id, plan = %key.plan, "License confirmed by authority");
            ValidationResult::accepted(ValidationState::RemoteConfirmed, key, now)
                .with_remote_status(status)
        } else {
            warn!(record_id = %record.id, status = %status, "License revoked by authority");
            ValidationResult::rejected(
                ValidationState::RemoteRevoked,
                Rejection::RevokedRemotely,
                Some(key),
                now,
            )
            .with_remote_status(status)
        }
    }

    fn unreachable(&self, key: &LicenseKey, error: &str, now: DateTime<Utc>) -> ValidationResult {
        if self.policy.offline_fallback {
            warn!(
                key_prefix = key_prefix(key),
                error = %error,
                "Authority unreachable, trusting local signature"
            );
            ValidationResult::accepted(ValidationState::TrustFallback, key, now)
        } else {
            warn!(error = %error, "Authority unreachable and offline fallback disabled");
            ValidationResult::rejected(
                ValidationState::TrustFallback,
                Rejection::AuthorityUnreachable,
                Some(key),
                now,
            )
        }
    }

    fn without_authority(&self, key: &LicenseKey, now: DateTime<Utc>) -> ValidationResult {
        if self.policy.offline_fallback {
            debug!("No authority configured, accepting locally valid key");
            ValidationResult::accepted(ValidationState::LocallyValid, key, now)
        } else {
            ValidationResult::rejected(
                ValidationState::LocallyValid,
                Rejection::AuthorityUnreachable,
                Some(key),
                now,
            )
        }
    }
}

fn key_prefix(key: &LicenseKey) -> String {
    key.fingerprint.chars().take(4).collect()
}
