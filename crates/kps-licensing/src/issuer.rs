//! Key issuance: generate, transfer and renew.
//!
//! Every operation writes through the remote authority. Transfer and
//! renew retire the old record and insert its replacement with one
//! [`RemoteAuthority::supersede`] call.

use crate::codec::LicenseKey;
use crate::machine::MachineFingerprint;
use crate::signature::SignatureScheme;
use chrono::{DateTime, Utc};
use kps_core::ports::RemoteAuthority;
use kps_core::{
    Error, LicenseRecord, OwnerDetails, RecordId, RecordStatus, Result, Term,
};
use std::sync::Arc;
use tracing::{error, info, instrument};

/// Parameters for a new license.
#[derive(Debug, Clone)]
pub struct IssueRequest {
    pub machine_id: String,
    pub term: Term,
    pub plan: String,
    /// Falls back to the machine's registration when `None`.
    pub owner: Option<OwnerDetails>,
    pub price: f64,
}

/// A stored record together with its key.
#[derive(Debug, Clone)]
pub struct IssuedLicense {
    pub record: LicenseRecord,
    pub key: LicenseKey,
}

impl IssuedLicense {
    pub fn key_string(&self) -> &str {
        &self.record.key
    }
}

pub struct Issuer {
    authority: Arc<dyn RemoteAuthority>,
    scheme: SignatureScheme,
}

impl Issuer {
    pub fn new(authority: Arc<dyn RemoteAuthority>, scheme: SignatureScheme) -> Self {
        Self { authority, scheme }
    }

    pub fn authority(&self) -> &Arc<dyn RemoteAuthority> {
        &self.authority
    }

    pub async fn generate(&self, request: IssueRequest) -> Result<IssuedLicense> {
        self.generate_at(request, Utc::now()).await
    }

    /// Issue a fresh key whose term starts at `now`.
    #[instrument(skip(self, request), fields(machine_id = %request.machine_id, plan = %request.plan))]
    pub async fn generate_at(
        &self,
        request: IssueRequest,
        now: DateTime<Utc>,
    ) -> Result<IssuedLicense> {
        let now = truncate_ms(now);
        let machine_id = canonical_machine(&request.machine_id)?;
        let plan = canonical_plan(&request.plan)?;
        if !request.term.is_positive() {
            return Err(Error::InvalidRequest("term must be positive".to_string()));
        }

        let owner = match request.owner {
            Some(owner) => owner,
            None => self
                .authority
                .registration(&machine_id)
                .await?
                .map(|r| r.owner)
                .unwrap_or_default(),
        };

        let expiry_ms = expiry_after(now, request.term)?;
        let key = self.seal(&machine_id, expiry_ms, &plan)?;
        let record = LicenseRecord {
            id: RecordId::new(),
            machine_id,
            key: key.encode(),
            plan,
            duration_days: request.term.as_days(),
            status: RecordStatus::Active,
            created_at: now,
            owner,
            transferred_to: None,
            price: request.price,
        };

        self.authority.insert(&record).await?;
        info!(record_id = %record.id, term = %request.term, "Issued license");
        Ok(IssuedLicense { record, key })
    }

    pub async fn transfer(&self, old_key: &str, new_machine_id: &str) -> Result<IssuedLicense> {
        self.transfer_at(old_key, new_machine_id, Utc::now()).await
    }

    /// Move the remaining entitlement of `old_key` to another machine.
    ///
    /// The new key expires exactly when the old one would have.
    #[instrument(skip(self, old_key))]
    pub async fn transfer_at(
        &self,
        old_key: &str,
        new_machine_id: &str,
        now: DateTime<Utc>,
    ) -> Result<IssuedLicense> {
        let now = truncate_ms(now);
        let target = canonical_machine(new_machine_id)?;
        let old = self.lookup(old_key).await?;

        if old.status != RecordStatus::Active {
            return Err(Error::RecordSuperseded {
                id: old.id,
                status: old.status.to_string(),
            });
        }
        if old.machine_id == target {
            return Err(Error::InvalidRequest(
                "license is already bound to that machine".to_string(),
            ));
        }

        let expiry_ms = old
            .expires_at()
            .ok_or_else(|| {
                Error::InvalidRequest(format!("record {} has an out-of-range term", old.id))
            })?
            .timestamp_millis();
        let remaining = Term::from_millis(expiry_ms - now.timestamp_millis());
        if !remaining.is_positive() {
            return Err(Error::TransferExpired(old.id));
        }

        let key = self.seal(&target, expiry_ms, &old.plan)?;
        let replacement = LicenseRecord {
            id: RecordId::new(),
            machine_id: target.clone(),
            key: key.encode(),
            plan: old.plan.clone(),
            duration_days: remaining.as_days(),
            status: RecordStatus::Active,
            created_at: now,
            owner: old.owner.clone(),
            transferred_to: None,
            price: old.price,
        };

        self.retire(&old, RecordStatus::Transferred, Some(&target), &replacement)
            .await?;
        info!(
            from = %old.id,
            to = %replacement.id,
            remaining = %remaining,
            "Transferred license"
        );
        Ok(IssuedLicense {
            record: replacement,
            key,
        })
    }

    pub async fn renew(
        &self,
        old_key: &str,
        term: Term,
        plan: Option<&str>,
    ) -> Result<IssuedLicense> {
        self.renew_at(old_key, term, plan, Utc::now()).await
    }

    /// Replace `old_key` with a key on the same machine whose term starts now.
    ///
    /// Time left on the old key is not carried over. `plan` defaults to the
    /// old record's plan.
    #[instrument(skip(self, old_key))]
    pub async fn renew_at(
        &self,
        old_key: &str,
        term: Term,
        plan: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<IssuedLicense> {
        let now = truncate_ms(now);
        if !term.is_positive() {
            return Err(Error::InvalidRequest("term must be positive".to_string()));
        }
        let plan = plan.map(canonical_plan).transpose()?;
        let old = self.lookup(old_key).await?;
        if old.status != RecordStatus::Active {
            return Err(Error::RecordSuperseded {
                id: old.id,
                status: old.status.to_string(),
            });
        }

        let plan = plan.unwrap_or_else(|| old.plan.clone());
        let expiry_ms = expiry_after(now, term)?;
        let key = self.seal(&old.machine_id, expiry_ms, &plan)?;
        let replacement = LicenseRecord {
            id: RecordId::new(),
            machine_id: old.machine_id.clone(),
            key: key.encode(),
            plan,
            duration_days: term.as_days(),
            status: RecordStatus::Active,
            created_at: now,
            owner: old.owner.clone(),
            transferred_to: None,
            price: old.price,
        };

        self.retire(&old, RecordStatus::Renewed, None, &replacement)
            .await?;
        info!(from = %old.id, to = %replacement.id, term = %term, "Renewed license");
        Ok(IssuedLicense {
            record: replacement,
            key,
        })
    }

    /// Find the stored record for a key string.
    pub async fn lookup(&self, key: &str) -> Result<LicenseRecord> {
        let decoded = LicenseKey::decode(key).map_err(|e| Error::InvalidKey(e.to_string()))?;
        self.authority
            .find(&decoded.encode(), &decoded.fingerprint)
            .await?
            .ok_or_else(|| Error::RecordNotFound(decoded.encode()))
    }

    /// Sign a key and make sure it decodes back to the same fields.
    fn seal(&self, machine_id: &str, expiry_ms: i64, plan: &str) -> Result<LicenseKey> {
        let key = self.scheme.seal(machine_id, expiry_ms, plan);
        match LicenseKey::decode(&key.encode()) {
            Ok(decoded) if decoded == key => Ok(key),
            _ => Err(Error::InvalidRequest(format!(
                "machine id '{}' cannot be carried in a key",
                machine_id
            ))),
        }
    }

    async fn retire(
        &self,
        old: &LicenseRecord,
        status: RecordStatus,
        transferred_to: Option<&str>,
        replacement: &LicenseRecord,
    ) -> Result<()> {
        let result = self
            .authority
            .supersede(old.id, status, transferred_to, replacement)
            .await;
        if let Err(Error::PartialSupersede { superseded, reason }) = &result {
            error!(
                record_id = %superseded,
                replacement_id = %replacement.id,
                replacement_key = %replacement.key,
                reason = %reason,
                "Old record retired without a stored replacement"
            );
        }
        result
    }
}

fn truncate_ms(now: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

/// Expiry in ms for a term starting at `now`.
fn expiry_after(now: DateTime<Utc>, term: Term) -> Result<i64> {
    now.timestamp_millis()
        .checked_add(term.as_millis())
        .filter(|ms| DateTime::from_timestamp_millis(*ms).is_some())
        .ok_or_else(|| Error::InvalidRequest(format!("term of {} is out of range", term)))
}

/// Machine ids become the fingerprint segments of a key, so none of the
/// dash-separated parts may be empty.
fn canonical_machine(machine_id: &str) -> Result<String> {
    let fingerprint = MachineFingerprint::new(machine_id);
    if fingerprint.as_str().is_empty() {
        return Err(Error::InvalidRequest("machine id is empty".to_string()));
    }
    if fingerprint.as_str().split('-').any(|part| part.trim().is_empty()) {
        return Err(Error::InvalidRequest(format!(
            "machine id '{}' has an empty segment",
            fingerprint
        )));
    }
    Ok(fingerprint.as_str().to_string())
}

/// Plans are a single key segment: no dashes, and nothing the codec would
/// change on round-trip.
fn canonical_plan(plan: &str) -> Result<String> {
    let plan = plan.trim().to_uppercase();
    if plan.is_empty() {
        return Err(Error::InvalidRequest("plan is empty".to_string()));
    }
    if !plan.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::InvalidRequest(format!(
            "plan '{}' may only contain letters, digits and '_'",
            plan
        )));
    }
    Ok(plan)
}
