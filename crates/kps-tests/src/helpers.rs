//! Test helper functions and utilities.

use chrono::{DateTime, TimeDelta, Utc};
use kps_licensing::{
    LicenseValidator, RestAuthority, RestConfig, SignatureScheme, TrustPolicy,
};
use std::sync::Arc;
use std::time::Duration;

/// Validator whose authority refuses connections.
///
/// Port 9 (discard) is closed on test hosts, so every lookup fails fast
/// with a transport error.
pub fn unreachable_validator(policy: TrustPolicy) -> anyhow::Result<LicenseValidator> {
    let mut config = RestConfig::new("http://127.0.0.1:9", "unused");
    config.timeout = Duration::from_secs(2);
    let authority = RestAuthority::new(config)?;
    Ok(LicenseValidator::new(SignatureScheme::default(), policy).with_authority(Arc::new(authority)))
}

/// Signed key for `machine_id` expiring `offset` after `now`.
pub fn key_expiring_in(machine_id: &str, now: DateTime<Utc>, offset: TimeDelta) -> String {
    SignatureScheme::default()
        .seal(machine_id, (now + offset).timestamp_millis(), "PRO")
        .encode()
}
