//! License key wire format.
//!
//! Keys look like `KPS-<FINGERPRINT>-<EXPIRY>-<PLAN>-<SIG>`, all uppercase.
//! `EXPIRY` is a millisecond Unix timestamp in base 36 and `SIG` is four
//! base-36 characters. The fingerprint may itself contain dashes, so
//! decoding is positional: the tag is taken from the front, then the
//! signature, plan and expiry from the back, and whatever is left is the
//! fingerprint.

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Fixed tag every key starts with.
pub const KEY_PREFIX: &str = "KPS";

/// Width of the signature segment.
pub const SIGNATURE_LEN: usize = 4;

const BASE36_DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Why a key string could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("key does not start with KPS")]
    Prefix,

    #[error("expected at least 4 segments after the prefix, found {0}")]
    TooFewSegments(usize),

    #[error("key contains an empty segment")]
    EmptySegment,

    #[error("invalid expiry segment: {0}")]
    Expiry(String),

    #[error("invalid signature segment: {0}")]
    Signature(String),
}

/// The decoded fields of a license key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LicenseKey {
    pub fingerprint: String,
    /// Expiry as milliseconds since the Unix epoch.
    pub expiry_ms: i64,
    pub plan: String,
    pub signature: String,
}

impl LicenseKey {
    /// Expiry rendered the way it appears on the wire.
    pub fn expiry_encoded(&self) -> String {
        encode_base36(self.expiry_ms.max(0) as u64)
    }

    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.expiry_ms)
    }

    pub fn encode(&self) -> String {
        format!(
            "{}-{}-{}-{}-{}",
            KEY_PREFIX,
            self.fingerprint.to_uppercase(),
            self.expiry_encoded(),
            self.plan.to_uppercase(),
            self.signature.to_uppercase()
        )
    }

    pub fn decode(input: &str) -> Result<Self, DecodeError> {
        let normalized = input.trim().to_uppercase();
        let mut segments: Vec<&str> = normalized.split('-').collect();

        if segments.first() != Some(&KEY_PREFIX) {
            return Err(DecodeError::Prefix);
        }
        let after_tag = segments.len() - 1;
        if after_tag < 4 {
            return Err(DecodeError::TooFewSegments(after_tag));
        }
        if segments.iter().any(|s| s.is_empty()) {
            return Err(DecodeError::EmptySegment);
        }

        // Length was checked above, so the pops cannot come up empty.
        let signature = segments.pop().unwrap_or_default();
        let plan = segments.pop().unwrap_or_default();
        let expiry = segments.pop().unwrap_or_default();
        let fingerprint = segments[1..].join("-");

        if signature.len() != SIGNATURE_LEN || decode_base36(signature).is_none() {
            return Err(DecodeError::Signature(signature.to_string()));
        }
        let expiry_ms = decode_base36(expiry)
            .and_then(|v| i64::try_from(v).ok())
            .ok_or_else(|| DecodeError::Expiry(expiry.to_string()))?;

        Ok(Self {
            fingerprint,
            expiry_ms,
            plan: plan.to_string(),
            signature: signature.to_string(),
        })
    }
}

impl fmt::Display for LicenseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for LicenseKey {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

/// Render an unsigned value in uppercase base 36.
pub fn encode_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE36_DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}

/// Parse a base-36 string (either case). `None` on empty input, bad digits
/// or overflow.
pub fn decode_base36(input: &str) -> Option<u64> {
    if input.is_empty() {
        return None;
    }
    input.chars().try_fold(0u64, |acc, c| {
        let digit = c.to_digit(36)? as u64;
        acc.checked_mul(36)?.checked_add(digit)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> LicenseKey {
        LicenseKey {
            fingerprint: "SHOP-AB12-CD34".to_string(),
            expiry_ms: 1_767_225_600_000,
            plan: "PRO".to_string(),
            signature: "0K3Z".to_string(),
        }
    }

    #[test]
    fn test_base36() {
        assert_eq!(encode_base36(0), "0");
        assert_eq!(encode_base36(35), "Z");
        assert_eq!(encode_base36(36), "10");
        assert_eq!(decode_base36("zz"), Some(35 * 36 + 35));
        assert_eq!(decode_base36(""), None);
        assert_eq!(decode_base36("A-B"), None);
        assert_eq!(decode_base36("ZZZZZZZZZZZZZZZZ"), None);

        let ts: u64 = 1_767_225_600_000;
        assert_eq!(decode_base36(&encode_base36(ts)), Some(ts));
    }

    #[test]
    fn test_encode_layout() {
        let key = sample();
        let encoded = key.encode();
        assert!(encoded.starts_with("KPS-SHOP-AB12-CD34-"));
        assert!(encoded.ends_with("-PRO-0K3Z"));
        assert_eq!(encoded, encoded.to_uppercase());
    }

    #[test]
    fn test_dashed_fingerprint_roundtrip() {
        let key = sample();
        assert_eq!(LicenseKey::decode(&key.encode()).unwrap(), key);
    }

    #[test]
    fn test_single_segment_fingerprint() {
        let key = LicenseKey {
            fingerprint: "MACHINE1".to_string(),
            ..sample()
        };
        let decoded = LicenseKey::decode(&key.encode()).unwrap();
        assert_eq!(decoded.fingerprint, "MACHINE1");
    }

    #[test]
    fn test_decode_normalizes_input() {
        let key = sample();
        let pasted = format!("  {}\n", key.encode().to_lowercase());
        assert_eq!(pasted.parse::<LicenseKey>().unwrap(), key);
    }

    #[test]
    fn test_decode_rejects_bad_prefix() {
        assert_eq!(
            LicenseKey::decode("ABC-SHOP-1-PRO-AAAA"),
            Err(DecodeError::Prefix)
        );
        assert_eq!(LicenseKey::decode(""), Err(DecodeError::Prefix));
    }

    #[test]
    fn test_decode_rejects_short_keys() {
        assert_eq!(
            LicenseKey::decode("KPS-1-PRO-AAAA"),
            Err(DecodeError::TooFewSegments(3))
        );
        assert_eq!(LicenseKey::decode("KPS"), Err(DecodeError::TooFewSegments(0)));
    }

    #[test]
    fn test_decode_rejects_empty_segments() {
        assert_eq!(
            LicenseKey::decode("KPS-SHOP--1-PRO-AAAA"),
            Err(DecodeError::EmptySegment)
        );
    }

    #[test]
    fn test_decode_rejects_bad_expiry_and_signature() {
        assert!(matches!(
            LicenseKey::decode("KPS-SHOP-1!-PRO-AAAA"),
            Err(DecodeError::Expiry(_))
        ));
        assert!(matches!(
            LicenseKey::decode("KPS-SHOP-1-PRO-AAA"),
            Err(DecodeError::Signature(_))
        ));
    }

    #[test]
    fn test_expiry_accessor() {
        let key = sample();
        assert_eq!(key.expiry().unwrap().timestamp_millis(), key.expiry_ms);
    }
}
