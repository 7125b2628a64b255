//! Key signatures.
//!
//! The signature is a DJB2 rolling hash over the key fields and a shared
//! secret, shown as four base-36 characters. It detects edits to a key; it
//! is not a MAC. The secret ships inside every client, so anyone who pulls
//! it out can mint keys offline. Swapping in a real MAC would invalidate
//! every key already issued.

use crate::codec::{LicenseKey, SIGNATURE_LEN, encode_base36};

/// Secret mixed into every signature.
pub const SHARED_SECRET: &str = "KPS-PROMPT-STUDIO-SECRET-2024";

/// Signs and verifies license keys.
#[derive(Debug, Clone)]
pub struct SignatureScheme {
    secret: String,
}

impl Default for SignatureScheme {
    fn default() -> Self {
        Self::new(SHARED_SECRET)
    }
}

impl SignatureScheme {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Digest over `fingerprint-expiry-plan-secret`.
    pub fn sign(&self, fingerprint: &str, expiry_encoded: &str, plan: &str) -> String {
        let material = format!("{}-{}-{}-{}", fingerprint, expiry_encoded, plan, self.secret);
        let digest = encode_base36(djb2(&material) as u64);
        let truncated: String = digest.chars().take(SIGNATURE_LEN).collect();
        format!("{:0>width$}", truncated, width = SIGNATURE_LEN)
    }

    /// Build a signed key for the given fields.
    pub fn seal(&self, fingerprint: &str, expiry_ms: i64, plan: &str) -> LicenseKey {
        let mut key = LicenseKey {
            fingerprint: fingerprint.to_uppercase(),
            expiry_ms,
            plan: plan.to_uppercase(),
            signature: String::new(),
        };
        key.signature = self.sign(&key.fingerprint, &key.expiry_encoded(), &key.plan);
        key
    }

    pub fn verify(&self, key: &LicenseKey) -> bool {
        let expected = self.sign(&key.fingerprint, &key.expiry_encoded(), &key.plan);
        expected == key.signature
    }
}

/// DJB2 over UTF-16 code units with 32-bit signed wrap-around, returning
/// the magnitude.
fn djb2(input: &str) -> u32 {
    let hash = input.encode_utf16().fold(5381i32, |hash, unit| {
        hash.wrapping_shl(5)
            .wrapping_add(hash)
            .wrapping_add(i32::from(unit))
    });
    hash.unsigned_abs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_djb2_known_values() {
        assert_eq!(djb2(""), 5381);
        // 5381 * 33 + 'a'
        assert_eq!(djb2("a"), 177_670);
        // 177670 * 33 + 'b'
        assert_eq!(djb2("ab"), 5_863_208);
    }

    #[test]
    fn test_djb2_wraps_instead_of_overflowing() {
        let long = "Z".repeat(200);
        let _ = djb2(&long);
    }

    #[test]
    fn test_signature_shape() {
        let scheme = SignatureScheme::default();
        for plan in ["PRO", "BASIC", "TRIAL", "X"] {
            let sig = scheme.sign("SHOP-AB12-CD34", "MJXK1Q00", plan);
            assert_eq!(sig.len(), SIGNATURE_LEN);
            assert!(sig.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
        }
    }

    #[test]
    fn test_sign_is_deterministic_and_secret_dependent() {
        let a = SignatureScheme::default();
        let b = SignatureScheme::new("another-secret");
        let first = a.sign("FP", "ABC", "PRO");
        assert_eq!(first, a.sign("FP", "ABC", "PRO"));
        assert_ne!(first, b.sign("FP", "ABC", "PRO"));
    }

    #[test]
    fn test_seal_and_verify() {
        let scheme = SignatureScheme::default();
        let key = scheme.seal("shop-ab12-cd34", 1_767_225_600_000, "pro");
        assert_eq!(key.fingerprint, "SHOP-AB12-CD34");
        assert_eq!(key.plan, "PRO");
        assert!(scheme.verify(&key));
    }

    #[test]
    fn test_any_single_signature_flip_fails() {
        let scheme = SignatureScheme::default();
        let key = scheme.seal("SHOP-AB12-CD34", 1_767_225_600_000, "PRO");

        for pos in 0..SIGNATURE_LEN {
            let mut chars: Vec<char> = key.signature.chars().collect();
            chars[pos] = if chars[pos] == 'A' { 'B' } else { 'A' };
            let tampered = LicenseKey {
                signature: chars.into_iter().collect(),
                ..key.clone()
            };
            assert!(!scheme.verify(&tampered), "flip at {pos} went undetected");
        }
    }

    #[test]
    fn test_field_edits_fail() {
        let scheme = SignatureScheme::default();
        let key = scheme.seal("SHOP-AB12-CD34", 1_767_225_600_000, "PRO");

        let longer = LicenseKey {
            expiry_ms: key.expiry_ms + 86_400_000,
            ..key.clone()
        };
        let upgraded = LicenseKey {
            plan: "ENTERPRISE".to_string(),
            ..key.clone()
        };
        assert!(!scheme.verify(&longer));
        assert!(!scheme.verify(&upgraded));
    }
}
