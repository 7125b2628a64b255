//! Machine-bound license keys for KPS.
//!
//! Keys are signed locally and optionally reconciled against a remote
//! authority that holds the issued records. See [`validator`] for how the
//! two are combined.

pub mod admin;
pub mod backup;
pub mod codec;
pub mod context;
pub mod issuer;
pub mod machine;
pub mod memory;
pub mod rest;
pub mod signature;
pub mod store;
pub mod types;
pub mod validator;

pub use admin::AdminGate;
pub use backup::{BACKUP_VERSION, Backup};
pub use codec::{DecodeError, LicenseKey};
pub use context::{EntitlementState, LicenseContext};
pub use issuer::{IssueRequest, IssuedLicense, Issuer};
pub use machine::MachineFingerprint;
pub use memory::MemoryAuthority;
pub use rest::{RestAuthority, RestConfig};
pub use signature::SignatureScheme;
pub use store::{FileTrustStore, MemoryTrustStore};
pub use types::{Rejection, TrustPolicy, ValidationResult, ValidationState};
pub use validator::LicenseValidator;
