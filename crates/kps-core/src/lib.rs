//! KPS Core
//!
//! License records, terms, error handling and the port traits shared by
//! the licensing engine and its storage adapters. This crate has minimal
//! dependencies and defines the vocabulary used across all other crates.

pub mod error;
pub mod ids;
pub mod ports;
pub mod record;
pub mod term;

pub use error::{Error, Result};
pub use ids::RecordId;
pub use record::{EffectiveStatus, LicenseRecord, MachineRegistration, OwnerDetails, RecordStatus};
pub use term::{MAX_DAYS, MS_PER_DAY, Term};
