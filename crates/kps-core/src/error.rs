//! Error types for KPS licensing.

use crate::ids::RecordId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Key errors
    #[error("Invalid license key: {0}")]
    InvalidKey(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // Issuance errors
    #[error("License already expired, cannot transfer (record {0})")]
    TransferExpired(RecordId),

    #[error("License record {id} is {status}, not ACTIVE")]
    RecordSuperseded { id: RecordId, status: String },

    #[error("License record not found: {0}")]
    RecordNotFound(String),

    #[error("Conflicting update on record {0}")]
    Conflict(RecordId),

    #[error("Record {superseded} was superseded but its replacement was not stored: {reason}")]
    PartialSupersede { superseded: RecordId, reason: String },

    // Admin errors
    #[error("Admin password rejected")]
    AdminDenied,

    // Infrastructure errors
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
