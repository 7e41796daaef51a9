use crate::domain::process::TransferProcessState;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Entity {entity_id} is already leased by {holder}")]
    LeaseAlreadyHeld { entity_id: String, holder: String },
    #[error("Lease on entity {entity_id} has expired")]
    LeaseExpired { entity_id: String },
    #[error("Lease on entity {entity_id} is not owned by {holder}")]
    LeaseNotOwned { entity_id: String, holder: String },
    #[error("Entity {entity_id} cannot be deleted while leased by {holder}")]
    LeaseHeld { entity_id: String, holder: String },
    #[error("Stale write on {id}: expected state count {expected}, found {actual}")]
    StaleWrite { id: String, expected: i64, actual: i64 },
    #[error("Transfer process {id} not found")]
    NotFound { id: String },
    #[error("Transfer process {id} already exists")]
    DuplicateId { id: String },
    #[error("Illegal transition {from} -> {to}")]
    IllegalTransition {
        from: TransferProcessState,
        to: TransferProcessState,
    },
    #[error("Clock skew on {id}: state timestamp {proposed} precedes persisted {persisted}")]
    ClockSkew {
        id: String,
        persisted: i64,
        proposed: i64,
    },
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] sqlx::Error),
    #[error("Invalid data: {0}")]
    InvalidData(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl StoreError {
    /// Only connectivity failures are worth retrying; every other variant is
    /// a terminal outcome for the attempted operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::StorageUnavailable(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::InvalidData(format!("JSON error: {}", e))
    }
}

impl From<config::ConfigError> for StoreError {
    fn from(e: config::ConfigError) -> Self {
        StoreError::Configuration(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
