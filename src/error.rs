use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Decimal, available: Decimal },
    #[error("Account {account} could not be updated after {attempts} attempts")]
    ConcurrencyExhausted { account: String, attempts: u32 },
    #[error("Incorrect PIN")]
    Authentication,
    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },
    #[error("{kind} {key} is still pending and cannot be removed")]
    StillPending { kind: &'static str, key: String },
    #[error("Notification {0} was created by an operator and cannot be deleted")]
    Immutable(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("Storage error: {0}")]
    Storage(#[from] rocksdb::Error),
}

impl LedgerError {
    pub fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            key: key.into(),
        }
    }

    /// Transient failures that are safe to retry without inspecting state.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConcurrencyExhausted { .. })
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
