use crate::domain::account::AccountId;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Broad failure class used to decide between acknowledging, requeueing and dead-lettering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    BusinessRule,
    NotFound,
    Infrastructure,
}

impl ErrorKind {
    /// Only infrastructure failures are worth another delivery attempt.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Infrastructure)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::BusinessRule => "business_rule",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Infrastructure => "infrastructure",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Insufficient funds in account {account_id}")]
    InsufficientFunds { account_id: AccountId },

    #[error("Withdrawal limit exceeded for account {account_id}")]
    WithdrawalLimitExceeded { account_id: AccountId },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: u64 },

    /// The stored account changed since it was loaded.
    #[error("Version conflict on account {account_id}")]
    Conflict { account_id: AccountId },

    /// A transaction with the same idempotency key was already committed.
    #[error("Intent {0} was already applied")]
    DuplicateIntent(Uuid),

    #[error("Gave up after {attempts} conflicting updates")]
    Contention { attempts: u32 },

    #[error("Timed out during {0}")]
    Timeout(&'static str),

    #[error("Queue closed")]
    QueueClosed,

    /// The delivery was already settled or its claim expired and was redelivered.
    #[error("Unknown or expired delivery tag {0}")]
    StaleDelivery(u64),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] toml::de::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::ValidationError(_)
            | LedgerError::CsvError(_)
            | LedgerError::ConfigError(_) => ErrorKind::Validation,
            LedgerError::InsufficientFunds { .. } | LedgerError::WithdrawalLimitExceeded { .. } => {
                ErrorKind::BusinessRule
            }
            LedgerError::NotFound { .. } => ErrorKind::NotFound,
            LedgerError::Conflict { .. }
            | LedgerError::DuplicateIntent(_)
            | LedgerError::Contention { .. }
            | LedgerError::Timeout(_)
            | LedgerError::QueueClosed
            | LedgerError::StaleDelivery(_)
            | LedgerError::SerializationError(_)
            | LedgerError::IoError(_)
            | LedgerError::InternalError(_) => ErrorKind::Infrastructure,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        LedgerError::ValidationError(msg.into())
    }

    pub fn account_not_found(id: AccountId) -> Self {
        LedgerError::NotFound {
            entity: "Account",
            id,
        }
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for LedgerError {
    fn from(err: rocksdb::Error) -> Self {
        LedgerError::InternalError(Box::new(err))
    }
}
