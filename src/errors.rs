//! Error types for stakesign

use thiserror::Error;

/// Main error type for stakesign operations
#[derive(Error, Debug)]
pub enum StakeSignError {
    // Lookup errors
    #[error("Not found: {0}")]
    NotFound(String),

    // Authorization errors
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Account is locked: {0}")]
    Locked(String),

    // Policy errors
    #[error("Denied by policy: {0}")]
    PolicyDenied(String),

    #[error("Policy evaluation failed: {0}")]
    PolicyFailed(String),

    // Storage errors
    #[error("Storage error: {0}")]
    StorageError(String),

    // Wallet and key material errors
    #[error("Wallet error: {0}")]
    WalletError(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Internal errors
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<std::io::Error> for StakeSignError {
    fn from(err: std::io::Error) -> Self {
        StakeSignError::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for StakeSignError {
    fn from(err: serde_json::Error) -> Self {
        StakeSignError::StorageError(format!("JSON error: {}", err))
    }
}

impl From<hex::FromHexError> for StakeSignError {
    fn from(err: hex::FromHexError) -> Self {
        StakeSignError::InvalidRequest(format!("Hex decode error: {}", err))
    }
}

impl From<regex::Error> for StakeSignError {
    fn from(err: regex::Error) -> Self {
        StakeSignError::ConfigError(format!("Invalid regular expression: {}", err))
    }
}

macro_rules! redb_error {
    ($($ty:ty),+) => {
        $(
            impl From<$ty> for StakeSignError {
                fn from(err: $ty) -> Self {
                    StakeSignError::StorageError(err.to_string())
                }
            }
        )+
    };
}

redb_error!(
    redb::Error,
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError
);

/// Convert StakeSignError to tonic::Status for gRPC responses
impl From<StakeSignError> for tonic::Status {
    fn from(err: StakeSignError) -> Self {
        match err {
            StakeSignError::NotFound(_) => tonic::Status::not_found(err.to_string()),
            StakeSignError::Unauthorized(_) | StakeSignError::PolicyDenied(_) => {
                tonic::Status::permission_denied(err.to_string())
            }
            StakeSignError::Locked(_) => tonic::Status::failed_precondition(err.to_string()),
            StakeSignError::InvalidRequest(_) | StakeSignError::DecryptionFailed(_) => {
                tonic::Status::invalid_argument(err.to_string())
            }
            _ => tonic::Status::internal(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StakeSignError>;
