//! Handler-boundary errors and their mapping onto gRPC status codes

use keeper_crypto::CryptoError;
use keeper_storage::StorageError;
use thiserror::Error;
use tonic::Status;

/// Message returned for every authentication failure, whatever the cause.
pub const UNAUTHENTICATED: &str = "unauthenticated";

/// Everything a handler can fail with. Each variant maps to exactly one gRPC
/// code; internal causes are logged here and never sent to the caller.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("unauthenticated")]
    Unauthenticated,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("already exists")]
    AlreadyExists,

    #[error("not found")]
    NotFound,

    #[error("crypto: {0}")]
    Crypto(#[from] CryptoError),

    #[error("storage: {0}")]
    Storage(StorageError),

    /// The object changed underneath a transfer; the client may retry
    #[error("aborted: {0}")]
    Aborted(String),

    /// A status produced by the transport (e.g. the client reset the stream)
    #[error("stream: {0}")]
    Stream(Status),

    #[error("internal: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict => ServiceError::AlreadyExists,
            StorageError::NotFound => ServiceError::NotFound,
            other => ServiceError::Storage(other),
        }
    }
}

impl From<ServiceError> for Status {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unauthenticated => Status::unauthenticated(UNAUTHENTICATED),
            ServiceError::InvalidArgument(msg) => Status::invalid_argument(msg),
            ServiceError::AlreadyExists => Status::already_exists("record already exists"),
            ServiceError::NotFound => Status::not_found("not found"),
            ServiceError::Aborted(msg) => Status::aborted(msg),
            ServiceError::Stream(status) => status,
            internal => {
                tracing::error!(error = %internal, "request failed");
                Status::internal("internal error")
            }
        }
    }
}
