use thiserror::Error;

/// Crypto failures. Messages never describe why a decryption failed.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption failed")]
    EncryptFailed,

    #[error("decryption failed")]
    DecryptFailed,

    #[error("invalid token")]
    InvalidToken,

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("password hashing failed: {0}")]
    Hash(String),
}
