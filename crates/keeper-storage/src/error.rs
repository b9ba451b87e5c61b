use thiserror::Error;

/// Storage failures, already classified for the handler layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A uniqueness constraint rejected the write (user id, or name within a kind).
    #[error("record already exists")]
    Conflict,

    #[error("record not found")]
    NotFound,

    #[error("database error: {0}")]
    Database(sqlx::Error),

    #[error("offset out of range: {0}")]
    OutOfRange(i64),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("storage config error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StorageError::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => StorageError::Conflict,
            _ => StorageError::Database(err),
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
