//! keeper-storage: transactional persistence for users, secrets and large objects
//!
//! [`Storage`] is the contract the daemon's handlers are written against;
//! [`SqliteStore`] implements it over a bounded `sqlx` pool. Every
//! multi-statement operation runs inside one transaction that commits only on
//! success and rolls back when dropped.

pub mod error;
pub mod health;
pub mod large_object;
pub mod model;
pub mod sqlite;

use std::future::Future;

pub use error::{StorageError, StorageResult};
pub use health::is_healthy;
pub use model::{
    BinaryRecord, Counts, FieldSet, ObjectChunk, SecretRecord, User, BINARIES, CARDS, NOTES,
    PASSWORDS,
};
pub use sqlite::SqliteStore;

/// Persistence contract. All lookups are scoped to the owning user; a record
/// that exists under another user is reported as [`StorageError::NotFound`].
pub trait Storage: Send + Sync + 'static {
    /// Round-trip to the database.
    fn ping(&self) -> impl Future<Output = StorageResult<()>> + Send;

    /// Create an account. A taken user id is [`StorageError::Conflict`].
    fn write_user(
        &self,
        user_id: &str,
        passwd_hash: &str,
    ) -> impl Future<Output = StorageResult<()>> + Send;

    fn read_user(&self, user_id: &str) -> impl Future<Output = StorageResult<User>> + Send;

    /// Record counts of every kind owned by `user_id`.
    fn counts(&self, user_id: &str) -> impl Future<Output = StorageResult<Counts>> + Send;

    /// Names of the user's records of one kind, sorted.
    fn list(
        &self,
        set: &'static FieldSet,
        user_id: &str,
    ) -> impl Future<Output = StorageResult<Vec<String>>> + Send;

    fn read(
        &self,
        set: &'static FieldSet,
        user_id: &str,
        name: &str,
    ) -> impl Future<Output = StorageResult<SecretRecord>> + Send;

    /// Insert a record, returning its server-assigned id. `record.id` is ignored.
    fn write(
        &self,
        set: &'static FieldSet,
        record: &SecretRecord,
    ) -> impl Future<Output = StorageResult<i64>> + Send;

    /// Replace name and every field of the record `(record.id, record.user_id)`.
    fn update(
        &self,
        set: &'static FieldSet,
        record: &SecretRecord,
    ) -> impl Future<Output = StorageResult<()>> + Send;

    fn delete(
        &self,
        set: &'static FieldSet,
        user_id: &str,
        name: &str,
    ) -> impl Future<Output = StorageResult<()>> + Send;

    fn binary_read(
        &self,
        user_id: &str,
        name: &str,
    ) -> impl Future<Output = StorageResult<BinaryRecord>> + Send;

    /// Insert binary metadata together with a fresh empty large object.
    /// Returns `(id, bin_id)`.
    fn binary_write(
        &self,
        record: &BinaryRecord,
    ) -> impl Future<Output = StorageResult<(i64, i64)>> + Send;

    /// Update binary metadata. `record.bin_id == 0` keeps the payload; any
    /// other value must name the record's current object and swaps it for a
    /// fresh empty one, releasing the old object. Returns the resulting `bin_id`.
    fn binary_update(
        &self,
        record: &BinaryRecord,
    ) -> impl Future<Output = StorageResult<i64>> + Send;

    /// Delete binary metadata and release its large object.
    fn binary_delete(
        &self,
        user_id: &str,
        name: &str,
    ) -> impl Future<Output = StorageResult<()>> + Send;

    /// True if `bin_id` backs a binary record owned by `user_id`.
    fn object_owned_by(
        &self,
        user_id: &str,
        bin_id: i64,
    ) -> impl Future<Output = StorageResult<bool>> + Send;

    fn allocate_object(&self) -> impl Future<Output = StorageResult<i64>> + Send;

    fn put_chunk(
        &self,
        id: i64,
        offset: i64,
        bytes: &[u8],
    ) -> impl Future<Output = StorageResult<()>> + Send;

    /// Up to `max_len` bytes at `offset`; empty at or past the end.
    fn get_chunk(
        &self,
        id: i64,
        offset: i64,
        max_len: usize,
    ) -> impl Future<Output = StorageResult<Vec<u8>>> + Send;

    /// Like [`Storage::get_chunk`], plus the object's generation read from the
    /// same snapshot.
    fn get_object_chunk(
        &self,
        id: i64,
        offset: i64,
        max_len: usize,
    ) -> impl Future<Output = StorageResult<ObjectChunk>> + Send;

    fn release_object(&self, id: i64) -> impl Future<Output = StorageResult<()>> + Send;

    /// Atomically move the content of `staging` onto `target` and drop `staging`.
    /// The target's generation becomes `staging`.
    fn replace_object(
        &self,
        target: i64,
        staging: i64,
    ) -> impl Future<Output = StorageResult<()>> + Send;
}
