//! SQLite implementation of [`Storage`] over a bounded `sqlx` pool.

use std::str::FromStr;
use std::time::Duration;

use keeper_core::config::StorageConfig;
use keeper_core::SecretKind;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::error::{StorageError, StorageResult};
use crate::large_object;
use crate::model::{BinaryRecord, Counts, FieldSet, ObjectChunk, SecretRecord, User};
use crate::Storage;

/// Central store handle. Cheap to clone (the pool is shared).
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database named by `config.database_url`, run
    /// all pending migrations and drop large objects left behind by uploads
    /// that never finished.
    ///
    /// WAL journal mode and foreign keys are set on the connection options:
    /// SQLite cannot change `journal_mode` inside the transaction sqlx wraps
    /// around each migration.
    pub async fn open(config: &StorageConfig) -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str(&config.database_url)
            .map_err(|e| StorageError::Config(format!("invalid database_url: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StorageError::Migration(e.to_string()))?;

        let store = Self { pool };
        let swept = store.sweep_orphans().await?;
        tracing::info!(
            url = %config.database_url,
            max_connections = config.max_connections,
            swept,
            "storage opened"
        );
        Ok(store)
    }

    /// Release every large object that no binary record references. Only
    /// safe while no upload is in flight.
    pub async fn sweep_orphans(&self) -> StorageResult<u64> {
        let mut tx = self.pool.begin().await?;
        let swept = large_object::release_orphans(&mut tx).await?;
        tx.commit().await?;
        if swept > 0 {
            tracing::warn!(swept, "released orphaned large objects");
        }
        Ok(swept)
    }

    /// Wait for in-flight queries and close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn check_arity(set: &FieldSet, record: &SecretRecord) -> StorageResult<()> {
    if record.fields.len() != set.fields.len() {
        return Err(StorageError::Config(format!(
            "{}: expected {} fields, got {}",
            set.table,
            set.fields.len(),
            record.fields.len()
        )));
    }
    Ok(())
}

impl Storage for SqliteStore {
    async fn ping(&self) -> StorageResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn write_user(&self, user_id: &str, passwd_hash: &str) -> StorageResult<()> {
        sqlx::query("INSERT INTO users (user_id, passwd_hash) VALUES (?, ?)")
            .bind(user_id)
            .bind(passwd_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn read_user(&self, user_id: &str) -> StorageResult<User> {
        let row = sqlx::query("SELECT user_id, passwd_hash FROM users WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(User {
            user_id: row.try_get("user_id")?,
            passwd_hash: row.try_get("passwd_hash")?,
        })
    }

    async fn counts(&self, user_id: &str) -> StorageResult<Counts> {
        let row = sqlx::query(
            "SELECT \
               (SELECT COUNT(*) FROM passwords WHERE user_id = ?) AS passwords, \
               (SELECT COUNT(*) FROM cards     WHERE user_id = ?) AS cards, \
               (SELECT COUNT(*) FROM notes     WHERE user_id = ?) AS notes, \
               (SELECT COUNT(*) FROM binaries  WHERE user_id = ?) AS binaries",
        )
        .bind(user_id)
        .bind(user_id)
        .bind(user_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(Counts {
            passwords: row.try_get("passwords")?,
            cards: row.try_get("cards")?,
            notes: row.try_get("notes")?,
            binaries: row.try_get("binaries")?,
        })
    }

    async fn list(&self, set: &'static FieldSet, user_id: &str) -> StorageResult<Vec<String>> {
        let sql = format!(
            "SELECT name FROM {} WHERE user_id = ? ORDER BY name",
            set.table
        );
        let names = sqlx::query_scalar(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(names)
    }

    async fn read(
        &self,
        set: &'static FieldSet,
        user_id: &str,
        name: &str,
    ) -> StorageResult<SecretRecord> {
        let sql = format!(
            "SELECT id, name, {} FROM {} WHERE user_id = ? AND name = ?",
            set.fields.join(", "),
            set.table
        );
        let row = sqlx::query(&sql)
            .bind(user_id)
            .bind(name)
            .fetch_one(&self.pool)
            .await?;

        let mut fields = Vec::with_capacity(set.fields.len());
        for i in 0..set.fields.len() {
            fields.push(row.try_get::<Vec<u8>, _>(i + 2)?);
        }
        Ok(SecretRecord {
            id: row.try_get("id")?,
            user_id: user_id.to_owned(),
            name: row.try_get("name")?,
            fields,
        })
    }

    async fn write(&self, set: &'static FieldSet, record: &SecretRecord) -> StorageResult<i64> {
        check_arity(set, record)?;
        let sql = format!(
            "INSERT INTO {} (user_id, name, {}) VALUES (?, ?{})",
            set.table,
            set.fields.join(", "),
            ", ?".repeat(set.fields.len())
        );

        let mut tx = self.pool.begin().await?;
        let mut query = sqlx::query(&sql).bind(&record.user_id).bind(&record.name);
        for field in &record.fields {
            query = query.bind(field);
        }
        let id = query.execute(&mut *tx).await?.last_insert_rowid();
        tx.commit().await?;

        tracing::debug!(kind = %set.kind, id, "record written");
        Ok(id)
    }

    async fn update(&self, set: &'static FieldSet, record: &SecretRecord) -> StorageResult<()> {
        check_arity(set, record)?;
        let assignments: Vec<String> = set.fields.iter().map(|f| format!("{f} = ?")).collect();
        let sql = format!(
            "UPDATE {} SET name = ?, {} WHERE id = ? AND user_id = ?",
            set.table,
            assignments.join(", ")
        );

        let mut tx = self.pool.begin().await?;
        let mut query = sqlx::query(&sql).bind(&record.name);
        for field in &record.fields {
            query = query.bind(field);
        }
        let result = query
            .bind(record.id)
            .bind(&record.user_id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, set: &'static FieldSet, user_id: &str, name: &str) -> StorageResult<()> {
        if set.kind == SecretKind::Binary {
            return self.binary_delete(user_id, name).await;
        }
        let sql = format!("DELETE FROM {} WHERE user_id = ? AND name = ?", set.table);

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(&sql)
            .bind(user_id)
            .bind(name)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        tx.commit().await?;
        Ok(())
    }

    async fn binary_read(&self, user_id: &str, name: &str) -> StorageResult<BinaryRecord> {
        let row = sqlx::query(
            "SELECT id, name, size, notes, bin_id FROM binaries WHERE user_id = ? AND name = ?",
        )
        .bind(user_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        Ok(BinaryRecord {
            id: row.try_get("id")?,
            user_id: user_id.to_owned(),
            name: row.try_get("name")?,
            size: row.try_get("size")?,
            notes: row.try_get("notes")?,
            bin_id: row.try_get("bin_id")?,
        })
    }

    async fn binary_write(&self, record: &BinaryRecord) -> StorageResult<(i64, i64)> {
        let mut tx = self.pool.begin().await?;
        let bin_id = large_object::allocate(&mut tx).await?;
        let id = sqlx::query(
            "INSERT INTO binaries (user_id, name, size, notes, bin_id) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&record.user_id)
        .bind(&record.name)
        .bind(record.size)
        .bind(&record.notes)
        .bind(bin_id)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();
        tx.commit().await?;

        tracing::debug!(id, bin_id, "binary written");
        Ok((id, bin_id))
    }

    async fn binary_update(&self, record: &BinaryRecord) -> StorageResult<i64> {
        let mut tx = self.pool.begin().await?;
        let current: i64 =
            sqlx::query_scalar("SELECT bin_id FROM binaries WHERE id = ? AND user_id = ?")
                .bind(record.id)
                .bind(&record.user_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(StorageError::NotFound)?;

        let reset = record.bin_id != 0;
        if reset && record.bin_id != current {
            return Err(StorageError::NotFound);
        }
        let bin_id = if reset {
            large_object::allocate(&mut tx).await?
        } else {
            current
        };

        sqlx::query(
            "UPDATE binaries SET name = ?, size = ?, notes = ?, bin_id = ? \
             WHERE id = ? AND user_id = ?",
        )
        .bind(&record.name)
        .bind(record.size)
        .bind(&record.notes)
        .bind(bin_id)
        .bind(record.id)
        .bind(&record.user_id)
        .execute(&mut *tx)
        .await?;

        if reset {
            large_object::release(&mut tx, current).await?;
        }
        tx.commit().await?;

        if reset {
            tracing::debug!(id = record.id, old = current, new = bin_id, "binary payload reset");
        }
        Ok(bin_id)
    }

    async fn binary_delete(&self, user_id: &str, name: &str) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;
        let bin_id: i64 =
            sqlx::query_scalar("SELECT bin_id FROM binaries WHERE user_id = ? AND name = ?")
                .bind(user_id)
                .bind(name)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(StorageError::NotFound)?;

        sqlx::query("DELETE FROM binaries WHERE user_id = ? AND name = ?")
            .bind(user_id)
            .bind(name)
            .execute(&mut *tx)
            .await?;
        large_object::release(&mut tx, bin_id).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn object_owned_by(&self, user_id: &str, bin_id: i64) -> StorageResult<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT id FROM binaries WHERE user_id = ? AND bin_id = ?")
                .bind(user_id)
                .bind(bin_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }

    async fn allocate_object(&self) -> StorageResult<i64> {
        let mut conn = self.pool.acquire().await?;
        large_object::allocate(&mut conn).await
    }

    async fn put_chunk(&self, id: i64, offset: i64, bytes: &[u8]) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;
        large_object::write_at(&mut tx, id, offset, bytes).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_chunk(&self, id: i64, offset: i64, max_len: usize) -> StorageResult<Vec<u8>> {
        // One read transaction so length and pages come from the same snapshot.
        let mut tx = self.pool.begin().await?;
        let bytes = large_object::read_at(&mut tx, id, offset, max_len).await?;
        tx.commit().await?;
        Ok(bytes)
    }

    async fn get_object_chunk(
        &self,
        id: i64,
        offset: i64,
        max_len: usize,
    ) -> StorageResult<ObjectChunk> {
        let mut tx = self.pool.begin().await?;
        let generation = large_object::generation(&mut tx, id).await?;
        let bytes = large_object::read_at(&mut tx, id, offset, max_len).await?;
        tx.commit().await?;
        Ok(ObjectChunk { generation, bytes })
    }

    async fn release_object(&self, id: i64) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;
        large_object::release(&mut tx, id).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn replace_object(&self, target: i64, staging: i64) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;
        large_object::replace(&mut tx, target, staging).await?;
        tx.commit().await?;
        Ok(())
    }
}
