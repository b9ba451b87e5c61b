//! Paged large objects
//!
//! An object is a row in `large_objects` plus zero or more pages of at most
//! [`PAGE_SIZE`] bytes in `large_object_pages`. Byte `n` lives in page
//! `n / PAGE_SIZE` at position `n % PAGE_SIZE`. Missing pages and the unwritten
//! tail of a short page read back as zeros, as long as they lie before the end
//! of the object. The object length is `last_page_no * PAGE_SIZE + len(last page)`.
//!
//! Each object also carries a `generation`: 0 until its content is first
//! replaced, then the id of the staging object whose pages were swapped in.
//!
//! Every function takes a plain connection so callers decide the transaction
//! boundary.

use sqlx::{Row, SqliteConnection};

use crate::error::{StorageError, StorageResult};

/// Bytes per stored page
pub const PAGE_SIZE: usize = 2048;

const PAGE: i64 = PAGE_SIZE as i64;

pub(crate) async fn allocate(conn: &mut SqliteConnection) -> StorageResult<i64> {
    let result = sqlx::query("INSERT INTO large_objects DEFAULT VALUES")
        .execute(&mut *conn)
        .await?;
    Ok(result.last_insert_rowid())
}

pub(crate) async fn exists(conn: &mut SqliteConnection, id: i64) -> StorageResult<bool> {
    let found: Option<i64> = sqlx::query_scalar("SELECT id FROM large_objects WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(found.is_some())
}

pub(crate) async fn generation(conn: &mut SqliteConnection, id: i64) -> StorageResult<i64> {
    sqlx::query_scalar("SELECT generation FROM large_objects WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(StorageError::NotFound)
}

/// Current length of an object in bytes.
pub(crate) async fn length(conn: &mut SqliteConnection, id: i64) -> StorageResult<i64> {
    let last = sqlx::query(
        "SELECT page_no, length(data) AS len FROM large_object_pages \
         WHERE lo_id = ? ORDER BY page_no DESC LIMIT 1",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    match last {
        Some(row) => {
            let page_no: i64 = row.try_get("page_no")?;
            let len: i64 = row.try_get("len")?;
            Ok(page_no * PAGE + len)
        }
        None => Ok(0),
    }
}

/// Write `data` at `offset`, extending the object as needed.
pub(crate) async fn write_at(
    conn: &mut SqliteConnection,
    id: i64,
    offset: i64,
    data: &[u8],
) -> StorageResult<()> {
    if offset < 0 {
        return Err(StorageError::OutOfRange(offset));
    }
    if !exists(conn, id).await? {
        return Err(StorageError::NotFound);
    }
    if data.is_empty() {
        return Ok(());
    }

    let end = offset + data.len() as i64;
    let mut pos = offset;
    while pos < end {
        let page_no = pos / PAGE;
        let page_start = page_no * PAGE;
        let in_page = (pos - page_start) as usize;
        let take = (PAGE_SIZE - in_page).min((end - pos) as usize);
        let src_start = (pos - offset) as usize;

        let mut page: Vec<u8> = sqlx::query_scalar(
            "SELECT data FROM large_object_pages WHERE lo_id = ? AND page_no = ?",
        )
        .bind(id)
        .bind(page_no)
        .fetch_optional(&mut *conn)
        .await?
        .unwrap_or_default();

        if page.len() < in_page + take {
            page.resize(in_page + take, 0);
        }
        page[in_page..in_page + take].copy_from_slice(&data[src_start..src_start + take]);

        sqlx::query(
            "INSERT INTO large_object_pages (lo_id, page_no, data) VALUES (?, ?, ?) \
             ON CONFLICT (lo_id, page_no) DO UPDATE SET data = excluded.data",
        )
        .bind(id)
        .bind(page_no)
        .bind(&page)
        .execute(&mut *conn)
        .await?;

        pos += take as i64;
    }
    Ok(())
}

/// Read up to `max_len` bytes starting at `offset`. Returns fewer bytes only
/// at the end of the object; an offset at or past the end yields nothing.
pub(crate) async fn read_at(
    conn: &mut SqliteConnection,
    id: i64,
    offset: i64,
    max_len: usize,
) -> StorageResult<Vec<u8>> {
    if offset < 0 {
        return Err(StorageError::OutOfRange(offset));
    }
    if !exists(conn, id).await? {
        return Err(StorageError::NotFound);
    }

    let object_len = length(conn, id).await?;
    if offset >= object_len || max_len == 0 {
        return Ok(Vec::new());
    }
    let len = (object_len - offset).min(max_len as i64);
    let end = offset + len;

    let rows = sqlx::query(
        "SELECT page_no, data FROM large_object_pages \
         WHERE lo_id = ? AND page_no BETWEEN ? AND ? ORDER BY page_no",
    )
    .bind(id)
    .bind(offset / PAGE)
    .bind((end - 1) / PAGE)
    .fetch_all(&mut *conn)
    .await?;

    let mut out = vec![0u8; len as usize];
    for row in rows {
        let page_no: i64 = row.try_get("page_no")?;
        let data: Vec<u8> = row.try_get("data")?;

        let page_start = page_no * PAGE;
        let page_end = page_start + data.len() as i64;
        let from = offset.max(page_start);
        let to = end.min(page_end);
        if from >= to {
            continue;
        }
        out[(from - offset) as usize..(to - offset) as usize]
            .copy_from_slice(&data[(from - page_start) as usize..(to - page_start) as usize]);
    }
    Ok(out)
}

/// Drop an object and all of its pages.
pub(crate) async fn release(conn: &mut SqliteConnection, id: i64) -> StorageResult<()> {
    sqlx::query("DELETE FROM large_object_pages WHERE lo_id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    let result = sqlx::query("DELETE FROM large_objects WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StorageError::NotFound);
    }
    Ok(())
}

/// Move every page of `staging` onto `target`, discarding the old content of
/// `target`, then drop `staging`. The target's generation becomes `staging`.
pub(crate) async fn replace(
    conn: &mut SqliteConnection,
    target: i64,
    staging: i64,
) -> StorageResult<()> {
    if !exists(conn, target).await? || !exists(conn, staging).await? {
        return Err(StorageError::NotFound);
    }
    sqlx::query("DELETE FROM large_object_pages WHERE lo_id = ?")
        .bind(target)
        .execute(&mut *conn)
        .await?;
    sqlx::query("UPDATE large_object_pages SET lo_id = ? WHERE lo_id = ?")
        .bind(target)
        .bind(staging)
        .execute(&mut *conn)
        .await?;
    sqlx::query("UPDATE large_objects SET generation = ? WHERE id = ?")
        .bind(staging)
        .bind(target)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM large_objects WHERE id = ?")
        .bind(staging)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Drop every object no binary record points at, returning how many went.
pub(crate) async fn release_orphans(conn: &mut SqliteConnection) -> StorageResult<u64> {
    sqlx::query(
        "DELETE FROM large_object_pages \
         WHERE lo_id NOT IN (SELECT bin_id FROM binaries)",
    )
    .execute(&mut *conn)
    .await?;
    let result = sqlx::query(
        "DELETE FROM large_objects WHERE id NOT IN (SELECT bin_id FROM binaries)",
    )
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}
