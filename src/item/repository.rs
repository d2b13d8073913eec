//! Item persistence.
//!
//! Reads go through the pool. Writes that must be atomic with quota
//! bookkeeping take a connection so callers can run them inside a
//! transaction.

use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use super::types::{FileContent, Item, ItemKind, ItemUpdate, NewItem};
use crate::datetime::now_string;
use crate::db::{to_db_size, DbPool};
use crate::{Result, StowageError};

const ITEM_COLUMNS: &str = "id, owner_id, parent_id, kind, name, path, mime_type, file_size, \
     uploaded_size, stored_name, download_url, thumbnail_url, created_at, updated_at";

/// Map a constraint failure on `(owner_id, path)` to a validation error.
fn path_conflict(e: sqlx::Error, path: &str) -> StowageError {
    match &e {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            StowageError::Validation(format!("an item already exists at {path}"))
        }
        _ => StowageError::Database(e.to_string()),
    }
}

/// Repository for item operations.
pub struct ItemRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> ItemRepository<'a> {
    /// Create a new ItemRepository with the given database pool reference.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Get an item by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<Item>> {
        let query = format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?");
        let item = sqlx::query_as::<_, Item>(&query)
            .bind(id)
            .fetch_optional(self.pool)
            .await
            .map_err(|e| StowageError::Database(e.to_string()))?;

        Ok(item)
    }

    /// Find an owner's item by its full path.
    pub async fn find_by_path(&self, owner_id: i64, path: &str) -> Result<Option<Item>> {
        let query = format!("SELECT {ITEM_COLUMNS} FROM items WHERE owner_id = ? AND path = ?");
        let item = sqlx::query_as::<_, Item>(&query)
            .bind(owner_id)
            .bind(path)
            .fetch_optional(self.pool)
            .await
            .map_err(|e| StowageError::Database(e.to_string()))?;

        Ok(item)
    }

    /// List direct children of a folder, or root-level items for `None`.
    ///
    /// Folders come first, then files, each sorted by name.
    pub async fn list_children(&self, owner_id: i64, parent_id: Option<i64>) -> Result<Vec<Item>> {
        let query = format!(
            "SELECT {ITEM_COLUMNS} FROM items
             WHERE owner_id = ? AND parent_id IS ?
             ORDER BY kind = 'file', name, id"
        );
        let items = sqlx::query_as::<_, Item>(&query)
            .bind(owner_id)
            .bind(parent_id)
            .fetch_all(self.pool)
            .await
            .map_err(|e| StowageError::Database(e.to_string()))?;

        Ok(items)
    }

    /// List incomplete files not touched since `cutoff`, by ID, starting
    /// after `after_id`.
    pub async fn list_stale_uploads(
        &self,
        cutoff: &str,
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<Item>> {
        let query = format!(
            "SELECT {ITEM_COLUMNS} FROM items
             WHERE kind = 'file' AND uploaded_size < file_size AND updated_at < ? AND id > ?
             ORDER BY id
             LIMIT ?"
        );
        let items = sqlx::query_as::<_, Item>(&query)
            .bind(cutoff)
            .bind(after_id)
            .bind(limit)
            .fetch_all(self.pool)
            .await
            .map_err(|e| StowageError::Database(e.to_string()))?;

        Ok(items)
    }

    /// Insert an item and return its ID.
    pub async fn insert_in(conn: &mut SqliteConnection, item: &NewItem) -> Result<i64> {
        let now = now_string();
        let empty = FileContent {
            mime_type: None,
            file_size: 0,
            uploaded_size: 0,
            stored_name: String::new(),
            download_url: None,
            thumbnail_url: None,
        };
        let (content, stored_name) = match &item.kind {
            ItemKind::File(content) => (content, Some(content.stored_name.as_str())),
            ItemKind::Folder => (&empty, None),
        };

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO items (owner_id, parent_id, kind, name, path, mime_type, file_size,
                                uploaded_size, stored_name, download_url, thumbnail_url,
                                created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(item.owner_id)
        .bind(item.parent_id)
        .bind(item.kind.as_str())
        .bind(&item.name)
        .bind(&item.path)
        .bind(&content.mime_type)
        .bind(to_db_size(content.file_size))
        .bind(to_db_size(content.uploaded_size))
        .bind(stored_name)
        .bind(&content.download_url)
        .bind(&content.thumbnail_url)
        .bind(&now)
        .bind(&now)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| path_conflict(e, &item.path))?;

        Ok(id)
    }

    /// Get an item by ID on the given connection.
    pub async fn get_by_id_in(conn: &mut SqliteConnection, id: i64) -> Result<Option<Item>> {
        let query = format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?");
        let item = sqlx::query_as::<_, Item>(&query)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| StowageError::Database(e.to_string()))?;

        Ok(item)
    }

    /// Bump `updated_at`. Returns `false` if the item is gone.
    pub async fn touch_in(conn: &mut SqliteConnection, id: i64) -> Result<bool> {
        let result = sqlx::query("UPDATE items SET updated_at = ? WHERE id = ?")
            .bind(now_string())
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(|e| StowageError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    /// List the item at `path` and everything below it.
    pub async fn list_subtree_in(
        conn: &mut SqliteConnection,
        owner_id: i64,
        path: &str,
    ) -> Result<Vec<Item>> {
        let query = format!(
            "SELECT {ITEM_COLUMNS} FROM items
             WHERE owner_id = ? AND (path = ? OR substr(path, 1, length(?) + 1) = ? || '/')
             ORDER BY path"
        );
        let items = sqlx::query_as::<_, Item>(&query)
            .bind(owner_id)
            .bind(path)
            .bind(path)
            .bind(path)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| StowageError::Database(e.to_string()))?;

        Ok(items)
    }

    /// Replace a file's content details for a fresh upload.
    ///
    /// External URLs are cleared since they described the old content.
    pub async fn reset_upload_in(
        conn: &mut SqliteConnection,
        id: i64,
        content: &FileContent,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE items
             SET mime_type = ?, file_size = ?, uploaded_size = ?, stored_name = ?,
                 download_url = NULL, thumbnail_url = NULL, updated_at = ?
             WHERE id = ? AND kind = 'file'",
        )
        .bind(&content.mime_type)
        .bind(to_db_size(content.file_size))
        .bind(to_db_size(content.uploaded_size))
        .bind(&content.stored_name)
        .bind(now_string())
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(|e| StowageError::Database(e.to_string()))?;

        Ok(())
    }

    /// Read the recorded contiguous size of a file.
    pub async fn uploaded_size_in(conn: &mut SqliteConnection, id: i64) -> Result<u64> {
        let size: Option<i64> = sqlx::query_scalar("SELECT uploaded_size FROM items WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| StowageError::Database(e.to_string()))?;

        size.map(|s| s.max(0) as u64)
            .ok_or_else(|| StowageError::NotFound(format!("item {id}")))
    }

    /// Set the contiguous size of a file.
    pub async fn set_uploaded_size_in(
        conn: &mut SqliteConnection,
        id: i64,
        uploaded_size: u64,
    ) -> Result<()> {
        sqlx::query("UPDATE items SET uploaded_size = ?, updated_at = ? WHERE id = ?")
            .bind(to_db_size(uploaded_size))
            .bind(now_string())
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(|e| StowageError::Database(e.to_string()))?;

        Ok(())
    }

    /// Record a received half-open byte range. Duplicates are ignored.
    pub async fn record_range_in(
        conn: &mut SqliteConnection,
        item_id: i64,
        start: u64,
        end: u64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO upload_ranges (item_id, start_byte, end_byte) VALUES (?, ?, ?)",
        )
        .bind(item_id)
        .bind(to_db_size(start))
        .bind(to_db_size(end))
        .execute(&mut *conn)
        .await
        .map_err(|e| StowageError::Database(e.to_string()))?;

        Ok(())
    }

    /// List received ranges of an upload, ordered by start.
    pub async fn list_ranges_in(conn: &mut SqliteConnection, item_id: i64) -> Result<Vec<(u64, u64)>> {
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT start_byte, end_byte FROM upload_ranges
             WHERE item_id = ? ORDER BY start_byte, end_byte",
        )
        .bind(item_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| StowageError::Database(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(start, end)| (start.max(0) as u64, end.max(0) as u64))
            .collect())
    }

    /// Forget the received ranges of an upload.
    pub async fn clear_ranges_in(conn: &mut SqliteConnection, item_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM upload_ranges WHERE item_id = ?")
            .bind(item_id)
            .execute(&mut *conn)
            .await
            .map_err(|e| StowageError::Database(e.to_string()))?;

        Ok(())
    }

    /// Rewrite `old_path` and every path below it to start with `new_path`.
    ///
    /// Returns the number of rewritten items.
    pub async fn rewrite_paths_in(
        conn: &mut SqliteConnection,
        owner_id: i64,
        old_path: &str,
        new_path: &str,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE items
             SET path = ? || substr(path, length(?) + 1), updated_at = ?
             WHERE owner_id = ? AND (path = ? OR substr(path, 1, length(?) + 1) = ? || '/')",
        )
        .bind(new_path)
        .bind(old_path)
        .bind(now_string())
        .bind(owner_id)
        .bind(old_path)
        .bind(old_path)
        .bind(old_path)
        .execute(&mut *conn)
        .await
        .map_err(|e| path_conflict(e, new_path))?;

        Ok(result.rows_affected())
    }

    /// Apply the column changes of an update to a single item.
    ///
    /// Paths are not touched; see [`ItemRepository::rewrite_paths_in`].
    pub async fn apply_update_in(
        conn: &mut SqliteConnection,
        id: i64,
        update: &ItemUpdate,
    ) -> Result<()> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE items SET updated_at = ");
        query.push_bind(now_string());

        if let Some(ref name) = update.name {
            query.push(", name = ");
            query.push_bind(name.clone());
        }

        if let Some(parent_id) = update.parent_id {
            query.push(", parent_id = ");
            query.push_bind(parent_id);
        }

        if let Some(ref download_url) = update.download_url {
            query.push(", download_url = ");
            query.push_bind(download_url.clone());
        }

        if let Some(ref thumbnail_url) = update.thumbnail_url {
            query.push(", thumbnail_url = ");
            query.push_bind(thumbnail_url.clone());
        }

        query.push(" WHERE id = ");
        query.push_bind(id);

        query
            .build()
            .execute(&mut *conn)
            .await
            .map_err(|e| StowageError::Database(e.to_string()))?;

        Ok(())
    }

    /// Delete an item; children, ranges and allocations cascade.
    pub async fn delete_in(conn: &mut SqliteConnection, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM items WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(|e| StowageError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}
