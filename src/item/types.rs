//! Item types.

use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

/// A folder or file in an owner's tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// Unique item ID.
    pub id: i64,
    /// Owner of the item.
    pub owner_id: i64,
    /// Parent folder ID (None for root-level items).
    pub parent_id: Option<i64>,
    /// Item name, a single path component.
    pub name: String,
    /// Materialised full path.
    pub path: String,
    /// Folder or file, with file content details.
    pub kind: ItemKind,
    /// When the item was created.
    pub created_at: String,
    /// When the item last changed.
    pub updated_at: String,
}

/// What an item is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemKind {
    Folder,
    File(FileContent),
}

/// Content attributes only files carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    /// MIME type recorded at upload.
    pub mime_type: Option<String>,
    /// Declared total size in bytes.
    pub file_size: u64,
    /// Contiguous bytes received from offset 0.
    pub uploaded_size: u64,
    /// Blob name in the blob store.
    pub stored_name: String,
    /// External location served instead of the local blob.
    pub download_url: Option<String>,
    /// External thumbnail location, may contain a `{size}` placeholder.
    pub thumbnail_url: Option<String>,
}

impl FileContent {
    /// Check whether every declared byte has arrived.
    pub fn is_complete(&self) -> bool {
        self.uploaded_size == self.file_size
    }
}

impl Item {
    pub fn is_folder(&self) -> bool {
        matches!(self.kind, ItemKind::Folder)
    }

    /// File details, or `None` for folders.
    pub fn as_file(&self) -> Option<&FileContent> {
        match &self.kind {
            ItemKind::File(content) => Some(content),
            ItemKind::Folder => None,
        }
    }

    /// Declared size; folders report 0.
    pub fn file_size(&self) -> u64 {
        self.as_file().map_or(0, |f| f.file_size)
    }

    /// Received size; folders report 0.
    pub fn uploaded_size(&self) -> u64 {
        self.as_file().map_or(0, |f| f.uploaded_size)
    }

    /// Kind label as stored in the database.
    pub fn kind_str(&self) -> &'static str {
        self.kind.as_str()
    }
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Folder => "folder",
            ItemKind::File(_) => "file",
        }
    }
}

fn decode_error(column: &str, message: String) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: message.into(),
    }
}

fn read_size(row: &SqliteRow, column: &str) -> sqlx::Result<u64> {
    let value: i64 = row.try_get(column)?;
    u64::try_from(value).map_err(|_| decode_error(column, format!("negative size {value}")))
}

impl<'r> FromRow<'r, SqliteRow> for Item {
    fn from_row(row: &'r SqliteRow) -> sqlx::Result<Self> {
        let kind: String = row.try_get("kind")?;
        let kind = match kind.as_str() {
            "folder" => ItemKind::Folder,
            "file" => {
                let stored_name: Option<String> = row.try_get("stored_name")?;
                let stored_name = stored_name
                    .ok_or_else(|| decode_error("stored_name", "file without blob".to_string()))?;
                ItemKind::File(FileContent {
                    mime_type: row.try_get("mime_type")?,
                    file_size: read_size(row, "file_size")?,
                    uploaded_size: read_size(row, "uploaded_size")?,
                    stored_name,
                    download_url: row.try_get("download_url")?,
                    thumbnail_url: row.try_get("thumbnail_url")?,
                })
            }
            other => return Err(decode_error("kind", format!("unknown item kind '{other}'"))),
        };

        Ok(Self {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            parent_id: row.try_get("parent_id")?,
            name: row.try_get("name")?,
            path: row.try_get("path")?,
            kind,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Data for inserting an item.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub owner_id: i64,
    pub parent_id: Option<i64>,
    pub name: String,
    pub path: String,
    pub kind: ItemKind,
}

impl NewItem {
    /// A folder at `path`.
    pub fn folder(owner_id: i64, name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            owner_id,
            parent_id: None,
            name: name.into(),
            path: path.into(),
            kind: ItemKind::Folder,
        }
    }

    /// A file at `path` with the given content details.
    pub fn file(
        owner_id: i64,
        name: impl Into<String>,
        path: impl Into<String>,
        content: FileContent,
    ) -> Self {
        Self {
            owner_id,
            parent_id: None,
            name: name.into(),
            path: path.into(),
            kind: ItemKind::File(content),
        }
    }

    /// Set the parent folder.
    pub fn with_parent(mut self, parent_id: Option<i64>) -> Self {
        self.parent_id = parent_id;
        self
    }
}

/// Builder for updating an item.
///
/// `Some(None)` clears a nullable field; `None` leaves it untouched.
#[derive(Debug, Clone, Default)]
pub struct ItemUpdate {
    /// New name.
    pub name: Option<String>,
    /// New parent folder ID.
    pub parent_id: Option<Option<i64>>,
    /// New external download URL.
    pub download_url: Option<Option<String>>,
    /// New external thumbnail URL.
    pub thumbnail_url: Option<Option<String>>,
}

impl ItemUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the parent folder ID.
    pub fn parent_id(mut self, parent_id: Option<i64>) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Set or clear the download URL.
    pub fn download_url(mut self, url: Option<impl Into<String>>) -> Self {
        self.download_url = Some(url.map(|s| s.into()));
        self
    }

    /// Set or clear the thumbnail URL.
    pub fn thumbnail_url(mut self, url: Option<impl Into<String>>) -> Self {
        self.thumbnail_url = Some(url.map(|s| s.into()));
        self
    }

    /// Check if any fields are set.
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.parent_id.is_none()
            && self.download_url.is_none()
            && self.thumbnail_url.is_none()
    }

    /// Check if the name or parent changes.
    pub fn moves(&self) -> bool {
        self.name.is_some() || self.parent_id.is_some()
    }

    /// Check if any content URL changes.
    pub fn touches_urls(&self) -> bool {
        self.download_url.is_some() || self.thumbnail_url.is_some()
    }
}
