//! Local-disk blob storage.

use std::fs;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

use super::{BlobReader, BlobStore};
use crate::{Result, StowageError};

/// Blob store backed by a directory on local disk.
///
/// Blobs are stored in a sharded directory structure:
/// ```text
/// {base_path}/
/// ├── ab/
/// │   └── ab12cd34-5678-90ab-cdef-123456789012.txt
/// ├── cd/
/// │   └── cd90ab12-3456-7890-abcd-ef1234567890.bin
/// └── ...
/// ```
#[derive(Debug, Clone)]
pub struct FileStorage {
    base_path: PathBuf,
}

impl FileStorage {
    /// Create a new FileStorage with the given base path.
    ///
    /// The base directory will be created if it doesn't exist.
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path)?;

        Ok(Self { base_path })
    }

    /// Get the base path of this storage.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Get the full file path for a stored name.
    pub fn get_file_path(&self, stored_name: &str) -> PathBuf {
        let shard = Self::get_shard(stored_name);
        self.base_path.join(shard).join(stored_name)
    }

    /// Remove empty shard directories.
    pub fn cleanup_empty_dirs(&self) -> Result<usize> {
        let mut removed = 0;

        for entry in fs::read_dir(&self.base_path)?.flatten() {
            let path = entry.path();
            if path.is_dir() {
                let empty = fs::read_dir(&path)
                    .map(|mut entries| entries.next().is_none())
                    .unwrap_or(false);
                if empty && fs::remove_dir(&path).is_ok() {
                    removed += 1;
                }
            }
        }

        Ok(removed)
    }

    /// First two characters of the stored name.
    fn get_shard(stored_name: &str) -> &str {
        match stored_name.char_indices().nth(2) {
            Some((idx, _)) => &stored_name[..idx],
            None => stored_name,
        }
    }

    /// Reject names that could escape the base directory.
    fn checked_path(&self, stored_name: &str) -> Result<PathBuf> {
        if stored_name.is_empty()
            || stored_name.contains(['/', '\\'])
            || stored_name.starts_with('.')
        {
            return Err(StowageError::Validation(format!(
                "invalid stored name: {stored_name}"
            )));
        }
        Ok(self.get_file_path(stored_name))
    }

    fn not_found(stored_name: &str, e: io::Error) -> StowageError {
        if e.kind() == io::ErrorKind::NotFound {
            StowageError::NotFound(format!("blob {stored_name}"))
        } else {
            e.into()
        }
    }
}

#[async_trait]
impl BlobStore for FileStorage {
    async fn write_at(&self, stored_name: &str, offset: u64, bytes: &[u8]) -> Result<()> {
        let file_path = self.checked_path(stored_name)?;

        if let Some(parent) = file_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&file_path)
            .await?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(bytes).await?;
        file.sync_data().await?;

        Ok(())
    }

    async fn read(&self, stored_name: &str) -> Result<Vec<u8>> {
        let file_path = self.checked_path(stored_name)?;
        tokio::fs::read(&file_path)
            .await
            .map_err(|e| Self::not_found(stored_name, e))
    }

    async fn open(&self, stored_name: &str) -> Result<BlobReader> {
        let file_path = self.checked_path(stored_name)?;
        let file = tokio::fs::File::open(&file_path)
            .await
            .map_err(|e| Self::not_found(stored_name, e))?;
        Ok(Box::new(file))
    }

    async fn size(&self, stored_name: &str) -> Result<u64> {
        let file_path = self.checked_path(stored_name)?;
        tokio::fs::metadata(&file_path)
            .await
            .map(|m| m.len())
            .map_err(|e| Self::not_found(stored_name, e))
    }

    async fn delete(&self, stored_name: &str) -> Result<bool> {
        let file_path = self.checked_path(stored_name)?;

        match tokio::fs::remove_file(&file_path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, stored_name: &str) -> bool {
        match self.checked_path(stored_name) {
            Ok(path) => tokio::fs::metadata(&path).await.is_ok(),
            Err(_) => false,
        }
    }
}
