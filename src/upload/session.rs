//! Chunked upload sessions.
//!
//! A chunk starting at byte 0 begins (or restarts) an upload: quota for
//! the declared total is reserved and a fresh blob is created. Later
//! chunks are written at their offset and advance `uploaded_size` to the
//! end of the gap-free prefix received so far.

use tracing::{debug, info, warn};

use super::locks::UploadLocks;
use super::range::{contiguous_prefix, ContentRange};
use crate::account::QuotaAllocator;
use crate::db::Database;
use crate::item::{
    compose_path, lock_parent, FileContent, Item, ItemKind, ItemRepository, ItemTree, NewItem,
};
use crate::storage::{generate_stored_name, BlobStore};
use crate::{Result, StowageError};

/// Default maximum size of a single chunk (64MB).
pub const DEFAULT_MAX_CHUNK_SIZE: u64 = 64 * 1024 * 1024;

/// Request data for one upload chunk.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Folder to upload into (None for the root).
    pub parent_id: Option<i64>,
    /// Original filename.
    pub filename: String,
    /// Content type sent with the chunk.
    pub mime_type: Option<String>,
    /// Raw `Content-Range` header value; absent for single-shot uploads.
    pub content_range: Option<String>,
    /// Chunk bytes.
    pub content: Vec<u8>,
}

impl UploadRequest {
    /// Create a new upload request.
    pub fn new(filename: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            parent_id: None,
            filename: filename.into(),
            mime_type: None,
            content_range: None,
            content,
        }
    }

    /// Set the parent folder.
    pub fn with_parent(mut self, parent_id: Option<i64>) -> Self {
        self.parent_id = parent_id;
        self
    }

    /// Set the content type.
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Set the Content-Range header value.
    pub fn with_content_range(mut self, content_range: impl Into<String>) -> Self {
        self.content_range = Some(content_range.into());
        self
    }

    /// Content type to record: the sent one unless it is generic, else a
    /// guess from the filename.
    fn resolved_mime_type(&self) -> String {
        match self.mime_type.as_deref() {
            Some(mime) if !mime.is_empty() && mime != "application/octet-stream" => {
                mime.to_string()
            }
            _ => mime_guess::from_path(&self.filename)
                .first_or_octet_stream()
                .to_string(),
        }
    }
}

/// Upload service applying chunks to the item tree.
pub struct UploadService<'a> {
    db: &'a Database,
    storage: &'a dyn BlobStore,
    locks: &'a UploadLocks,
    max_chunk_size: u64,
}

impl<'a> UploadService<'a> {
    /// Create a new UploadService.
    pub fn new(db: &'a Database, storage: &'a dyn BlobStore, locks: &'a UploadLocks) -> Self {
        Self {
            db,
            storage,
            locks,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
        }
    }

    /// Create a new UploadService with a custom max chunk size.
    pub fn with_max_chunk_size(mut self, max_chunk_size: u64) -> Self {
        self.max_chunk_size = max_chunk_size;
        self
    }

    /// Apply one chunk and return the item as it stands afterwards.
    ///
    /// # Validation
    /// - Content-Range must be well formed and match the chunk length
    /// - Chunk must not exceed the configured maximum
    /// - Filename must be a valid item name
    /// - Parent, when given, must be a folder the caller owns
    pub async fn upload_chunk(&self, owner_id: i64, request: UploadRequest) -> Result<Item> {
        let body_len = request.content.len() as u64;
        let range = match request.content_range.as_deref() {
            Some(header) => ContentRange::parse(header)?,
            None => ContentRange::whole(body_len),
        };
        range.check_chunk_len(body_len)?;

        if body_len > self.max_chunk_size {
            let max_mb = self.max_chunk_size / 1024 / 1024;
            return Err(StowageError::Validation(format!(
                "chunk is too large (max {max_mb}MB)"
            )));
        }

        let tree = ItemTree::new(self.db.pool());
        let parent = tree.parent_folder(owner_id, request.parent_id).await?;
        let path = compose_path(parent.as_ref().map(|p| p.path.as_str()), &request.filename)?;

        let _guard = self.locks.acquire(owner_id, &path).await;

        if range.is_first() {
            self.start(owner_id, parent.as_ref(), &path, &request, range)
                .await
        } else {
            self.resume(owner_id, &path, &request.content, range).await
        }
    }

    /// Begin or restart the upload at `path`.
    async fn start(
        &self,
        owner_id: i64,
        parent: Option<&Item>,
        path: &str,
        request: &UploadRequest,
        range: ContentRange,
    ) -> Result<Item> {
        let repo = ItemRepository::new(self.db.pool());
        let existing = repo.find_by_path(owner_id, path).await?;
        let previous_blob = match existing.as_ref().map(|item| &item.kind) {
            Some(ItemKind::Folder) => {
                return Err(StowageError::Validation(format!(
                    "a folder already exists at {path}"
                )));
            }
            Some(ItemKind::File(content)) => Some(content.stored_name.clone()),
            None => None,
        };

        let stored_name = generate_stored_name(&request.filename);
        self.storage.write_at(&stored_name, 0, &request.content).await?;

        let content = FileContent {
            mime_type: Some(request.resolved_mime_type()),
            file_size: range.total,
            uploaded_size: range.len(),
            stored_name: stored_name.clone(),
            download_url: None,
            thumbnail_url: None,
        };

        let committed = self
            .commit_start(owner_id, parent, existing.as_ref(), &request.filename, path, content, range)
            .await;

        let id = match committed {
            Ok(id) => id,
            Err(e) => {
                if let Err(cleanup) = self.storage.delete(&stored_name).await {
                    warn!(blob = %stored_name, "Failed to delete orphaned blob: {}", cleanup);
                }
                return Err(e);
            }
        };

        if let Some(old) = previous_blob {
            if let Err(e) = self.storage.delete(&old).await {
                warn!(blob = %old, "Failed to delete replaced blob: {}", e);
            }
        }

        info!(
            owner_id,
            item_id = id,
            path = %path,
            total = range.total,
            replaced = existing.is_some(),
            "Started upload"
        );

        repo.get_by_id(id)
            .await?
            .ok_or_else(|| StowageError::NotFound(format!("item {id}")))
    }

    /// Reserve quota and write the item row in one transaction.
    ///
    /// The parent is re-checked under the write lock so the row never lands
    /// at a path its parent has moved away from.
    #[allow(clippy::too_many_arguments)]
    async fn commit_start(
        &self,
        owner_id: i64,
        parent: Option<&Item>,
        existing: Option<&Item>,
        name: &str,
        path: &str,
        content: FileContent,
        range: ContentRange,
    ) -> Result<i64> {
        let complete = content.is_complete();
        let mut tx = self.db.pool().begin().await?;
        lock_parent(&mut tx, parent).await?;

        if let Some(item) = existing {
            QuotaAllocator::release_in(&mut tx, item.id).await?;
        }
        let grants = QuotaAllocator::allocate_in(&mut tx, owner_id, range.total).await?;

        let id = match existing {
            Some(item) => {
                ItemRepository::reset_upload_in(&mut tx, item.id, &content).await?;
                ItemRepository::clear_ranges_in(&mut tx, item.id).await?;
                item.id
            }
            None => {
                let new_item = NewItem::file(owner_id, name, path, content)
                    .with_parent(parent.map(|p| p.id));
                ItemRepository::insert_in(&mut tx, &new_item).await?
            }
        };

        QuotaAllocator::attach_in(&mut tx, id, &grants).await?;
        if !complete {
            ItemRepository::record_range_in(&mut tx, id, range.start, range.end).await?;
        }

        tx.commit().await?;
        Ok(id)
    }

    /// Apply a chunk that continues an existing upload.
    async fn resume(
        &self,
        owner_id: i64,
        path: &str,
        bytes: &[u8],
        range: ContentRange,
    ) -> Result<Item> {
        let repo = ItemRepository::new(self.db.pool());
        let item = repo
            .find_by_path(owner_id, path)
            .await?
            .ok_or_else(|| StowageError::UploadNotFound(path.to_string()))?;
        let content = match &item.kind {
            ItemKind::File(content) => content,
            ItemKind::Folder => return Err(StowageError::UploadNotFound(path.to_string())),
        };

        if range.total != content.file_size {
            return Err(StowageError::InvalidRange(format!(
                "declared total {} does not match the upload's {} bytes",
                range.total, content.file_size
            )));
        }

        self.storage
            .write_at(&content.stored_name, range.start, bytes)
            .await?;

        let mut tx = self.db.pool().begin().await?;
        ItemRepository::record_range_in(&mut tx, item.id, range.start, range.end).await?;
        let ranges = ItemRepository::list_ranges_in(&mut tx, item.id).await?;
        let prior = ItemRepository::uploaded_size_in(&mut tx, item.id).await?;
        let uploaded_size = prior
            .max(contiguous_prefix(&ranges))
            .min(content.file_size);
        ItemRepository::set_uploaded_size_in(&mut tx, item.id, uploaded_size).await?;
        if uploaded_size == content.file_size {
            ItemRepository::clear_ranges_in(&mut tx, item.id).await?;
        }
        tx.commit().await?;

        if uploaded_size == content.file_size {
            info!(owner_id, item_id = item.id, path = %path, "Completed upload");
        } else {
            debug!(
                owner_id,
                item_id = item.id,
                range = %range,
                uploaded_size,
                "Applied chunk"
            );
        }

        repo.get_by_id(item.id)
            .await?
            .ok_or_else(|| StowageError::NotFound(format!("item {}", item.id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AccountRepository;
    use crate::storage::FileStorage;
    use tempfile::TempDir;

    struct Fixture {
        _temp_dir: TempDir,
        db: Database,
        storage: FileStorage,
        locks: UploadLocks,
    }

    impl Fixture {
        async fn new(capacity: u64) -> Self {
            let temp_dir = TempDir::new().unwrap();
            let storage = FileStorage::new(temp_dir.path()).unwrap();
            let db = Database::open_in_memory().await.unwrap();
            AccountRepository::new(db.pool())
                .create(1, "main", capacity)
                .await
                .unwrap();
            Self {
                _temp_dir: temp_dir,
                db,
                storage,
                locks: UploadLocks::new(),
            }
        }

        fn service(&self) -> UploadService<'_> {
            UploadService::new(&self.db, &self.storage, &self.locks)
        }

        async fn used(&self) -> i64 {
            AccountRepository::new(self.db.pool())
                .list_by_owner(1)
                .await
                .unwrap()[0]
                .used_bytes
        }
    }

    fn chunk(data: &[u8], start: usize, end: usize) -> UploadRequest {
        UploadRequest::new("data.bin", data[start..end].to_vec())
            .with_content_range(format!("bytes {}-{}/{}", start, end - 1, data.len()))
    }

    #[tokio::test]
    async fn test_single_shot_upload() {
        let fx = Fixture::new(1000).await;
        let item = fx
            .service()
            .upload_chunk(1, UploadRequest::new("hello.txt", b"hello".to_vec()))
            .await
            .unwrap();

        let file = item.as_file().unwrap();
        assert_eq!(item.path, "/hello.txt");
        assert_eq!(file.file_size, 5);
        assert!(file.is_complete());
        assert_eq!(file.mime_type.as_deref(), Some("text/plain"));
        assert_eq!(fx.storage.read(&file.stored_name).await.unwrap(), b"hello");
        assert_eq!(fx.used().await, 5);
    }

    #[tokio::test]
    async fn test_in_order_chunks() {
        let fx = Fixture::new(1000).await;
        let data: Vec<u8> = (0..30).collect();
        let service = fx.service();

        let item = service.upload_chunk(1, chunk(&data, 0, 10)).await.unwrap();
        assert_eq!(item.uploaded_size(), 10);
        assert_eq!(item.file_size(), 30);
        assert_eq!(fx.used().await, 30);

        service.upload_chunk(1, chunk(&data, 10, 20)).await.unwrap();
        let item = service.upload_chunk(1, chunk(&data, 20, 30)).await.unwrap();

        let file = item.as_file().unwrap();
        assert!(file.is_complete());
        assert_eq!(fx.storage.read(&file.stored_name).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_out_of_order_chunk_waits_for_gap() {
        let fx = Fixture::new(1000).await;
        let data: Vec<u8> = (0..30).collect();
        let service = fx.service();

        service.upload_chunk(1, chunk(&data, 0, 10)).await.unwrap();
        let item = service.upload_chunk(1, chunk(&data, 20, 30)).await.unwrap();
        assert_eq!(item.uploaded_size(), 10);

        let item = service.upload_chunk(1, chunk(&data, 10, 20)).await.unwrap();
        assert_eq!(item.uploaded_size(), 30);
        let file = item.as_file().unwrap();
        assert_eq!(fx.storage.read(&file.stored_name).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_retransmitted_chunk_is_idempotent() {
        let fx = Fixture::new(1000).await;
        let data: Vec<u8> = (0..20).collect();
        let service = fx.service();

        service.upload_chunk(1, chunk(&data, 0, 10)).await.unwrap();
        service.upload_chunk(1, chunk(&data, 10, 20)).await.unwrap();
        let item = service.upload_chunk(1, chunk(&data, 10, 20)).await.unwrap();

        assert_eq!(item.uploaded_size(), 20);
        assert_eq!(fx.used().await, 20);
    }

    #[tokio::test]
    async fn test_continuation_without_start() {
        let fx = Fixture::new(1000).await;
        let data: Vec<u8> = (0..20).collect();

        let result = fx.service().upload_chunk(1, chunk(&data, 10, 20)).await;
        assert!(matches!(result, Err(StowageError::UploadNotFound(_))));
    }

    #[tokio::test]
    async fn test_continuation_total_mismatch() {
        let fx = Fixture::new(1000).await;
        let data: Vec<u8> = (0..20).collect();
        let service = fx.service();

        service.upload_chunk(1, chunk(&data, 0, 10)).await.unwrap();
        let request = UploadRequest::new("data.bin", data[10..20].to_vec())
            .with_content_range("bytes 10-19/25");
        let result = service.upload_chunk(1, request).await;
        assert!(matches!(result, Err(StowageError::InvalidRange(_))));
    }

    #[tokio::test]
    async fn test_body_length_mismatch() {
        let fx = Fixture::new(1000).await;
        let request =
            UploadRequest::new("data.bin", vec![0; 5]).with_content_range("bytes 0-9/20");

        let result = fx.service().upload_chunk(1, request).await;
        assert!(matches!(result, Err(StowageError::InvalidRange(_))));
    }

    #[tokio::test]
    async fn test_quota_exceeded_leaves_nothing_behind() {
        let fx = Fixture::new(10).await;
        let request =
            UploadRequest::new("big.bin", vec![0; 5]).with_content_range("bytes 0-4/20");

        let result = fx.service().upload_chunk(1, request).await;
        assert!(matches!(
            result,
            Err(StowageError::QuotaExceeded {
                required: 20,
                available: 10
            })
        ));

        let repo = ItemRepository::new(fx.db.pool());
        assert!(repo.find_by_path(1, "/big.bin").await.unwrap().is_none());
        assert_eq!(fx.used().await, 0);
        assert_eq!(fx.storage.cleanup_empty_dirs().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_restart_replaces_content_and_quota() {
        let fx = Fixture::new(100).await;
        let service = fx.service();

        let first = service
            .upload_chunk(1, UploadRequest::new("a.txt", vec![1; 60]))
            .await
            .unwrap();
        let old_blob = first.as_file().unwrap().stored_name.clone();

        // A second upload of 60 bytes only fits if the first is released.
        let second = service
            .upload_chunk(1, UploadRequest::new("a.txt", vec![2; 60]))
            .await
            .unwrap();

        assert_eq!(second.id, first.id);
        assert_eq!(fx.used().await, 60);
        assert!(!fx.storage.exists(&old_blob).await);
        let file = second.as_file().unwrap();
        assert_eq!(fx.storage.read(&file.stored_name).await.unwrap(), vec![2; 60]);
    }

    #[tokio::test]
    async fn test_upload_into_folder() {
        let fx = Fixture::new(100).await;
        let folder = ItemTree::new(fx.db.pool())
            .create_folder(1, None, "docs")
            .await
            .unwrap();

        let item = fx
            .service()
            .upload_chunk(
                1,
                UploadRequest::new("a.txt", b"x".to_vec()).with_parent(Some(folder.id)),
            )
            .await
            .unwrap();

        assert_eq!(item.path, "/docs/a.txt");
        assert_eq!(item.parent_id, Some(folder.id));
    }

    #[tokio::test]
    async fn test_upload_over_folder_rejected() {
        let fx = Fixture::new(100).await;
        ItemTree::new(fx.db.pool())
            .create_folder(1, None, "docs")
            .await
            .unwrap();

        let result = fx
            .service()
            .upload_chunk(1, UploadRequest::new("docs", b"x".to_vec()))
            .await;
        assert!(matches!(result, Err(StowageError::Validation(_))));
    }

    #[tokio::test]
    async fn test_chunk_size_limit() {
        let fx = Fixture::new(100).await;
        let service = fx.service().with_max_chunk_size(4);

        let result = service
            .upload_chunk(1, UploadRequest::new("a.bin", vec![0; 5]))
            .await;
        assert!(matches!(result, Err(StowageError::Validation(_))));
    }

    #[tokio::test]
    async fn test_invalid_filename() {
        let fx = Fixture::new(100).await;
        let result = fx
            .service()
            .upload_chunk(1, UploadRequest::new("a/b", b"x".to_vec()))
            .await;
        assert!(matches!(result, Err(StowageError::InvalidName(_))));
    }

    #[test]
    fn test_resolved_mime_type() {
        let request = UploadRequest::new("photo.png", vec![]);
        assert_eq!(request.resolved_mime_type(), "image/png");

        let request = UploadRequest::new("photo.png", vec![])
            .with_mime_type("application/octet-stream");
        assert_eq!(request.resolved_mime_type(), "image/png");

        let request = UploadRequest::new("notes", vec![]).with_mime_type("text/markdown");
        assert_eq!(request.resolved_mime_type(), "text/markdown");

        let request = UploadRequest::new("noext", vec![]);
        assert_eq!(request.resolved_mime_type(), "application/octet-stream");
    }
}
