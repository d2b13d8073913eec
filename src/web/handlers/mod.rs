//! API handlers.

pub mod folders;
pub mod items;

pub use folders::*;
pub use items::*;

use std::sync::Arc;

use crate::delivery::{PassthroughThumbnailer, ThumbnailGenerator};
use crate::storage::BlobStore;
use crate::upload::{UploadLocks, DEFAULT_MAX_CHUNK_SIZE};
use crate::Database;

/// Shared application state.
pub struct AppState {
    /// Database connection pool.
    pub db: Arc<Database>,
    /// Blob storage backend.
    pub storage: Arc<dyn BlobStore>,
    /// Per-path upload locks, shared with the reaper.
    pub locks: Arc<UploadLocks>,
    /// Local thumbnail generator.
    pub thumbnailer: Arc<dyn ThumbnailGenerator>,
    /// Maximum chunk size in bytes.
    pub max_chunk_size: u64,
}

impl AppState {
    /// Create a new application state.
    pub fn new(db: Arc<Database>, storage: Arc<dyn BlobStore>) -> Self {
        Self {
            db,
            storage,
            locks: Arc::new(UploadLocks::new()),
            thumbnailer: Arc::new(PassthroughThumbnailer),
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
        }
    }

    /// Share an existing lock table.
    pub fn with_locks(mut self, locks: Arc<UploadLocks>) -> Self {
        self.locks = locks;
        self
    }

    /// Use a different thumbnail generator.
    pub fn with_thumbnailer(mut self, thumbnailer: Arc<dyn ThumbnailGenerator>) -> Self {
        self.thumbnailer = thumbnailer;
        self
    }

    /// Set the maximum chunk size.
    pub fn with_max_chunk_size(mut self, max_chunk_size: u64) -> Self {
        self.max_chunk_size = max_chunk_size;
        self
    }
}
