//! Blob storage for item content.
//!
//! Items reference their bytes by a stored name; the store decides where
//! those bytes physically live.

mod local;

pub use local::FileStorage;

use std::path::Path;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use uuid::Uuid;

use crate::Result;

/// Streaming handle on a blob's bytes.
pub type BlobReader = Box<dyn AsyncRead + Send + Unpin>;

/// Byte storage used by uploads and downloads.
///
/// Writes are positional so chunks may land in any order.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write `bytes` at `offset`, creating the blob and extending it as needed.
    async fn write_at(&self, stored_name: &str, offset: u64, bytes: &[u8]) -> Result<()>;

    /// Read the whole blob into memory.
    async fn read(&self, stored_name: &str) -> Result<Vec<u8>>;

    /// Open the blob for streaming from its first byte.
    async fn open(&self, stored_name: &str) -> Result<BlobReader>;

    /// Current physical size of the blob.
    async fn size(&self, stored_name: &str) -> Result<u64>;

    /// Delete the blob. Returns `false` if it did not exist.
    async fn delete(&self, stored_name: &str) -> Result<bool>;

    /// Check whether the blob exists.
    async fn exists(&self, stored_name: &str) -> bool;
}

/// Generate a new UUID-based stored name keeping the original extension.
pub fn generate_stored_name(original_name: &str) -> String {
    let uuid = Uuid::new_v4();
    let ext = extract_extension(original_name);
    format!("{uuid}.{ext}")
}

/// Extension of `filename`, or "bin" when it has none.
fn extract_extension(filename: &str) -> &str {
    Path::new(filename)
        .extension()
        .and_then(|s| s.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or("bin")
}
