//! Chunked, resumable uploads.

mod locks;
mod range;
mod reaper;
mod session;

pub use locks::{UploadGuard, UploadLocks};
pub use range::{contiguous_prefix, ContentRange};
pub use reaper::{spawn_reaper, UploadReaper};
pub use session::{UploadRequest, UploadService, DEFAULT_MAX_CHUNK_SIZE};
