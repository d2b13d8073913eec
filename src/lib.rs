//! stowage - hierarchical file store with resumable chunked uploads.
//!
//! Files are uploaded in `Content-Range` chunks, organised into a per-owner
//! folder tree, and charged against quota-limited storage accounts.

pub mod account;
pub mod config;
pub mod datetime;
pub mod db;
pub mod delivery;
pub mod error;
pub mod item;
pub mod logging;
pub mod probe;
pub mod storage;
pub mod upload;
pub mod web;

pub use account::{Account, AccountRepository, Grant, QuotaAllocator};
pub use config::Config;
pub use db::Database;
pub use delivery::{ContentDeliveryResolver, Delivery, ThumbnailSize};
pub use error::{Result, StowageError};
pub use item::{Item, ItemKind, ItemTree};
pub use probe::{ExistenceProbe, ProbeResult};
pub use storage::{BlobStore, FileStorage};
pub use upload::{ContentRange, UploadLocks, UploadRequest, UploadService};
