//! Removal of abandoned uploads.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::locks::UploadLocks;
use crate::datetime;
use crate::db::Database;
use crate::item::{Item, ItemRepository, ItemTree};
use crate::storage::BlobStore;
use crate::{Result, StowageError};

/// Number of stale uploads fetched per query; a sweep pages through all of them.
const SWEEP_BATCH: i64 = 100;

/// Deletes incomplete uploads that stopped receiving chunks.
pub struct UploadReaper<'a> {
    db: &'a Database,
    storage: &'a dyn BlobStore,
    locks: &'a UploadLocks,
    idle_timeout: Duration,
}

impl<'a> UploadReaper<'a> {
    pub fn new(
        db: &'a Database,
        storage: &'a dyn BlobStore,
        locks: &'a UploadLocks,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            db,
            storage,
            locks,
            idle_timeout,
        }
    }

    /// Remove incomplete uploads idle for longer than the timeout.
    ///
    /// Uploads whose path lock is held are skipped. Returns how many were
    /// removed.
    pub async fn sweep(&self) -> Result<usize> {
        let idle = chrono::Duration::from_std(self.idle_timeout)
            .map_err(|e| StowageError::Config(format!("idle timeout out of range: {e}")))?;
        let Some(cutoff) = Utc::now().checked_sub_signed(idle) else {
            return Ok(0);
        };
        let cutoff = datetime::to_storage(&cutoff);

        let repo = ItemRepository::new(self.db.pool());
        let mut removed = 0;
        let mut after_id = 0;

        loop {
            let batch = repo
                .list_stale_uploads(&cutoff, after_id, SWEEP_BATCH)
                .await?;
            let Some(last) = batch.last() else {
                break;
            };
            after_id = last.id;
            let full = batch.len() as i64 == SWEEP_BATCH;

            for item in batch {
                if self.reap(&repo, item, &cutoff).await? {
                    removed += 1;
                }
            }

            if !full {
                break;
            }
        }

        Ok(removed)
    }

    /// Remove one stale upload unless it is busy or was resumed meanwhile.
    async fn reap(&self, repo: &ItemRepository<'_>, item: Item, cutoff: &str) -> Result<bool> {
        let Some(_guard) = self.locks.try_acquire(item.owner_id, &item.path) else {
            debug!(item_id = item.id, path = %item.path, "Upload busy, skipping");
            return Ok(false);
        };

        // A chunk may have landed between the listing and the lock.
        let still_stale = match repo.get_by_id(item.id).await? {
            Some(current) => {
                current.path == item.path
                    && current.as_file().is_some_and(|f| !f.is_complete())
                    && current.updated_at.as_str() < cutoff
            }
            None => false,
        };
        if !still_stale {
            return Ok(false);
        }

        let tree = ItemTree::new(self.db.pool());
        match tree.remove(item.owner_id, item.id, self.storage).await {
            Ok(_) => {
                info!(
                    owner_id = item.owner_id,
                    item_id = item.id,
                    path = %item.path,
                    "Reaped abandoned upload"
                );
                Ok(true)
            }
            Err(StowageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Run [`UploadReaper::sweep`] every `interval` until the task is aborted.
pub fn spawn_reaper(
    db: Arc<Database>,
    storage: Arc<dyn BlobStore>,
    locks: Arc<UploadLocks>,
    idle_timeout: Duration,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let reaper = UploadReaper::new(&db, storage.as_ref(), &locks, idle_timeout);
            match reaper.sweep().await {
                Ok(0) => debug!("No abandoned uploads"),
                Ok(n) => info!("Reaped {} abandoned upload(s)", n),
                Err(e) => warn!("Upload sweep failed: {}", e),
            }
        }
    })
}
