//! Pre-flight existence checks for resumable uploads.

use crate::db::DbPool;
use crate::item::ItemTree;
use crate::Result;

/// Answer to a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// Nothing at that path: start a fresh upload.
    NotFound,
    /// Something exists: resume from `uploaded_size`.
    Found { uploaded_size: u64, file_size: u64 },
}

impl ProbeResult {
    pub fn is_found(&self) -> bool {
        matches!(self, ProbeResult::Found { .. })
    }
}

/// Read-only lookup of a filename under a parent folder.
pub struct ExistenceProbe<'a> {
    pool: &'a DbPool,
}

impl<'a> ExistenceProbe<'a> {
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Look up `filename` under `parent_id` (root when `None`).
    ///
    /// Folders report zero sizes.
    pub async fn probe(
        &self,
        owner_id: i64,
        parent_id: Option<i64>,
        filename: &str,
    ) -> Result<ProbeResult> {
        let tree = ItemTree::new(self.pool);
        let parent = tree.parent_folder(owner_id, parent_id).await?;

        Ok(match tree.find_child(owner_id, parent.as_ref(), filename).await? {
            Some(item) => ProbeResult::Found {
                uploaded_size: item.uploaded_size(),
                file_size: item.file_size(),
            },
            None => ProbeResult::NotFound,
        })
    }
}
