//! Ownership-checked operations on an owner's item tree.

use tracing::{debug, info, warn};
use url::Url;

use super::repository::ItemRepository;
use super::types::{Item, ItemKind, ItemUpdate, NewItem};
use super::{compose_path, is_within, parent_path_of, MAX_TREE_DEPTH};
use crate::account::QuotaAllocator;
use crate::db::DbPool;
use crate::storage::BlobStore;
use crate::{Result, StowageError};

/// Outcome of removing an item and its descendants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Removal {
    /// Items deleted, the root included.
    pub items: usize,
    /// Bytes returned to the owner's accounts.
    pub released_bytes: u64,
}

/// Tree service for one database.
pub struct ItemTree<'a> {
    pool: &'a DbPool,
    repo: ItemRepository<'a>,
}

impl<'a> ItemTree<'a> {
    pub fn new(pool: &'a DbPool) -> Self {
        Self {
            pool,
            repo: ItemRepository::new(pool),
        }
    }

    /// Get an item the caller owns.
    pub async fn get_owned(&self, owner_id: i64, id: i64) -> Result<Item> {
        let item = self
            .repo
            .get_by_id(id)
            .await?
            .ok_or_else(|| StowageError::NotFound(format!("item {id}")))?;

        if item.owner_id != owner_id {
            return Err(StowageError::Unauthorized(format!(
                "item {id} belongs to another owner"
            )));
        }
        Ok(item)
    }

    /// Get a folder the caller owns.
    pub async fn folder_owned(&self, owner_id: i64, id: i64) -> Result<Item> {
        let item = self.get_owned(owner_id, id).await?;
        if !item.is_folder() {
            return Err(StowageError::Validation(format!("item {id} is not a folder")));
        }
        Ok(item)
    }

    /// Resolve an optional parent folder ID.
    pub async fn parent_folder(&self, owner_id: i64, parent_id: Option<i64>) -> Result<Option<Item>> {
        match parent_id {
            Some(id) => Ok(Some(self.folder_owned(owner_id, id).await?)),
            None => Ok(None),
        }
    }

    /// Resolve an owner's item by full path.
    pub async fn resolve(&self, owner_id: i64, path: &str) -> Result<Item> {
        self.repo
            .find_by_path(owner_id, path)
            .await?
            .ok_or_else(|| StowageError::NotFound(path.to_string()))
    }

    /// Direct children of a folder, or root-level items for `None`.
    pub async fn children_of(&self, owner_id: i64, folder_id: Option<i64>) -> Result<Vec<Item>> {
        let folder = self.parent_folder(owner_id, folder_id).await?;
        self.repo
            .list_children(owner_id, folder.map(|f| f.id))
            .await
    }

    /// Find the child called `name` under `parent`.
    pub async fn find_child(
        &self,
        owner_id: i64,
        parent: Option<&Item>,
        name: &str,
    ) -> Result<Option<Item>> {
        let path = compose_path(parent.map(|p| p.path.as_str()), name)?;
        self.repo.find_by_path(owner_id, &path).await
    }

    /// Ancestors of an item, root first.
    pub async fn ancestors_of(&self, item: &Item) -> Result<Vec<Item>> {
        let mut ancestors = Vec::new();
        let mut current = item.parent_id;

        while let Some(id) = current {
            if ancestors.len() >= MAX_TREE_DEPTH {
                return Err(StowageError::Validation(format!(
                    "item {} is nested deeper than {MAX_TREE_DEPTH} levels",
                    item.id
                )));
            }
            let parent = self
                .repo
                .get_by_id(id)
                .await?
                .ok_or_else(|| StowageError::NotFound(format!("parent item {id}")))?;
            current = parent.parent_id;
            ancestors.push(parent);
        }

        ancestors.reverse();
        Ok(ancestors)
    }

    /// Create a folder under `parent_id` (root when `None`).
    pub async fn create_folder(
        &self,
        owner_id: i64,
        parent_id: Option<i64>,
        name: &str,
    ) -> Result<Item> {
        let parent = self.parent_folder(owner_id, parent_id).await?;
        self.create_folder_under(owner_id, parent.as_ref(), name).await
    }

    /// Create a folder under an already resolved parent.
    ///
    /// Fails with `Validation` if the parent was moved or renamed after it
    /// was read.
    pub async fn create_folder_under(
        &self,
        owner_id: i64,
        parent: Option<&Item>,
        name: &str,
    ) -> Result<Item> {
        let path = compose_path(parent.map(|p| p.path.as_str()), name)?;
        let new_item = NewItem::folder(owner_id, name, &path).with_parent(parent.map(|p| p.id));

        let mut tx = self.pool.begin().await?;
        lock_parent(&mut tx, parent).await?;
        let id = ItemRepository::insert_in(&mut tx, &new_item).await?;
        tx.commit().await?;

        info!(owner_id, item_id = id, path = %path, "Created folder");
        self.get_owned(owner_id, id).await
    }

    /// Rename, move, or change the content URLs of an item.
    ///
    /// Moving or renaming rewrites the paths of every descendant in the
    /// same transaction.
    pub async fn update(&self, owner_id: i64, id: i64, update: &ItemUpdate) -> Result<Item> {
        let item = self.get_owned(owner_id, id).await?;
        if update.is_empty() {
            return Ok(item);
        }

        if update.touches_urls() {
            if item.is_folder() {
                return Err(StowageError::Validation(
                    "folders have no content URLs".to_string(),
                ));
            }
            for url in [&update.download_url, &update.thumbnail_url]
                .into_iter()
                .flatten()
                .flatten()
            {
                validate_external_url(url)?;
            }
        }

        let mut new_path = item.path.clone();
        let mut target = None;
        if update.moves() {
            let name = update.name.as_deref().unwrap_or(&item.name);
            let parent_path = match update.parent_id {
                Some(Some(parent_id)) => {
                    let parent = self.folder_owned(owner_id, parent_id).await?;
                    if is_within(&parent.path, &item.path) {
                        return Err(StowageError::Validation(format!(
                            "cannot move {} into itself",
                            item.path
                        )));
                    }
                    let path = parent.path.clone();
                    target = Some(parent);
                    Some(path)
                }
                Some(None) => None,
                None => parent_path_of(&item.path).map(str::to_string),
            };
            new_path = compose_path(parent_path.as_deref(), name)?;
        }

        let mut tx = self.pool.begin().await?;
        let current = lock_item(&mut tx, id).await?;
        if current.path != item.path {
            return Err(StowageError::Validation(format!(
                "item {id} was moved concurrently"
            )));
        }
        lock_parent(&mut tx, target.as_ref()).await?;
        if new_path != item.path {
            let moved = ItemRepository::rewrite_paths_in(&mut tx, owner_id, &item.path, &new_path).await?;
            debug!(item_id = id, moved, "Rewrote paths");
        }
        ItemRepository::apply_update_in(&mut tx, id, update).await?;
        tx.commit().await?;

        info!(owner_id, item_id = id, from = %item.path, to = %new_path, "Updated item");
        self.get_owned(owner_id, id).await
    }

    /// Delete an item and all its descendants.
    ///
    /// Quota is released in the same transaction as the delete; blobs are
    /// removed after it commits.
    pub async fn remove(&self, owner_id: i64, id: i64, storage: &dyn BlobStore) -> Result<Removal> {
        self.get_owned(owner_id, id).await?;

        let mut tx = self.pool.begin().await?;
        let item = lock_item(&mut tx, id).await?;

        let subtree = ItemRepository::list_subtree_in(&mut tx, owner_id, &item.path).await?;
        let mut released_bytes = 0;
        let mut blobs = Vec::new();
        for entry in &subtree {
            if let ItemKind::File(content) = &entry.kind {
                released_bytes += QuotaAllocator::release_in(&mut tx, entry.id).await?;
                blobs.push(content.stored_name.clone());
            }
        }
        ItemRepository::delete_in(&mut tx, item.id).await?;
        tx.commit().await?;

        for blob in &blobs {
            if let Err(e) = storage.delete(blob).await {
                warn!(blob = %blob, "Failed to delete blob: {}", e);
            }
        }

        info!(
            owner_id,
            item_id = id,
            path = %item.path,
            items = subtree.len(),
            released_bytes,
            "Removed item"
        );
        Ok(Removal {
            items: subtree.len(),
            released_bytes,
        })
    }
}

/// Take the write lock and re-read the item inside a transaction.
async fn lock_item(conn: &mut sqlx::SqliteConnection, id: i64) -> Result<Item> {
    if !ItemRepository::touch_in(conn, id).await? {
        return Err(StowageError::NotFound(format!("item {id}")));
    }
    ItemRepository::get_by_id_in(conn, id)
        .await?
        .ok_or_else(|| StowageError::NotFound(format!("item {id}")))
}

/// Take the write lock on `parent` and check it still sits at the path it
/// was read with.
///
/// Child paths are composed from a parent read before the transaction; if
/// the parent moved in between, that path is stale.
pub(crate) async fn lock_parent(
    conn: &mut sqlx::SqliteConnection,
    parent: Option<&Item>,
) -> Result<()> {
    let Some(parent) = parent else {
        return Ok(());
    };

    let current = lock_item(conn, parent.id).await?;
    if current.path != parent.path || !current.is_folder() {
        return Err(StowageError::Validation(format!(
            "folder {} was moved or renamed concurrently",
            parent.path
        )));
    }
    Ok(())
}

/// Accept only absolute http(s) URLs.
pub(crate) fn validate_external_url(raw: &str) -> Result<()> {
    let url = Url::parse(raw)
        .map_err(|e| StowageError::Validation(format!("invalid URL '{raw}': {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(StowageError::Validation(format!(
            "unsupported URL scheme '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AccountRepository;
    use crate::item::FileContent;
    use crate::storage::FileStorage;
    use crate::Database;
    use tempfile::TempDir;

    async fn setup_db() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    async fn insert_file(db: &Database, owner_id: i64, parent: &Item, name: &str, size: u64) -> i64 {
        let mut tx = db.pool().begin().await.unwrap();
        let grants = QuotaAllocator::allocate_in(&mut tx, owner_id, size).await.unwrap();
        let item = NewItem::file(
            owner_id,
            name,
            format!("{}/{}", parent.path, name),
            FileContent {
                mime_type: None,
                file_size: size,
                uploaded_size: size,
                stored_name: format!("{name}.bin"),
                download_url: None,
                thumbnail_url: None,
            },
        )
        .with_parent(Some(parent.id));
        let id = ItemRepository::insert_in(&mut tx, &item).await.unwrap();
        QuotaAllocator::attach_in(&mut tx, id, &grants).await.unwrap();
        tx.commit().await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_create_nested_folders() {
        let db = setup_db().await;
        let tree = ItemTree::new(db.pool());

        let docs = tree.create_folder(1, None, "docs").await.unwrap();
        let year = tree.create_folder(1, Some(docs.id), "2024").await.unwrap();

        assert_eq!(docs.path, "/docs");
        assert_eq!(year.path, "/docs/2024");
        assert_eq!(year.parent_id, Some(docs.id));

        let ancestors = tree.ancestors_of(&year).await.unwrap();
        assert_eq!(ancestors.len(), 1);
        assert_eq!(ancestors[0].id, docs.id);

        assert_eq!(tree.resolve(1, "/docs/2024").await.unwrap().id, year.id);
    }

    #[tokio::test]
    async fn test_create_folder_conflict_and_bad_name() {
        let db = setup_db().await;
        let tree = ItemTree::new(db.pool());

        tree.create_folder(1, None, "docs").await.unwrap();
        let result = tree.create_folder(1, None, "docs").await;
        assert!(matches!(result, Err(StowageError::Validation(_))));

        let result = tree.create_folder(1, None, "a/b").await;
        assert!(matches!(result, Err(StowageError::InvalidName(_))));
    }

    #[tokio::test]
    async fn test_cross_owner_access() {
        let db = setup_db().await;
        let tree = ItemTree::new(db.pool());

        let docs = tree.create_folder(1, None, "docs").await.unwrap();

        let result = tree.get_owned(2, docs.id).await;
        assert!(matches!(result, Err(StowageError::Unauthorized(_))));

        let result = tree.create_folder(2, Some(docs.id), "mine").await;
        assert!(matches!(result, Err(StowageError::Unauthorized(_))));

        let result = tree.get_owned(1, 999).await;
        assert!(matches!(result, Err(StowageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_create_under_moved_parent_rejected() {
        let db = setup_db().await;
        let tree = ItemTree::new(db.pool());

        let a = tree.create_folder(1, None, "a").await.unwrap();
        tree.update(1, a.id, &ItemUpdate::new().name("b")).await.unwrap();

        // `a` still carries the path it had before the rename.
        let result = tree.create_folder_under(1, Some(&a), "child").await;
        assert!(matches!(result, Err(StowageError::Validation(_))));
        assert!(tree.resolve(1, "/a/child").await.is_err());
        assert!(tree.children_of(1, Some(a.id)).await.unwrap().is_empty());

        let fresh = tree.get_owned(1, a.id).await.unwrap();
        let child = tree.create_folder_under(1, Some(&fresh), "child").await.unwrap();
        assert_eq!(child.path, "/b/child");
    }

    #[tokio::test]
    async fn test_move_into_moved_target_rejected() {
        let db = setup_db().await;
        let tree = ItemTree::new(db.pool());

        let item = tree.create_folder(1, None, "item").await.unwrap();
        let target = tree.create_folder(1, None, "target").await.unwrap();
        let stale = target.clone();
        tree.update(1, target.id, &ItemUpdate::new().name("renamed")).await.unwrap();

        let mut tx = db.pool().begin().await.unwrap();
        let result = lock_parent(&mut tx, Some(&stale)).await;
        assert!(matches!(result, Err(StowageError::Validation(_))));
        drop(tx);

        let moved = tree
            .update(1, item.id, &ItemUpdate::new().parent_id(Some(target.id)))
            .await
            .unwrap();
        assert_eq!(moved.path, "/renamed/item");
    }

    #[tokio::test]
    async fn test_find_child() {
        let db = setup_db().await;
        let tree = ItemTree::new(db.pool());

        let docs = tree.create_folder(1, None, "docs").await.unwrap();
        tree.create_folder(1, Some(docs.id), "inner").await.unwrap();

        assert!(tree.find_child(1, Some(&docs), "inner").await.unwrap().is_some());
        assert!(tree.find_child(1, None, "inner").await.unwrap().is_none());
        assert!(tree.find_child(1, None, "docs").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_move_rewrites_descendant_paths() {
        let db = setup_db().await;
        let tree = ItemTree::new(db.pool());

        let a = tree.create_folder(1, None, "a").await.unwrap();
        let b = tree.create_folder(1, Some(a.id), "b").await.unwrap();
        let c = tree.create_folder(1, Some(b.id), "c").await.unwrap();
        let target = tree.create_folder(1, None, "target").await.unwrap();

        let moved = tree
            .update(1, b.id, &ItemUpdate::new().parent_id(Some(target.id)))
            .await
            .unwrap();

        assert_eq!(moved.path, "/target/b");
        assert_eq!(moved.parent_id, Some(target.id));
        assert_eq!(tree.get_owned(1, c.id).await.unwrap().path, "/target/b/c");
        assert!(tree.children_of(1, Some(a.id)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rename_and_move_to_root() {
        let db = setup_db().await;
        let tree = ItemTree::new(db.pool());

        let a = tree.create_folder(1, None, "a").await.unwrap();
        let b = tree.create_folder(1, Some(a.id), "b").await.unwrap();

        let renamed = tree.update(1, b.id, &ItemUpdate::new().name("renamed")).await.unwrap();
        assert_eq!(renamed.path, "/a/renamed");
        assert_eq!(renamed.name, "renamed");

        let rooted = tree.update(1, b.id, &ItemUpdate::new().parent_id(None)).await.unwrap();
        assert_eq!(rooted.path, "/renamed");
        assert_eq!(rooted.parent_id, None);
    }

    #[tokio::test]
    async fn test_move_into_own_descendant_rejected() {
        let db = setup_db().await;
        let tree = ItemTree::new(db.pool());

        let a = tree.create_folder(1, None, "a").await.unwrap();
        let b = tree.create_folder(1, Some(a.id), "b").await.unwrap();

        for target in [a.id, b.id] {
            let result = tree
                .update(1, a.id, &ItemUpdate::new().parent_id(Some(target)))
                .await;
            assert!(matches!(result, Err(StowageError::Validation(_))));
        }
        assert_eq!(tree.get_owned(1, b.id).await.unwrap().path, "/a/b");
    }

    #[tokio::test]
    async fn test_rename_conflict_leaves_tree_unchanged() {
        let db = setup_db().await;
        let tree = ItemTree::new(db.pool());

        let a = tree.create_folder(1, None, "a").await.unwrap();
        tree.create_folder(1, Some(a.id), "child").await.unwrap();
        tree.create_folder(1, None, "b").await.unwrap();

        let result = tree.update(1, a.id, &ItemUpdate::new().name("b")).await;
        assert!(matches!(result, Err(StowageError::Validation(_))));
        assert!(tree.resolve(1, "/a/child").await.is_ok());
    }

    #[tokio::test]
    async fn test_urls_rejected_on_folders_and_bad_schemes() {
        let db = setup_db().await;
        let tree = ItemTree::new(db.pool());
        let folder = tree.create_folder(1, None, "a").await.unwrap();

        let update = ItemUpdate::new().download_url(Some("https://cdn.example.com/x"));
        let result = tree.update(1, folder.id, &update).await;
        assert!(matches!(result, Err(StowageError::Validation(_))));

        assert!(validate_external_url("https://cdn.example.com/{size}.png").is_ok());
        assert!(validate_external_url("ftp://example.com/x").is_err());
        assert!(validate_external_url("not a url").is_err());
    }

    #[tokio::test]
    async fn test_remove_subtree_releases_quota() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::new(temp_dir.path()).unwrap();
        let db = setup_db().await;
        let accounts = AccountRepository::new(db.pool());
        let account = accounts.create(1, "main", 1000).await.unwrap();

        let tree = ItemTree::new(db.pool());
        let a = tree.create_folder(1, None, "a").await.unwrap();
        let b = tree.create_folder(1, Some(a.id), "b").await.unwrap();
        insert_file(&db, 1, &a, "one", 100).await;
        let nested = insert_file(&db, 1, &b, "two", 50).await;
        storage.write_at("one.bin", 0, b"x").await.unwrap();

        assert_eq!(accounts.get_by_id(account.id).await.unwrap().unwrap().used_bytes, 150);

        let removal = tree.remove(1, a.id, &storage).await.unwrap();
        assert_eq!(removal.items, 4);
        assert_eq!(removal.released_bytes, 150);

        assert_eq!(accounts.get_by_id(account.id).await.unwrap().unwrap().used_bytes, 0);
        assert!(tree.get_owned(1, nested).await.is_err());
        assert!(!storage.exists("one.bin").await);
    }

    #[tokio::test]
    async fn test_remove_other_owner_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::new(temp_dir.path()).unwrap();
        let db = setup_db().await;
        let tree = ItemTree::new(db.pool());
        let a = tree.create_folder(1, None, "a").await.unwrap();

        let result = tree.remove(2, a.id, &storage).await;
        assert!(matches!(result, Err(StowageError::Unauthorized(_))));
        assert!(tree.get_owned(1, a.id).await.is_ok());
    }
}
