//! Content delivery: local bytes or a redirect to external hosting.

mod thumbnail;

pub use thumbnail::{
    PassthroughThumbnailer, Thumbnail, ThumbnailGenerator, ThumbnailSize, MAX_THUMBNAIL_SIZE,
};

use std::fmt;
use std::io::Cursor;

use url::Url;

use crate::item::{FileContent, Item, ItemKind};
use crate::storage::{BlobReader, BlobStore};
use crate::{Result, StowageError};

/// Placeholder replaced by the pixel size in external thumbnail URLs.
pub const SIZE_PLACEHOLDER: &str = "{size}";

/// Largest local file a thumbnail is rendered from (32MB).
pub const MAX_THUMBNAIL_SOURCE_SIZE: u64 = 32 * 1024 * 1024;

/// How a content request is answered.
#[derive(Debug)]
pub enum Delivery {
    /// Stream these bytes directly.
    Local(LocalContent),
    /// Redirect the client to an external URL.
    Redirect(String),
}

/// Content served from local storage.
pub struct LocalContent {
    pub filename: String,
    pub mime_type: String,
    /// Exact number of bytes `reader` yields.
    pub length: u64,
    pub reader: BlobReader,
}

impl fmt::Debug for LocalContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalContent")
            .field("filename", &self.filename)
            .field("mime_type", &self.mime_type)
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

/// Declared and received sizes, answered without reading content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeInfo {
    pub file_size: u64,
    pub uploaded_size: u64,
}

impl SizeInfo {
    pub fn is_complete(&self) -> bool {
        self.uploaded_size == self.file_size
    }
}

/// Decides how download and thumbnail requests are served.
pub struct ContentDeliveryResolver<'a> {
    storage: &'a dyn BlobStore,
    thumbnailer: &'a dyn ThumbnailGenerator,
}

impl<'a> ContentDeliveryResolver<'a> {
    pub fn new(storage: &'a dyn BlobStore, thumbnailer: &'a dyn ThumbnailGenerator) -> Self {
        Self {
            storage,
            thumbnailer,
        }
    }

    /// Resolve a full-content download.
    ///
    /// An external download URL wins; otherwise the local blob is opened
    /// for streaming, which requires the upload to be complete.
    pub async fn resolve_download(&self, item: &Item) -> Result<Delivery> {
        let content = file_content(item)?;
        if let Some(url) = &content.download_url {
            return Ok(Delivery::Redirect(url.clone()));
        }

        ensure_complete(content)?;
        let reader = self.storage.open(&content.stored_name).await?;
        Ok(Delivery::Local(LocalContent {
            filename: item.name.clone(),
            mime_type: mime_type_of(item, content),
            length: content.file_size,
            reader,
        }))
    }

    /// Resolve a thumbnail at the requested size.
    ///
    /// Local thumbnails are rendered in memory, so their source is capped
    /// at [`MAX_THUMBNAIL_SOURCE_SIZE`].
    pub async fn resolve_thumbnail(&self, item: &Item, size: ThumbnailSize) -> Result<Delivery> {
        let content = file_content(item)?;
        if let Some(template) = &content.thumbnail_url {
            return Ok(Delivery::Redirect(sized_thumbnail_url(template, size)?));
        }

        ensure_complete(content)?;
        if content.file_size > MAX_THUMBNAIL_SOURCE_SIZE {
            return Err(StowageError::Validation(format!(
                "{} is too large to thumbnail",
                item.path
            )));
        }
        let source = self.storage.read(&content.stored_name).await?;
        let thumbnail = self
            .thumbnailer
            .generate(&source, &mime_type_of(item, content), size)?;
        Ok(Delivery::Local(LocalContent {
            filename: item.name.clone(),
            mime_type: thumbnail.mime_type,
            length: thumbnail.bytes.len() as u64,
            reader: Box::new(Cursor::new(thumbnail.bytes)),
        }))
    }

    /// Sizes of an item without touching its content. Folders report zero.
    pub fn size_info(&self, item: &Item) -> SizeInfo {
        SizeInfo {
            file_size: item.file_size(),
            uploaded_size: item.uploaded_size(),
        }
    }
}

fn file_content(item: &Item) -> Result<&FileContent> {
    match &item.kind {
        ItemKind::File(content) => Ok(content),
        ItemKind::Folder => Err(StowageError::Validation(format!(
            "{} is a folder and has no content",
            item.path
        ))),
    }
}

fn ensure_complete(content: &FileContent) -> Result<()> {
    if !content.is_complete() {
        return Err(StowageError::IncompleteUpload {
            uploaded: content.uploaded_size,
            total: content.file_size,
        });
    }
    Ok(())
}

fn mime_type_of(item: &Item, content: &FileContent) -> String {
    content.mime_type.clone().unwrap_or_else(|| {
        mime_guess::from_path(&item.name)
            .first_or_octet_stream()
            .to_string()
    })
}

/// Build the external thumbnail URL for `size`.
pub fn sized_thumbnail_url(template: &str, size: ThumbnailSize) -> Result<String> {
    if template.contains(SIZE_PLACEHOLDER) {
        return Ok(template.replace(SIZE_PLACEHOLDER, &size.to_string()));
    }

    let mut url = Url::parse(template)
        .map_err(|e| StowageError::Validation(format!("invalid thumbnail URL '{template}': {e}")))?;
    url.query_pairs_mut().append_pair("s", &size.to_string());
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FileStorage;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    async fn drain(mut local: LocalContent) -> Vec<u8> {
        let mut buf = Vec::new();
        local.reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf.len() as u64, local.length);
        buf
    }

    fn redirect_target(delivery: Delivery) -> String {
        match delivery {
            Delivery::Redirect(url) => url,
            other => panic!("expected redirect, got {other:?}"),
        }
    }

    fn file_item(name: &str, content: FileContent) -> Item {
        Item {
            id: 1,
            owner_id: 1,
            parent_id: None,
            name: name.to_string(),
            path: format!("/{name}"),
            kind: ItemKind::File(content),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn content(stored_name: &str, file_size: u64, uploaded_size: u64) -> FileContent {
        FileContent {
            mime_type: None,
            file_size,
            uploaded_size,
            stored_name: stored_name.to_string(),
            download_url: None,
            thumbnail_url: None,
        }
    }

    fn setup() -> (TempDir, FileStorage) {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::new(temp_dir.path()).unwrap();
        (temp_dir, storage)
    }

    #[tokio::test]
    async fn test_local_download() {
        let (_temp_dir, storage) = setup();
        storage.write_at("abc.txt", 0, b"hello").await.unwrap();
        let resolver = ContentDeliveryResolver::new(&storage, &PassthroughThumbnailer);

        let item = file_item("greeting.txt", content("abc.txt", 5, 5));
        match resolver.resolve_download(&item).await.unwrap() {
            Delivery::Local(local) => {
                assert_eq!(local.mime_type, "text/plain");
                assert_eq!(local.filename, "greeting.txt");
                assert_eq!(drain(local).await, b"hello");
            }
            other => panic!("expected local delivery, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_incomplete_download_rejected() {
        let (_temp_dir, storage) = setup();
        let resolver = ContentDeliveryResolver::new(&storage, &PassthroughThumbnailer);

        let item = file_item("a.bin", content("abc.bin", 30, 10));
        let result = resolver.resolve_download(&item).await;
        assert!(matches!(
            result,
            Err(StowageError::IncompleteUpload {
                uploaded: 10,
                total: 30
            })
        ));
    }

    #[tokio::test]
    async fn test_external_download_redirects_even_if_incomplete() {
        let (_temp_dir, storage) = setup();
        let resolver = ContentDeliveryResolver::new(&storage, &PassthroughThumbnailer);

        let mut file = content("abc.bin", 30, 10);
        file.download_url = Some("https://cdn.example.com/a.bin".to_string());
        let item = file_item("a.bin", file);

        assert_eq!(
            redirect_target(resolver.resolve_download(&item).await.unwrap()),
            "https://cdn.example.com/a.bin"
        );
    }

    #[tokio::test]
    async fn test_folder_has_no_content() {
        let (_temp_dir, storage) = setup();
        let resolver = ContentDeliveryResolver::new(&storage, &PassthroughThumbnailer);
        let mut item = file_item("dir", content("x", 0, 0));
        item.kind = ItemKind::Folder;

        assert!(matches!(
            resolver.resolve_download(&item).await,
            Err(StowageError::Validation(_))
        ));
        assert_eq!(
            resolver.size_info(&item),
            SizeInfo {
                file_size: 0,
                uploaded_size: 0
            }
        );
    }

    #[tokio::test]
    async fn test_local_thumbnail() {
        let (_temp_dir, storage) = setup();
        storage.write_at("img.png", 0, b"\x89PNG").await.unwrap();
        let resolver = ContentDeliveryResolver::new(&storage, &PassthroughThumbnailer);

        let item = file_item("photo.png", content("img.png", 4, 4));
        match resolver
            .resolve_thumbnail(&item, ThumbnailSize::SMALL)
            .await
            .unwrap()
        {
            Delivery::Local(local) => {
                assert_eq!(local.mime_type, "image/png");
                assert_eq!(drain(local).await, b"\x89PNG");
            }
            other => panic!("expected local delivery, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_external_thumbnail_sized() {
        let (_temp_dir, storage) = setup();
        let resolver = ContentDeliveryResolver::new(&storage, &PassthroughThumbnailer);

        let mut file = content("img.png", 4, 4);
        file.thumbnail_url = Some("https://cdn.example.com/t/{size}/a.png".to_string());
        let item = file_item("a.png", file);

        let delivery = resolver
            .resolve_thumbnail(&item, ThumbnailSize::LARGE)
            .await
            .unwrap();
        assert_eq!(
            redirect_target(delivery),
            "https://cdn.example.com/t/1024/a.png"
        );
    }

    #[tokio::test]
    async fn test_oversized_thumbnail_source_rejected() {
        let (_temp_dir, storage) = setup();
        let resolver = ContentDeliveryResolver::new(&storage, &PassthroughThumbnailer);
        let size = MAX_THUMBNAIL_SOURCE_SIZE + 1;

        let item = file_item("huge.png", content("huge.png", size, size));
        let result = resolver.resolve_thumbnail(&item, ThumbnailSize::SMALL).await;
        assert!(matches!(result, Err(StowageError::Validation(_))));
    }

    #[test]
    fn test_sized_thumbnail_url_appends_query() {
        assert_eq!(
            sized_thumbnail_url("https://cdn.example.com/a.png", ThumbnailSize::SMALL).unwrap(),
            "https://cdn.example.com/a.png?s=64"
        );
        assert_eq!(
            sized_thumbnail_url("https://cdn.example.com/a.png?v=2", ThumbnailSize::SMALL)
                .unwrap(),
            "https://cdn.example.com/a.png?v=2&s=64"
        );
    }

    #[test]
    fn test_size_info() {
        let (_temp_dir, storage) = setup();
        let resolver = ContentDeliveryResolver::new(&storage, &PassthroughThumbnailer);
        let info = resolver.size_info(&file_item("a", content("a", 30, 10)));
        assert_eq!(info.file_size, 30);
        assert_eq!(info.uploaded_size, 10);
        assert!(!info.is_complete());
    }
}
