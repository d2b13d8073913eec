//! Response DTOs for Web API.

use serde::Serialize;

use crate::datetime::to_rfc3339;
use crate::delivery::SizeInfo;
use crate::item::{Item, ItemKind};
use crate::probe::ProbeResult;

/// Generic API response wrapper.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    /// Response data.
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    /// Create a new API response.
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

/// Item summary.
///
/// File-only fields are omitted for folders.
#[derive(Debug, Serialize)]
pub struct ItemResponse {
    pub id: i64,
    pub parent_item_id: Option<i64>,
    /// `folder` or `file`.
    pub kind: &'static str,
    pub name: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploaded_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complete: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&Item> for ItemResponse {
    fn from(item: &Item) -> Self {
        let mut response = Self {
            id: item.id,
            parent_item_id: item.parent_id,
            kind: item.kind_str(),
            name: item.name.clone(),
            path: item.path.clone(),
            mime_type: None,
            file_size: None,
            uploaded_size: None,
            complete: None,
            download_url: None,
            thumbnail_url: None,
            created_at: to_rfc3339(&item.created_at),
            updated_at: to_rfc3339(&item.updated_at),
        };
        if let ItemKind::File(content) = &item.kind {
            response.mime_type = content.mime_type.clone();
            response.file_size = Some(content.file_size);
            response.uploaded_size = Some(content.uploaded_size);
            response.complete = Some(content.is_complete());
            response.download_url = content.download_url.clone();
            response.thumbnail_url = content.thumbnail_url.clone();
        }
        response
    }
}

/// One step of a folder's ancestor chain.
#[derive(Debug, Serialize)]
pub struct BreadcrumbEntry {
    pub id: i64,
    pub name: String,
    pub path: String,
}

impl From<&Item> for BreadcrumbEntry {
    fn from(item: &Item) -> Self {
        Self {
            id: item.id,
            name: item.name.clone(),
            path: item.path.clone(),
        }
    }
}

/// Folder with its breadcrumb and direct children.
#[derive(Debug, Serialize)]
pub struct FolderResponse {
    pub item: ItemResponse,
    /// Ancestors from the root down to the immediate parent.
    pub breadcrumb: Vec<BreadcrumbEntry>,
    pub children: Vec<ItemResponse>,
}

/// Result of an existence probe.
#[derive(Debug, Serialize)]
pub struct ProbeResponse {
    pub found: bool,
    /// Bytes already received; resume from here.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
}

impl From<ProbeResult> for ProbeResponse {
    fn from(result: ProbeResult) -> Self {
        match result {
            ProbeResult::NotFound => Self {
                found: false,
                size: None,
                file_size: None,
            },
            ProbeResult::Found {
                uploaded_size,
                file_size,
            } => Self {
                found: true,
                size: Some(uploaded_size),
                file_size: Some(file_size),
            },
        }
    }
}

/// Size-only item metadata.
#[derive(Debug, Serialize)]
pub struct SizeResponse {
    pub file_size: u64,
    pub uploaded_size: u64,
    pub complete: bool,
}

impl From<SizeInfo> for SizeResponse {
    fn from(info: SizeInfo) -> Self {
        Self {
            file_size: info.file_size,
            uploaded_size: info.uploaded_size,
            complete: info.is_complete(),
        }
    }
}
