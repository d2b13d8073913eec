//! Request DTOs for Web API.

use serde::{Deserialize, Deserializer};
use validator::Validate;

use super::validation::{no_control_chars, not_empty_trimmed};
use crate::item::ItemUpdate;

/// Distinguish an absent field (`None`) from an explicit `null` (`Some(None)`).
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Folder creation request.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateFolderRequest {
    /// Folder name.
    #[validate(
        length(min = 1, max = 255, message = "Name must be 1-255 characters"),
        custom(function = "not_empty_trimmed"),
        custom(function = "no_control_chars")
    )]
    pub name: String,
    /// Parent folder (root when absent).
    #[serde(default)]
    pub parent_item_id: Option<i64>,
}

/// Item update request.
///
/// Omitted fields are left alone; `null` moves to the root or clears a URL.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateItemRequest {
    /// New name.
    #[validate(
        length(min = 1, max = 255, message = "Name must be 1-255 characters"),
        custom(function = "not_empty_trimmed"),
        custom(function = "no_control_chars")
    )]
    #[serde(default)]
    pub name: Option<String>,
    /// New parent folder.
    #[serde(default, deserialize_with = "double_option")]
    pub parent_item_id: Option<Option<i64>>,
    /// External download URL.
    #[serde(default, deserialize_with = "double_option")]
    pub download_url: Option<Option<String>>,
    /// External thumbnail URL, optionally containing `{size}`.
    #[serde(default, deserialize_with = "double_option")]
    pub thumbnail_url: Option<Option<String>>,
}

impl From<UpdateItemRequest> for ItemUpdate {
    fn from(req: UpdateItemRequest) -> Self {
        ItemUpdate {
            name: req.name,
            parent_id: req.parent_item_id,
            download_url: req.download_url,
            thumbnail_url: req.thumbnail_url,
        }
    }
}

/// Query for listing a folder.
#[derive(Debug, Default, Deserialize)]
pub struct ListItemsQuery {
    /// Folder to list (root when absent).
    #[serde(default)]
    pub parent_item_id: Option<i64>,
}

/// Query for an existence probe.
#[derive(Debug, Deserialize)]
pub struct ProbeQuery {
    /// Name to look for.
    pub filename: String,
    /// Folder to look in (root when absent).
    #[serde(default)]
    pub parent_item_id: Option<i64>,
}

/// Query for item metadata.
#[derive(Debug, Default, Deserialize)]
pub struct ItemQuery {
    /// Present (and not `false`/`0`) to return sizes only.
    #[serde(default)]
    pub size_only: Option<String>,
}

impl ItemQuery {
    pub fn size_only(&self) -> bool {
        matches!(self.size_only.as_deref(), Some(v) if v != "false" && v != "0")
    }
}

/// Query for a thumbnail.
#[derive(Debug, Default, Deserialize)]
pub struct ThumbnailQuery {
    /// Size hint: `small`, `medium`, `large` or pixels.
    #[serde(default)]
    pub s: Option<String>,
}
