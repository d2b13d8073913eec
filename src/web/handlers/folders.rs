//! Folder handlers for Web API.

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::item::ItemTree;
use crate::web::dto::{ApiResponse, CreateFolderRequest, ItemResponse, ValidatedJson};
use crate::web::error::ApiError;
use crate::web::handlers::AppState;
use crate::web::middleware::AuthOwner;

/// POST /api/folders - Create a folder.
pub async fn create_folder(
    State(state): State<Arc<AppState>>,
    owner: AuthOwner,
    ValidatedJson(req): ValidatedJson<CreateFolderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ItemResponse>>), ApiError> {
    let folder = ItemTree::new(state.db.pool())
        .create_folder(owner.owner_id(), req.parent_item_id, &req.name)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::new(ItemResponse::from(&folder))),
    ))
}
