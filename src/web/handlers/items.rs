//! Item handlers for Web API: probe, upload, metadata, delivery, update, delete.

use axum::{
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tokio_util::io::ReaderStream;

use crate::delivery::{ContentDeliveryResolver, Delivery, LocalContent, ThumbnailSize};
use crate::item::{Item, ItemTree, ItemUpdate};
use crate::probe::{ExistenceProbe, ProbeResult};
use crate::upload::{UploadRequest, UploadService};
use crate::web::dto::{
    ApiResponse, BreadcrumbEntry, FolderResponse, ItemQuery, ItemResponse, ListItemsQuery,
    ProbeQuery, ProbeResponse, SizeResponse, ThumbnailQuery, UpdateItemRequest, ValidatedJson,
};
use crate::web::error::ApiError;
use crate::web::handlers::AppState;
use crate::web::middleware::AuthOwner;
use crate::StowageError;

/// Build a Content-Disposition value safe for any filename.
///
/// Control characters are dropped, quotes and backslashes replaced, and
/// non-ASCII names get an RFC 5987 `filename*` parameter.
fn content_disposition_header(disposition: &str, filename: &str) -> String {
    let sanitized: String = filename
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '"' | '\\' => '_',
            _ => c,
        })
        .collect();

    if filename.is_ascii() && sanitized == filename {
        return format!("{disposition}; filename=\"{filename}\"");
    }

    let fallback: String = sanitized
        .chars()
        .map(|c| if c.is_ascii() { c } else { '_' })
        .collect();
    format!(
        "{disposition}; filename=\"{fallback}\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}

/// Turn a delivery decision into a response.
fn delivery_response(delivery: Delivery, disposition: &str) -> Result<Response, ApiError> {
    match delivery {
        Delivery::Redirect(url) => Ok((StatusCode::FOUND, [(header::LOCATION, url)]).into_response()),
        Delivery::Local(LocalContent {
            filename,
            mime_type,
            length,
            reader,
        }) => Response::builder()
            .header(header::CONTENT_TYPE, mime_type)
            .header(
                header::CONTENT_DISPOSITION,
                content_disposition_header(disposition, &filename),
            )
            .header(header::CONTENT_LENGTH, length)
            .body(Body::from_stream(ReaderStream::new(reader)))
            .map_err(|e| {
                tracing::error!("Failed to build response: {}", e);
                ApiError::internal("Failed to build response")
            }),
    }
}

/// Empty response carrying a Content-Length.
fn length_only(status: StatusCode, length: u64) -> Response {
    (status, [(header::CONTENT_LENGTH, length.to_string())]).into_response()
}

/// GET /api/items - List a folder's direct children.
pub async fn list_items(
    State(state): State<Arc<AppState>>,
    owner: AuthOwner,
    Query(query): Query<ListItemsQuery>,
) -> Result<Json<ApiResponse<Vec<ItemResponse>>>, ApiError> {
    let children = ItemTree::new(state.db.pool())
        .children_of(owner.owner_id(), query.parent_item_id)
        .await?;

    Ok(Json(ApiResponse::new(
        children.iter().map(ItemResponse::from).collect(),
    )))
}

/// HEAD /api/items - Probe for a filename.
///
/// 200 when nothing exists; 201 with `Content-Length` set to the bytes
/// already received when an item exists and can be resumed.
pub async fn probe_head(
    State(state): State<Arc<AppState>>,
    owner: AuthOwner,
    Query(query): Query<ProbeQuery>,
) -> Result<Response, ApiError> {
    let result = ExistenceProbe::new(state.db.pool())
        .probe(owner.owner_id(), query.parent_item_id, &query.filename)
        .await?;

    Ok(match result {
        ProbeResult::Found { uploaded_size, .. } => length_only(StatusCode::CREATED, uploaded_size),
        ProbeResult::NotFound => StatusCode::OK.into_response(),
    })
}

/// GET /api/items/probe - Probe for a filename, JSON form.
pub async fn probe_item(
    State(state): State<Arc<AppState>>,
    owner: AuthOwner,
    Query(query): Query<ProbeQuery>,
) -> Result<Json<ApiResponse<ProbeResponse>>, ApiError> {
    let result = ExistenceProbe::new(state.db.pool())
        .probe(owner.owner_id(), query.parent_item_id, &query.filename)
        .await?;

    Ok(Json(ApiResponse::new(ProbeResponse::from(result))))
}

/// POST /api/items - Upload one chunk.
///
/// Multipart fields: `content` (the chunk, carrying the filename) and an
/// optional `parent_item_id`; a `filename` field overrides the part's name.
/// The byte range comes from the `Content-Range` header.
pub async fn upload_chunk(
    State(state): State<Arc<AppState>>,
    owner: AuthOwner,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<ItemResponse>>, ApiError> {
    let mut filename: Option<String> = None;
    let mut part_filename: Option<String> = None;
    let mut mime_type: Option<String> = None;
    let mut parent_id: Option<i64> = None;
    let mut content: Option<Vec<u8>> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        tracing::warn!("Failed to read multipart field: {}", e);
        ApiError::bad_request("Invalid multipart data")
    })? {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "content" => {
                part_filename = field.file_name().map(|s| s.to_string());
                mime_type = field.content_type().map(|s| s.to_string());
                content = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| {
                            tracing::warn!("Failed to read chunk content: {}", e);
                            ApiError::bad_request("Failed to read content")
                        })?
                        .to_vec(),
                );
            }
            "parent_item_id" => {
                let text = field
                    .text()
                    .await
                    .map_err(|_| ApiError::bad_request("Invalid parent_item_id"))?;
                let text = text.trim();
                if !text.is_empty() {
                    parent_id = Some(
                        text.parse()
                            .map_err(|_| ApiError::bad_request("Invalid parent_item_id"))?,
                    );
                }
            }
            "filename" => {
                filename = Some(
                    field
                        .text()
                        .await
                        .map_err(|_| ApiError::bad_request("Invalid filename"))?,
                );
            }
            _ => {}
        }
    }

    let content = content.ok_or_else(|| ApiError::bad_request("No content provided"))?;
    let filename = filename
        .or(part_filename)
        .ok_or_else(|| ApiError::bad_request("No filename provided"))?;

    let content_range = match headers.get(header::CONTENT_RANGE) {
        Some(value) => Some(
            value
                .to_str()
                .map_err(|_| StowageError::InvalidRange("header is not valid text".to_string()))?
                .to_string(),
        ),
        None => None,
    };

    let mut request = UploadRequest::new(filename, content).with_parent(parent_id);
    if let Some(mime_type) = mime_type {
        request = request.with_mime_type(mime_type);
    }
    if let Some(content_range) = content_range {
        request = request.with_content_range(content_range);
    }
    let filename = request.filename.clone();

    let service = UploadService::new(&state.db, state.storage.as_ref(), &state.locks)
        .with_max_chunk_size(state.max_chunk_size);

    match service.upload_chunk(owner.owner_id(), request).await {
        Ok(item) => Ok(Json(ApiResponse::new(ItemResponse::from(&item)))),
        Err(err @ StowageError::InvalidRange(_)) => {
            Err(with_resume_point(&state, owner.owner_id(), parent_id, &filename, err).await)
        }
        Err(err) => Err(err.into()),
    }
}

/// Attach the current upload progress to a rejected chunk, if known.
async fn with_resume_point(
    state: &AppState,
    owner_id: i64,
    parent_id: Option<i64>,
    filename: &str,
    err: StowageError,
) -> ApiError {
    let api_error = ApiError::from(err);
    let existing = ExistenceProbe::new(state.db.pool())
        .probe(owner_id, parent_id, filename)
        .await;

    match existing {
        Ok(ProbeResult::Found {
            uploaded_size,
            file_size,
        }) => api_error.with_progress(uploaded_size, file_size),
        _ => api_error,
    }
}

/// GET /api/items/:id - Item metadata.
///
/// Files return their summary, folders their breadcrumb and children.
/// With `size_only`, only the sizes are returned.
pub async fn get_item(
    State(state): State<Arc<AppState>>,
    owner: AuthOwner,
    Path(id): Path<i64>,
    Query(query): Query<ItemQuery>,
) -> Result<Response, ApiError> {
    let tree = ItemTree::new(state.db.pool());
    let item = tree.get_owned(owner.owner_id(), id).await?;

    if query.size_only() {
        let resolver = ContentDeliveryResolver::new(state.storage.as_ref(), state.thumbnailer.as_ref());
        let sizes = SizeResponse::from(resolver.size_info(&item));
        return Ok(Json(ApiResponse::new(sizes)).into_response());
    }

    if !item.is_folder() {
        return Ok(Json(ApiResponse::new(ItemResponse::from(&item))).into_response());
    }

    let breadcrumb = tree.ancestors_of(&item).await?;
    let children = tree.children_of(owner.owner_id(), Some(item.id)).await?;
    let response = FolderResponse {
        item: ItemResponse::from(&item),
        breadcrumb: breadcrumb.iter().map(BreadcrumbEntry::from).collect(),
        children: children.iter().map(ItemResponse::from).collect(),
    };

    Ok(Json(ApiResponse::new(response)).into_response())
}

/// HEAD /api/items/:id - Bytes received so far, as `Content-Length`.
pub async fn head_item(
    State(state): State<Arc<AppState>>,
    owner: AuthOwner,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let item = ItemTree::new(state.db.pool())
        .get_owned(owner.owner_id(), id)
        .await?;

    Ok(length_only(StatusCode::OK, item.uploaded_size()))
}

/// GET /api/items/:id/download - Download content or redirect to it.
pub async fn download(
    State(state): State<Arc<AppState>>,
    owner: AuthOwner,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let item = ItemTree::new(state.db.pool())
        .get_owned(owner.owner_id(), id)
        .await?;

    let resolver = ContentDeliveryResolver::new(state.storage.as_ref(), state.thumbnailer.as_ref());
    delivery_response(resolver.resolve_download(&item).await?, "attachment")
}

/// GET /api/items/:id/thumbnail - Thumbnail at a size hint.
pub async fn thumbnail(
    State(state): State<Arc<AppState>>,
    owner: AuthOwner,
    Path(id): Path<i64>,
    Query(query): Query<ThumbnailQuery>,
) -> Result<Response, ApiError> {
    let size = ThumbnailSize::parse(query.s.as_deref())?;
    let item = ItemTree::new(state.db.pool())
        .get_owned(owner.owner_id(), id)
        .await?;

    let resolver = ContentDeliveryResolver::new(state.storage.as_ref(), state.thumbnailer.as_ref());
    delivery_response(resolver.resolve_thumbnail(&item, size).await?, "inline")
}

/// PATCH /api/items/:id - Rename, move, or set external URLs.
pub async fn update_item(
    State(state): State<Arc<AppState>>,
    owner: AuthOwner,
    Path(id): Path<i64>,
    ValidatedJson(req): ValidatedJson<UpdateItemRequest>,
) -> Result<Json<ApiResponse<ItemResponse>>, ApiError> {
    let tree = ItemTree::new(state.db.pool());
    let item = tree.get_owned(owner.owner_id(), id).await?;

    let _guard = state.locks.acquire(owner.owner_id(), &item.path).await;
    let updated = tree
        .update(owner.owner_id(), id, &ItemUpdate::from(req))
        .await?;

    Ok(Json(ApiResponse::new(ItemResponse::from(&updated))))
}

/// DELETE /api/items/:id - Delete an item and everything under it.
pub async fn delete_item(
    State(state): State<Arc<AppState>>,
    owner: AuthOwner,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let tree = ItemTree::new(state.db.pool());
    let item: Item = tree.get_owned(owner.owner_id(), id).await?;

    let _guard = state.locks.acquire(owner.owner_id(), &item.path).await;
    tree.remove(owner.owner_id(), id, state.storage.as_ref())
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_disposition_ascii() {
        assert_eq!(
            content_disposition_header("attachment", "report.pdf"),
            "attachment; filename=\"report.pdf\""
        );
    }

    #[test]
    fn test_content_disposition_escapes() {
        let value = content_disposition_header("attachment", "a\"b\r\n.txt");
        assert!(!value.contains('\r'));
        assert!(!value.contains('\n'));
        assert!(value.starts_with("attachment; filename=\"a_b.txt\""));
        assert!(value.contains("filename*=UTF-8''"));
    }

    #[test]
    fn test_content_disposition_unicode() {
        let value = content_disposition_header("inline", "写真.png");
        assert!(value.starts_with("inline; filename=\"__.png\""));
        assert!(value.ends_with("filename*=UTF-8''%E5%86%99%E7%9C%9F.png"));
    }

    #[test]
    fn test_redirect_response() {
        let response =
            delivery_response(Delivery::Redirect("https://cdn.example.com/a".into()), "attachment")
                .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "https://cdn.example.com/a"
        );
    }

    #[test]
    fn test_local_response_headers() {
        let response = delivery_response(
            Delivery::Local(LocalContent {
                filename: "a.txt".into(),
                mime_type: "text/plain".into(),
                length: 5,
                reader: Box::new(std::io::Cursor::new(b"hello".to_vec())),
            }),
            "attachment",
        )
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(header::CONTENT_TYPE).unwrap(), "text/plain");
        assert_eq!(response.headers().get(header::CONTENT_LENGTH).unwrap(), "5");
    }
}
