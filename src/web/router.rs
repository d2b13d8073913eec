//! Router configuration for Web API.

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use super::handlers::{
    create_folder, delete_item, download, get_item, head_item, list_items, probe_head, probe_item,
    thumbnail, update_item, upload_chunk, AppState,
};
use super::middleware::{create_cors_layer, jwt_auth, JwtState};

/// Room for multipart framing and the other form fields around a chunk.
const MULTIPART_OVERHEAD: u64 = 1024 * 1024;

/// Create the main API router.
pub fn create_router(
    app_state: Arc<AppState>,
    jwt_state: Arc<JwtState>,
    cors_origins: &[String],
) -> Router {
    let body_limit = usize::try_from(app_state.max_chunk_size.saturating_add(MULTIPART_OVERHEAD))
        .unwrap_or(usize::MAX);

    let item_routes = Router::new()
        .route(
            "/",
            get(list_items).head(probe_head).post(upload_chunk),
        )
        .route("/probe", get(probe_item))
        .route(
            "/:id",
            get(get_item)
                .head(head_item)
                .patch(update_item)
                .delete(delete_item),
        )
        .route("/:id/download", get(download))
        .route("/:id/thumbnail", get(thumbnail));

    let api_routes = Router::new()
        .nest("/items", item_routes)
        .route("/folders", post(create_folder));

    let jwt_state_for_middleware = jwt_state.clone();

    Router::new()
        .nest("/api", api_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(create_cors_layer(cors_origins))
                .layer(middleware::from_fn(move |req, next| {
                    let state = jwt_state_for_middleware.clone();
                    jwt_auth(state, req, next)
                }))
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .with_state(app_state)
}

/// Create a health check router.
pub fn create_health_router() -> Router {
    Router::new().route("/health", get(health_check))
}

/// Health check handler.
async fn health_check() -> &'static str {
    "OK"
}
