use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::repository::playlists;
use crate::models::{CreatePlaylistRequest, PlaylistsResponse, StateSummary};
use crate::routes::{api_error, require_admin, ApiError};
use crate::services::controller::Selection;
use crate::services::feed;
use crate::services::source::validate_target;
use crate::AppState;

/// Select response
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectResponse {
    /// cacheHit | loading | alreadyLoading | superseded
    pub status: &'static str,
    pub state: StateSummary,
}

/// GET /api/playlists - Known playlist set and current selection
pub async fn list_playlists(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let playlists = state.controller.playlists();
    let selected_id = state.controller.snapshot().selected.map(|p| p.id);

    Json(PlaylistsResponse {
        total: playlists.len(),
        playlists,
        selected_id,
    })
}

/// POST /api/playlists - Register a playlist (admin)
pub async fn create_playlist(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<CreatePlaylistRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers)?;

    if payload.category_name.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "categoryName is required"));
    }
    validate_target(payload.url.trim())
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Invalid URL: {}", e)))?;

    let row = playlists::insert_playlist(&state.pool, &payload)
        .await
        .map_err(|e| {
            tracing::error!("Failed to insert playlist: {}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Database error")
        })?;

    if let Err(e) = feed::deliver(&state.pool, &state.controller).await {
        tracing::warn!("Playlist feed refresh failed: {}", e);
    }

    tracing::info!("Playlist {} created ({})", row.id, row.category_name);

    let playlist = row
        .into_playlist()
        .ok_or_else(|| api_error(StatusCode::INTERNAL_SERVER_ERROR, "Stored playlist has no URL"))?;

    Ok((StatusCode::CREATED, Json(playlist)))
}

/// DELETE /api/playlists/:id - Remove a playlist (admin)
pub async fn delete_playlist(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers)?;

    let source_url = state
        .controller
        .playlists()
        .into_iter()
        .find(|p| p.id == id)
        .map(|p| p.source_url);

    let deleted = playlists::delete_playlist(&state.pool, id).await.map_err(|e| {
        tracing::error!("Failed to delete playlist {}: {}", id, e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "Database error")
    })?;

    if !deleted {
        return Err(api_error(StatusCode::NOT_FOUND, "Playlist not found"));
    }

    if let Some(source_url) = source_url {
        state.cache.invalidate(&source_url).await;
    }

    if let Err(e) = feed::deliver(&state.pool, &state.controller).await {
        tracing::warn!("Playlist feed refresh failed: {}", e);
    }

    Ok(Json(serde_json::json!({ "success": true, "id": id })))
}

/// POST /api/playlists/:id/select - Select a playlist
pub async fn select_playlist(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let selection = state
        .controller
        .select_by_id(id)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Playlist not found"))?;

    let status = match selection {
        Selection::CacheHit(_) => "cacheHit",
        Selection::Started(_) => "loading",
        Selection::AlreadyLoading => "alreadyLoading",
        Selection::Superseded => "superseded",
    };

    Ok(Json(SelectResponse {
        status,
        state: state.controller.snapshot().summary(),
    }))
}
