use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::WatchStream;

use crate::models::Channel;
use crate::routes::{api_error, require_admin, ApiError};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ChannelsQuery {
    pub page: Option<usize>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageDirection {
    Next,
    Prev,
}

/// Either an absolute page or a relative move
#[derive(Debug, Deserialize)]
pub struct PageRequest {
    pub page: Option<usize>,
    pub direction: Option<PageDirection>,
}

/// Externally filtered list for the current selection
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideRequest {
    pub source_url: String,
    pub channels: Vec<Channel>,
}

/// GET /api/channels?page=N - Selection state plus one page of channels
pub async fn get_channels(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChannelsQuery>,
) -> impl IntoResponse {
    Json(state.controller.page_view(query.page))
}

/// POST /api/channels/page - Move the page cursor
pub async fn change_page(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<PageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let view = match (payload.page, payload.direction) {
        (Some(page), _) => state.controller.set_page(page),
        (None, Some(PageDirection::Next)) => state.controller.next_page(),
        (None, Some(PageDirection::Prev)) => state.controller.prev_page(),
        (None, None) => {
            return Err(api_error(StatusCode::BAD_REQUEST, "Expected page or direction"));
        }
    };

    Ok(Json(view))
}

/// GET /api/channels/events - Server-sent state summaries
pub async fn channel_events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = WatchStream::new(state.controller.subscribe()).map(|snapshot| {
        let event = Event::default().event("state");
        Ok(event
            .json_data(snapshot.summary())
            .unwrap_or_else(|_| Event::default().event("error").data("serialization failed")))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// PUT /api/channels/override - Replace the visible list of the current selection
pub async fn override_channels(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<OverrideRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let count = payload.channels.len();
    if !state
        .controller
        .apply_external_list(&payload.source_url, payload.channels)
    {
        return Err(api_error(
            StatusCode::CONFLICT,
            "Playlist is not the current, fully loaded selection",
        ));
    }

    tracing::info!("External channel list applied ({} channels) for {}", count, payload.source_url);
    Ok(Json(serde_json::json!({ "applied": true, "channels": count })))
}

/// DELETE /api/cache - Drop every cached channel list (admin)
pub async fn clear_cache(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers)?;

    let removed = state.cache.clear().await.map_err(|e| {
        tracing::error!("Failed to clear channel cache: {}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "Cache clear failed")
    })?;

    tracing::info!("Channel cache cleared ({} entries)", removed);
    Ok(Json(serde_json::json!({ "success": true, "removed": removed })))
}
