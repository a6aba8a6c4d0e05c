use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Channel category backed by a remote M3U document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Playlist {
    pub id: Uuid,
    pub category_name: String,
    /// Canonical remote URL of the M3U document
    pub source_url: String,
    pub created_at: DateTime<Utc>,
}

/// Request to register a new playlist
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePlaylistRequest {
    pub category_name: String,
    /// Accepts either `url` or `m3uUrl`
    #[serde(alias = "m3uUrl")]
    pub url: String,
}

/// Playlists response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistsResponse {
    pub playlists: Vec<Playlist>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_id: Option<Uuid>,
    pub total: usize,
}
