//! Database row types for PostgreSQL
//!
//! These types map directly to database rows and are converted to the
//! playlist model in models/playlist.rs

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::Playlist;

/// Playlist row from database
#[derive(Debug, Clone, FromRow)]
pub struct PlaylistRow {
    pub id: Uuid,
    pub category_name: String,
    pub m3u_url: Option<String>,
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PlaylistRow {
    /// Source URL: `m3u_url` when present and non-empty, else `url`
    pub fn source_url(&self) -> Option<&str> {
        [self.m3u_url.as_deref(), self.url.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|u| !u.is_empty())
    }

    /// Convert to the playlist model; rows without any URL are skipped
    pub fn into_playlist(self) -> Option<Playlist> {
        let source_url = self.source_url()?.to_string();
        Some(Playlist {
            id: self.id,
            category_name: self.category_name,
            source_url,
            created_at: self.created_at,
        })
    }
}
