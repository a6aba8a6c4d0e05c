//! Playlist repository for database operations

use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::PlaylistRow;
use crate::models::{CreatePlaylistRequest, Playlist};

/// Every playlist row, newest first
pub async fn list_playlists(pool: &PgPool) -> Result<Vec<PlaylistRow>, sqlx::Error> {
    sqlx::query_as::<_, PlaylistRow>(
        r#"
        SELECT id, category_name, m3u_url, url, created_at
        FROM playlists
        ORDER BY created_at DESC
        "#,
    )
    .fetch_all(pool)
    .await
}

/// Playlists usable as sources, newest first
pub async fn load_playlists(pool: &PgPool) -> Result<Vec<Playlist>, sqlx::Error> {
    let rows = list_playlists(pool).await?;
    let total = rows.len();
    let playlists: Vec<Playlist> = rows.into_iter().filter_map(PlaylistRow::into_playlist).collect();

    if playlists.len() < total {
        tracing::warn!("Skipped {} playlist rows without a source URL", total - playlists.len());
    }

    Ok(playlists)
}

/// Insert a playlist; the notify trigger fans the change out to listeners
pub async fn insert_playlist(
    pool: &PgPool,
    request: &CreatePlaylistRequest,
) -> Result<PlaylistRow, sqlx::Error> {
    sqlx::query_as::<_, PlaylistRow>(
        r#"
        INSERT INTO playlists (id, category_name, m3u_url)
        VALUES ($1, $2, $3)
        RETURNING id, category_name, m3u_url, url, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(request.category_name.trim())
    .bind(request.url.trim())
    .fetch_one(pool)
    .await
}

/// Delete a playlist by id
pub async fn delete_playlist(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM playlists WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}
