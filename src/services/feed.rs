//! Live playlist feed
//!
//! Delivers the full playlist set to the controller on startup and again
//! after every change notification raised by the `playlists` trigger.
//! - Subscribes before the first load so no change is missed
//! - Reloads after a listener reconnect, since notifications may have been lost
//! - Retries with exponential backoff when the database is unreachable

use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

use crate::db::pool::playlist_listener;
use crate::db::repository::playlists::load_playlists;
use crate::services::controller::{ChannelListController, Selection};

/// Retry settings for the feed task
#[derive(Debug, Clone, Copy)]
pub struct FeedConfig {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl FeedConfig {
    /// Delay after `current`, doubled and capped
    pub fn next_backoff(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_backoff)
    }
}

/// Load the playlist set and hand it to the controller
pub async fn deliver(pool: &PgPool, controller: &Arc<ChannelListController>) -> Result<usize, sqlx::Error> {
    let playlists = load_playlists(pool).await?;
    let count = playlists.len();

    match controller.apply_playlists(playlists) {
        Some(Selection::Started(_)) => tracing::info!("Feed: auto-selected newest playlist, loading"),
        Some(Selection::CacheHit(channels)) => {
            tracing::info!("Feed: auto-selected newest playlist from cache ({} channels)", channels.len())
        }
        Some(_) | None => {}
    }

    Ok(count)
}

async fn follow(
    pool: &PgPool,
    controller: &Arc<ChannelListController>,
    backoff: &mut Duration,
    config: &FeedConfig,
) -> Result<(), sqlx::Error> {
    let mut listener = playlist_listener(pool).await?;
    deliver(pool, controller).await?;
    *backoff = config.initial_backoff;

    loop {
        match listener.try_recv().await? {
            Some(notification) => {
                tracing::debug!("Feed: playlists changed ({})", notification.payload());
            }
            None => {
                tracing::warn!("Feed: listener connection lost, reloading playlists");
            }
        }
        deliver(pool, controller).await?;
    }
}

/// Start the playlist feed
///
/// Never returns. This should be spawned as a background task using `tokio::spawn`.
pub async fn start_playlist_feed(pool: PgPool, controller: Arc<ChannelListController>, config: FeedConfig) {
    tracing::info!(
        "Starting playlist feed (backoff: {:?}..{:?})",
        config.initial_backoff,
        config.max_backoff
    );

    let mut backoff = config.initial_backoff;

    loop {
        if let Err(e) = follow(&pool, &controller, &mut backoff, &config).await {
            tracing::error!("Feed: {} (retrying in {:?})", e, backoff);
        }
        time::sleep(backoff).await;
        backoff = config.next_backoff(backoff);
    }
}
