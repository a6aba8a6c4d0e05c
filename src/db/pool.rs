//! Database connection pool management

use sqlx::postgres::{PgListener, PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{error, info};

use crate::config::Config;

/// Notification channel raised by the playlists trigger
pub const PLAYLISTS_CHANNEL: &str = "playlists_changed";

/// Create a PostgreSQL connection pool
pub async fn create_pool(config: &Config) -> Result<PgPool, sqlx::Error> {
    info!("Connecting to PostgreSQL...");

    // The feed listener holds one connection for its lifetime
    let max_connections = config.db_max_connections.max(2);

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .connect(&config.database_url)
        .await?;

    info!("PostgreSQL connection pool created with max {} connections", max_connections);

    Ok(pool)
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    info!("Running database migrations...");

    sqlx::migrate!("./migrations").run(pool).await?;

    info!("Database migrations completed");

    Ok(())
}

/// Listener subscribed to playlist change notifications
pub async fn playlist_listener(pool: &PgPool) -> Result<PgListener, sqlx::Error> {
    let mut listener = PgListener::connect_with(pool).await?;
    listener.listen(PLAYLISTS_CHANNEL).await?;
    Ok(listener)
}

/// Health check for the database
pub async fn health_check(pool: &PgPool) -> bool {
    match sqlx::query("SELECT 1").fetch_one(pool).await {
        Ok(_) => true,
        Err(e) => {
            error!("Database health check failed: {}", e);
            false
        }
    }
}
