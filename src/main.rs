mod config;
mod db;
mod models;
mod routes;
mod services;

use anyhow::Context;
use axum::{
    routing::{delete, get, post, put},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::db::{create_pool, run_migrations};
use crate::services::{
    cache::PlaylistCache,
    controller::{ChannelListController, ControllerSettings},
    feed::{start_playlist_feed, FeedConfig},
    redis::RedisService,
    source::HttpPlaylistSource,
};
use sqlx::PgPool;

/// Application state shared across handlers
pub struct AppState {
    pub config: Config,
    pub pool: PgPool,
    pub redis: Option<RedisService>,
    pub cache: Arc<PlaylistCache>,
    pub controller: Arc<ChannelListController>,
    pub start_time: Instant,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing/logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "elive_server=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    // Load configuration
    let config = Config::from_env();
    let port = config.port;

    tracing::info!("Starting eLive Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Environment: {}", config.node_env);

    // Initialize PostgreSQL connection pool
    let pool = create_pool(&config)
        .await
        .context("connecting to PostgreSQL")?;
    run_migrations(&pool)
        .await
        .context("running database migrations")?;

    // Redis mirror is optional; the cache works in memory without it
    let redis = match &config.redis_url {
        Some(url) => match RedisService::new(url).await {
            Ok(redis) => {
                tracing::info!("Redis connected: {}", url);
                Some(redis)
            }
            Err(e) => {
                tracing::warn!("Redis unavailable ({}), channel cache is memory-only", e);
                None
            }
        },
        None => None,
    };

    let cache = Arc::new(PlaylistCache::new(redis.clone()));
    if let Err(e) = cache.warm().await {
        tracing::warn!("Channel cache warm-up failed: {}", e);
    }

    let source = HttpPlaylistSource::new(&config).context("building playlist HTTP client")?;
    tracing::info!(
        "Playlist source initialized (mode: {}, proxy: {})",
        source.mode().as_str(),
        if config.proxy_base.is_empty() { "direct" } else { config.proxy_base.as_str() }
    );

    let controller = ChannelListController::new(
        Arc::new(source),
        cache.clone(),
        ControllerSettings::from_config(&config),
    );

    // Live playlist feed (runs in background)
    tokio::spawn(start_playlist_feed(pool.clone(), controller.clone(), FeedConfig::default()));

    // Build application state
    let state = Arc::new(AppState {
        config,
        pool,
        redis,
        cache,
        controller,
        start_time: Instant::now(),
    });

    // Build router
    let app = Router::new()
        // Health endpoints
        .route("/", get(routes::health::root))
        .route("/health", get(routes::health::health_check))
        .route("/metrics", get(routes::health::metrics))
        .route("/ready", get(routes::health::ready))
        .route("/live", get(routes::health::live))
        // Playlist endpoints
        .route(
            "/api/playlists",
            get(routes::playlists::list_playlists).post(routes::playlists::create_playlist),
        )
        .route("/api/playlists/:id", delete(routes::playlists::delete_playlist))
        .route("/api/playlists/:id/select", post(routes::playlists::select_playlist))
        // Channel list endpoints
        .route("/api/channels", get(routes::channels::get_channels))
        .route("/api/channels/page", post(routes::channels::change_page))
        .route("/api/channels/events", get(routes::channels::channel_events))
        .route("/api/channels/override", put(routes::channels::override_channels))
        // Admin endpoints (protected by ADMIN_KEY)
        .route("/api/cache", delete(routes::channels::clear_cache))
        // Raw proxy
        .route("/api/proxy/raw", get(routes::proxy::raw_proxy))
        // Middleware
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
        )
        .with_state(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
