use std::env;

use crate::services::source::FetchMode;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub port: u16,
    pub node_env: String,
    pub admin_key: Option<String>,

    // Redis (channel mirror, optional)
    pub redis_url: Option<String>,

    // PostgreSQL (playlist feed)
    pub database_url: String,
    pub db_max_connections: u32,

    // Source adapter
    pub proxy_base: String,
    pub fetch_mode: FetchMode,
    pub connect_timeout_ms: u64,
    pub max_m3u_size_mb: usize,

    // Publishing / pagination
    pub fast_path_threshold: usize,
    pub flush_every: usize,
    pub page_size: usize,
    pub abort_superseded: bool,

    // Raw proxy route: bounds the wait for upstream response headers only
    pub raw_proxy_timeout_ms: u64,

    // Misc
    pub user_agent: String,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self {
            // Server
            port: env_parse("PORT", 3001),
            node_env: env::var("NODE_ENV").unwrap_or_else(|_| "development".to_string()),
            admin_key: env_optional("ADMIN_KEY"),

            // Redis
            redis_url: env_optional("REDIS_URL"),

            // PostgreSQL
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/elive".to_string()),
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", 5),

            // Source adapter. An empty PROXY_BASE means direct fetches.
            proxy_base: env::var("PROXY_BASE")
                .unwrap_or_else(|_| "https://api.allorigins.win/raw".to_string()),
            fetch_mode: env::var("FETCH_MODE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(FetchMode::Streaming),
            connect_timeout_ms: env_parse("CONNECT_TIMEOUT_MS", 10_000),
            max_m3u_size_mb: env_parse("MAX_M3U_SIZE_MB", 100),

            // Publishing
            fast_path_threshold: env_parse("FAST_PATH_THRESHOLD", 20),
            flush_every: env_parse("FLUSH_EVERY", 500),
            page_size: env_parse("PAGE_SIZE", 30).max(1),
            abort_superseded: env_parse("ABORT_SUPERSEDED", true),

            raw_proxy_timeout_ms: env_parse("RAW_PROXY_TIMEOUT_MS", 30_000),

            // Misc - VLC user agent avoids some IPTV host blocks
            user_agent: env::var("USER_AGENT")
                .unwrap_or_else(|_| "VLC/3.0.20 LibVLC/3.0.20".to_string()),
        }
    }
}
