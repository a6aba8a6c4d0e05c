use anyhow::Result;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};

use crate::models::Channel;

/// Key prefix of mirrored channel lists
pub const CHANNEL_KEY_PREFIX: &str = "channels_";

/// Mirror key for a playlist source URL
pub fn channel_key(source_url: &str) -> String {
    format!("{}{}", CHANNEL_KEY_PREFIX, source_url)
}

/// Redis service used as the durable mirror of the channel cache
#[derive(Clone)]
pub struct RedisService {
    conn: ConnectionManager,
}

impl RedisService {
    /// Create a new Redis service with connection pooling
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    /// Set a key without expiration
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let mut conn = self.conn.clone();
        let serialized = serde_json::to_string(value)?;
        let _: () = conn.set(key, serialized).await?;
        Ok(())
    }

    /// Get a key and deserialize
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        match value {
            Some(v) => {
                let parsed = serde_json::from_str(&v)?;
                Ok(Some(parsed))
            }
            None => Ok(None),
        }
    }

    /// Delete a key
    pub async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    /// List keys matching a glob pattern (SCAN, non-blocking)
    pub async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut iter: redis::AsyncIter<String> = conn.scan_match(pattern).await?;
        let mut keys = Vec::new();
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        Ok(keys)
    }

    /// Ping Redis to check connection
    pub async fn ping(&self) -> Result<bool> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(pong == "PONG")
    }

    // ============ Channel Mirror Operations ============

    /// Store a finalized channel list
    pub async fn save_channels(&self, source_url: &str, channels: &[Channel]) -> Result<()> {
        self.set(&channel_key(source_url), channels).await
    }

    /// Load a mirrored channel list
    pub async fn load_channels(&self, source_url: &str) -> Result<Option<Vec<Channel>>> {
        self.get(&channel_key(source_url)).await
    }

    /// Remove a mirrored channel list
    pub async fn delete_channels(&self, source_url: &str) -> Result<()> {
        self.del(&channel_key(source_url)).await
    }

    /// Source URLs of every mirrored channel list
    pub async fn mirrored_sources(&self) -> Result<Vec<String>> {
        let keys = self.scan_keys(&format!("{}*", CHANNEL_KEY_PREFIX)).await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(CHANNEL_KEY_PREFIX).map(str::to_string))
            .collect())
    }
}
