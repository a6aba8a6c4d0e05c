use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::models::channel::ChannelList;
use crate::services::redis::RedisService;

/// Finalized channel lists keyed by playlist source URL.
///
/// Lookups are synchronous and served from memory only. When a Redis
/// mirror is configured, writes are copied to it and [`PlaylistCache::warm`]
/// reloads mirrored lists into memory at start-up. Entries never expire.
pub struct PlaylistCache {
    entries: RwLock<HashMap<String, ChannelList>>,
    mirror: Option<RedisService>,
}

impl PlaylistCache {
    pub fn new(mirror: Option<RedisService>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            mirror,
        }
    }

    /// Process-lifetime cache with no durable mirror
    pub fn in_memory() -> Self {
        Self::new(None)
    }

    pub fn has_mirror(&self) -> bool {
        self.mirror.is_some()
    }

    // Inserts are single operations, so a poisoned map is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, ChannelList>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, ChannelList>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Cached list for a source URL
    pub fn get(&self, source_url: &str) -> Option<ChannelList> {
        self.read().get(source_url).cloned()
    }

    pub fn contains(&self, source_url: &str) -> bool {
        self.read().contains_key(source_url)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Store a finalized list. Mirror failures are logged, never returned.
    pub async fn put(&self, source_url: &str, channels: ChannelList) {
        self.write().insert(source_url.to_string(), channels.clone());

        if let Some(mirror) = &self.mirror {
            if let Err(e) = mirror.save_channels(source_url, &channels).await {
                tracing::warn!(url = %source_url, error = %e, "Failed to mirror channel list to Redis");
            }
        }
    }

    /// Drop one entry from memory and mirror
    pub async fn invalidate(&self, source_url: &str) -> bool {
        let removed = self.write().remove(source_url).is_some();

        if let Some(mirror) = &self.mirror {
            if let Err(e) = mirror.delete_channels(source_url).await {
                tracing::warn!(url = %source_url, error = %e, "Failed to delete mirrored channel list");
            }
        }

        removed
    }

    /// Drop every entry from memory and mirror, returning the memory count
    pub async fn clear(&self) -> Result<usize> {
        let removed = {
            let mut entries = self.write();
            let count = entries.len();
            entries.clear();
            count
        };

        if let Some(mirror) = &self.mirror {
            for source_url in mirror.mirrored_sources().await? {
                mirror.delete_channels(&source_url).await?;
            }
        }

        Ok(removed)
    }

    /// Load every mirrored list into memory, trusting it as-is
    pub async fn warm(&self) -> Result<usize> {
        let Some(mirror) = &self.mirror else {
            return Ok(0);
        };

        let mut loaded = 0;
        for source_url in mirror.mirrored_sources().await? {
            match mirror.load_channels(&source_url).await {
                Ok(Some(channels)) => {
                    self.write()
                        .insert(source_url, Arc::from(channels));
                    loaded += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(url = %source_url, error = %e, "Skipping unreadable mirrored channel list");
                }
            }
        }

        tracing::info!("Channel cache warmed with {} mirrored lists", loaded);
        Ok(loaded)
    }
}
