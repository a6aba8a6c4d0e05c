//! Prometheus counters for the ingestion pipeline (default registry)

use lazy_static::lazy_static;
use prometheus::{register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec};

lazy_static! {
    pub static ref PLAYLIST_FETCHES: IntCounterVec = register_int_counter_vec!(
        "elive_playlist_fetches_total",
        "Playlist transfers started, by fetch mode",
        &["mode"]
    )
    .unwrap();
    pub static ref PLAYLIST_FETCH_FAILURES: IntCounter = register_int_counter!(
        "elive_playlist_fetch_failures_total",
        "Playlist transfers that failed before or during download"
    )
    .unwrap();
    pub static ref CACHE_HITS: IntCounter = register_int_counter!(
        "elive_channel_cache_hits_total",
        "Selections served from the channel cache"
    )
    .unwrap();
    pub static ref CACHE_MISSES: IntCounter = register_int_counter!(
        "elive_channel_cache_misses_total",
        "Selections that required a transfer"
    )
    .unwrap();
    pub static ref CHANNELS_PARSED: IntCounter = register_int_counter!(
        "elive_channels_parsed_total",
        "Channels emitted by completed runs"
    )
    .unwrap();
    pub static ref STALE_UPDATES: IntCounter = register_int_counter!(
        "elive_stale_updates_discarded_total",
        "State updates dropped because their run was superseded"
    )
    .unwrap();
}
