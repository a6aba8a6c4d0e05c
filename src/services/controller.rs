//! Channel list controller
//!
//! Orchestrates one selection at a time: cache check, transfer, incremental
//! parse, progressive publication and finalization. Every run carries a
//! [`RunTag`]; a run may only touch the observable state while its tag still
//! matches the current selection, so a late flush from a superseded run is
//! dropped instead of overwriting the newer playlist's channels.

use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::Config;
use crate::models::channel::{clamp_page, empty_list, Channel, ChannelList, ChannelPage};
use crate::models::{ChannelListState, ChannelsResponse, Playlist, SelectionPhase};
use crate::services::cache::PlaylistCache;
use crate::services::m3u_parser::{channel_stream, ParseEvent};
use crate::services::metrics;
use crate::services::publisher::{Flush, FlushKind, ProgressivePublisher, PublishPolicy};
use crate::services::source::{PlaylistFetcher, SourceError};

/// Controller tunables
#[derive(Debug, Clone, Copy)]
pub struct ControllerSettings {
    pub page_size: usize,
    pub policy: PublishPolicy,
    /// Abort the task of a superseded run instead of letting it drain
    pub abort_superseded: bool,
}

impl ControllerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            page_size: config.page_size,
            policy: PublishPolicy::from_config(config),
            abort_superseded: config.abort_superseded,
        }
    }
}

/// Staleness tag of an in-flight run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunTag {
    pub source_url: String,
    pub generation: u64,
}

impl RunTag {
    /// Whether `state` still belongs to this run's selection
    fn owns(&self, state: &ChannelListState) -> bool {
        state.generation == self.generation && state.source_url() == Some(self.source_url.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Superseded,
    Failed(String),
}

/// Result of one run, returned by its task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    /// Channels visible for the selection when the run ended
    pub channels: usize,
    pub dangling_entry: bool,
}

impl RunSummary {
    fn superseded() -> Self {
        Self {
            outcome: RunOutcome::Superseded,
            channels: 0,
            dangling_entry: false,
        }
    }
}

/// What a selection request did
#[derive(Debug)]
pub enum Selection {
    /// Served from cache; no transfer issued
    CacheHit(ChannelList),
    /// A run was spawned
    Started(JoinHandle<RunSummary>),
    /// A playlist with the same source URL is already loading
    AlreadyLoading,
    /// A newer selection won the race before the run could start
    Superseded,
}

enum Decision {
    AlreadyLoading,
    CacheHit(u64, ChannelList),
    Fetch(u64),
}

struct InFlight {
    generation: u64,
    handle: AbortHandle,
}

pub struct ChannelListController {
    fetcher: Arc<dyn PlaylistFetcher>,
    cache: Arc<PlaylistCache>,
    settings: ControllerSettings,
    state: watch::Sender<ChannelListState>,
    playlists: RwLock<Vec<Playlist>>,
    generation: AtomicU64,
    in_flight: Mutex<Option<InFlight>>,
}

impl ChannelListController {
    pub fn new(
        fetcher: Arc<dyn PlaylistFetcher>,
        cache: Arc<PlaylistCache>,
        settings: ControllerSettings,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(ChannelListState::new(settings.page_size));

        Arc::new(Self {
            fetcher,
            cache,
            settings,
            state,
            playlists: RwLock::new(Vec::new()),
            generation: AtomicU64::new(0),
            in_flight: Mutex::new(None),
        })
    }

    pub fn cache(&self) -> &Arc<PlaylistCache> {
        &self.cache
    }

    /// Receiver of the latest state. Intermediate states may be skipped,
    /// never delivered out of order.
    pub fn subscribe(&self) -> watch::Receiver<ChannelListState> {
        self.state.subscribe()
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> ChannelListState {
        self.state.borrow().clone()
    }

    /// Known playlists, newest first
    pub fn playlists(&self) -> Vec<Playlist> {
        self.playlists
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Replace the known playlist set with a feed delivery.
    /// The first playlist is selected only when nothing is selected yet.
    pub fn apply_playlists(self: &Arc<Self>, playlists: Vec<Playlist>) -> Option<Selection> {
        let first = playlists.first().cloned();
        let count = playlists.len();
        *self.playlists.write().unwrap_or_else(|e| e.into_inner()) = playlists;
        info!("Playlist feed delivered {} playlists", count);

        if self.state.borrow().selected.is_some() {
            return None;
        }
        first.map(|playlist| self.select(playlist))
    }

    /// Select a known playlist by id
    pub fn select_by_id(self: &Arc<Self>, id: Uuid) -> Option<Selection> {
        let playlist = self
            .playlists
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|p| p.id == id)
            .cloned()?;
        Some(self.select(playlist))
    }

    /// Select a playlist: serve it from cache or start a run
    pub fn select(self: &Arc<Self>, playlist: Playlist) -> Selection {
        let source_url = playlist.source_url.clone();
        let mut decision = Decision::AlreadyLoading;

        self.state.send_if_modified(|state| {
            if state.source_url() == Some(source_url.as_str()) && state.phase.is_loading() {
                // Same transfer keeps running; only the selected record may change
                let same_record = state.selected.as_ref().map(|p| p.id) == Some(playlist.id);
                if !same_record {
                    state.selected = Some(playlist);
                }
                return !same_record;
            }

            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            state.selected = Some(playlist);
            state.generation = generation;
            state.page = 0;
            state.last_error = None;

            match self.cache.get(&source_url) {
                Some(channels) => {
                    state.channels = channels.clone();
                    state.phase = SelectionPhase::CacheHit;
                    state.switching = false;
                    decision = Decision::CacheHit(generation, channels);
                }
                None => {
                    state.channels = empty_list();
                    state.phase = SelectionPhase::Loading;
                    state.switching = true;
                    decision = Decision::Fetch(generation);
                }
            }
            true
        });

        match decision {
            Decision::AlreadyLoading => {
                debug!(url = %source_url, "Playlist already loading; no new transfer");
                Selection::AlreadyLoading
            }
            Decision::CacheHit(generation, channels) => {
                metrics::CACHE_HITS.inc();
                self.retire_in_flight(generation);
                info!(url = %source_url, channels = channels.len(), "Channel cache hit");
                Selection::CacheHit(channels)
            }
            Decision::Fetch(generation) => {
                metrics::CACHE_MISSES.inc();
                self.spawn_run(RunTag {
                    source_url,
                    generation,
                })
            }
        }
    }

    fn retire_in_flight(&self, generation: u64) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        let stale = in_flight
            .as_ref()
            .map(|run| run.generation < generation)
            .unwrap_or(false);

        if stale {
            if let Some(run) = in_flight.take() {
                if self.settings.abort_superseded {
                    run.handle.abort();
                    debug!(generation = run.generation, "Aborted superseded run");
                }
            }
        }
    }

    fn spawn_run(self: &Arc<Self>, tag: RunTag) -> Selection {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());

        // A newer selection incremented the counter before we got the lock
        if self.generation.load(Ordering::SeqCst) != tag.generation {
            return Selection::Superseded;
        }

        if let Some(previous) = in_flight.take() {
            if self.settings.abort_superseded {
                previous.handle.abort();
                debug!(generation = previous.generation, "Aborted superseded run");
            }
        }

        let generation = tag.generation;
        let handle = tokio::spawn(Arc::clone(self).run(tag));
        *in_flight = Some(InFlight {
            generation,
            handle: handle.abort_handle(),
        });

        Selection::Started(handle)
    }

    async fn run(self: Arc<Self>, tag: RunTag) -> RunSummary {
        let run_id = Uuid::new_v4();
        info!(run_id = %run_id, url = %tag.source_url, generation = tag.generation, "Playlist run started");

        let body = match self.fetcher.open(&tag.source_url).await {
            Ok(body) => body,
            Err(e) => return self.fail(&tag, run_id, e),
        };

        let mut publisher = ProgressivePublisher::new(self.settings.policy);
        let mut events = channel_stream(body);
        let mut dangling_entry = false;

        while let Some(event) = events.next().await {
            if !self.is_current(&tag) {
                return self.superseded(&tag, run_id);
            }

            match event {
                Ok(ParseEvent::Channel(channel)) => {
                    if let Some(flush) = publisher.push(channel) {
                        debug!(run_id = %run_id, kind = ?flush.kind, channels = flush.channels.len(), "Publishing partial list");
                        if !self.apply_flush(&tag, flush) {
                            return self.superseded(&tag, run_id);
                        }
                    }
                }
                Ok(ParseEvent::Finished(summary)) => {
                    dangling_entry = summary.dangling_entry;
                    debug!(
                        run_id = %run_id,
                        channels = publisher.len(),
                        dropped_entries = summary.dropped_entries,
                        oversized_lines = summary.oversized_lines,
                        dangling_entry,
                        "Parse finished"
                    );
                }
                Err(e) => return self.fail(&tag, run_id, e),
            }
        }

        let flush = publisher.finish();
        let channels = flush.channels.clone();
        if !self.apply_flush(&tag, flush) {
            return self.superseded(&tag, run_id);
        }

        self.cache.put(&tag.source_url, channels.clone()).await;
        metrics::CHANNELS_PARSED.inc_by(channels.len() as u64);

        info!(run_id = %run_id, url = %tag.source_url, channels = channels.len(), "Playlist run complete");

        RunSummary {
            outcome: RunOutcome::Completed,
            channels: channels.len(),
            dangling_entry,
        }
    }

    fn is_current(&self, tag: &RunTag) -> bool {
        tag.owns(&self.state.borrow())
    }

    /// Apply a publisher flush if the run is still current
    fn apply_flush(&self, tag: &RunTag, flush: Flush) -> bool {
        let applied = self.state.send_if_modified(|state| {
            if !tag.owns(state) {
                return false;
            }

            if flush.initial {
                state.switching = false;
            }

            match flush.kind {
                FlushKind::Final => {
                    state.phase = SelectionPhase::Ready;
                    state.switching = false;
                    state.page = 0;
                }
                FlushKind::Milestone | FlushKind::Batch => {
                    state.phase = SelectionPhase::PartiallyReady;
                }
            }

            state.channels = flush.channels;
            state.page = clamp_page(state.page, state.channels.len(), state.page_size);
            true
        });

        if !applied {
            metrics::STALE_UPDATES.inc();
        }
        applied
    }

    /// Mark the selection as failed, keeping what this run already published
    fn fail(&self, tag: &RunTag, run_id: Uuid, error: SourceError) -> RunSummary {
        let message = error.to_string();
        let mut retained = 0;

        let applied = self.state.send_if_modified(|state| {
            if !tag.owns(state) {
                return false;
            }
            state.phase = SelectionPhase::Errored;
            state.switching = false;
            state.last_error = Some(message.clone());
            retained = state.channels.len();
            true
        });

        if !applied {
            metrics::STALE_UPDATES.inc();
            return self.superseded(tag, run_id);
        }

        metrics::PLAYLIST_FETCH_FAILURES.inc();
        error!(run_id = %run_id, url = %tag.source_url, error = %message, "Playlist run failed");

        RunSummary {
            outcome: RunOutcome::Failed(message),
            channels: retained,
            dangling_entry: false,
        }
    }

    fn superseded(&self, tag: &RunTag, run_id: Uuid) -> RunSummary {
        debug!(run_id = %run_id, url = %tag.source_url, generation = tag.generation, "Run superseded; results discarded");
        RunSummary::superseded()
    }

    // ============ Pagination ============

    fn move_page(&self, target: impl FnOnce(usize) -> usize) -> ChannelPage {
        self.state.send_if_modified(|state| {
            let page = clamp_page(target(state.page), state.channels.len(), state.page_size);
            if page == state.page {
                return false;
            }
            state.page = page;
            true
        });
        self.state.borrow().current_page()
    }

    /// Jump to a page, clamped to the current list
    pub fn set_page(&self, page: usize) -> ChannelPage {
        self.move_page(|_| page)
    }

    pub fn next_page(&self) -> ChannelPage {
        self.move_page(|page| page.saturating_add(1))
    }

    pub fn prev_page(&self) -> ChannelPage {
        self.move_page(|page| page.saturating_sub(1))
    }

    /// State summary plus current page, optionally moving to `page` first
    pub fn page_view(&self, page: Option<usize>) -> ChannelsResponse {
        if let Some(page) = page {
            self.set_page(page);
        }
        let state = self.state.borrow();
        ChannelsResponse {
            state: state.summary(),
            view: state.current_page(),
        }
    }

    /// Replace the visible list with an externally filtered one (e.g. the
    /// reachable partition of a geo probe). Only accepted for the current,
    /// fully loaded selection; the cache keeps the parsed list.
    pub fn apply_external_list(&self, source_url: &str, channels: Vec<Channel>) -> bool {
        let list: ChannelList = Arc::from(channels);

        self.state.send_if_modified(|state| {
            if state.source_url() != Some(source_url) {
                return false;
            }
            if !matches!(state.phase, SelectionPhase::Ready | SelectionPhase::CacheHit) {
                return false;
            }
            state.channels = list;
            state.page = 0;
            true
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::source::{FetchCause, PlaylistBody};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::ops::Range;
    use tokio::sync::Notify;

    #[derive(Clone, Default)]
    struct Script {
        chunks: Vec<String>,
        whole: bool,
        /// Wait on the notify before yielding chunk `.0`
        gate: Option<(usize, Arc<Notify>)>,
        fail_open: bool,
        /// Yield an error instead of chunk `n`
        fail_at_chunk: Option<usize>,
    }

    impl Script {
        fn chunks(chunks: Vec<String>) -> Self {
            Self {
                chunks,
                ..Self::default()
            }
        }

        fn gated(mut self, at: usize, gate: &Arc<Notify>) -> Self {
            self.gate = Some((at, Arc::clone(gate)));
            self
        }
    }

    #[derive(Default)]
    struct ScriptedFetcher {
        scripts: Mutex<HashMap<String, Script>>,
        opens: Mutex<HashMap<String, usize>>,
    }

    impl ScriptedFetcher {
        fn with(self, url: &str, script: Script) -> Self {
            self.scripts.lock().unwrap().insert(url.to_string(), script);
            self
        }

        fn opens(&self, url: &str) -> usize {
            self.opens.lock().unwrap().get(url).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl PlaylistFetcher for ScriptedFetcher {
        async fn open(&self, source_url: &str) -> Result<PlaylistBody, SourceError> {
            *self.opens.lock().unwrap().entry(source_url.to_string()).or_default() += 1;
            let script = self
                .scripts
                .lock()
                .unwrap()
                .get(source_url)
                .cloned()
                .unwrap_or_default();

            if script.fail_open {
                return Err(SourceError::fetch_failed(source_url, FetchCause::Status(502)));
            }
            if script.whole {
                return Ok(PlaylistBody::Whole(script.chunks.concat()));
            }

            let url = source_url.to_string();
            let stream = async_stream::stream! {
                for (i, chunk) in script.chunks.into_iter().enumerate() {
                    if let Some((at, gate)) = &script.gate {
                        if i == *at {
                            gate.notified().await;
                        }
                    }
                    if script.fail_at_chunk == Some(i) {
                        yield Err(SourceError::fetch_failed(&url, FetchCause::ProxyBody("reset".into())));
                        return;
                    }
                    yield Ok(chunk.into_bytes());
                }
            };
            Ok(PlaylistBody::Chunks(Box::pin(stream)))
        }
    }

    fn playlist_text(prefix: &str, range: Range<usize>) -> String {
        range
            .map(|i| {
                format!(
                    "#EXTINF:-1 tvg-logo=\"http://logo/{p}{i}.png\",{p} {i}\nhttp://{p}/{i}\n",
                    p = prefix,
                    i = i
                )
            })
            .collect()
    }

    fn playlist(name: &str, url: &str) -> Playlist {
        Playlist {
            id: Uuid::new_v4(),
            category_name: name.to_string(),
            source_url: url.to_string(),
            created_at: Utc::now(),
        }
    }

    fn settings(threshold: usize, flush_every: usize, abort_superseded: bool) -> ControllerSettings {
        ControllerSettings {
            page_size: 30,
            policy: PublishPolicy {
                fast_path_threshold: threshold,
                flush_every,
            },
            abort_superseded,
        }
    }

    fn controller(fetcher: &Arc<ScriptedFetcher>, settings: ControllerSettings) -> Arc<ChannelListController> {
        let fetcher: Arc<dyn PlaylistFetcher> = fetcher.clone();
        ChannelListController::new(fetcher, Arc::new(PlaylistCache::in_memory()), settings)
    }

    fn handle(selection: Selection) -> JoinHandle<RunSummary> {
        match selection {
            Selection::Started(handle) => handle,
            other => panic!("expected a started run, got {:?}", other),
        }
    }

    async fn finish(selection: Selection) -> RunSummary {
        handle(selection).await.expect("run task panicked")
    }

    #[tokio::test]
    async fn test_reselect_is_served_from_cache() {
        let fetcher = Arc::new(
            ScriptedFetcher::default()
                .with("http://a", Script::chunks(vec![playlist_text("a", 0..3)]))
                .with("http://b", Script::chunks(vec![playlist_text("b", 0..2)])),
        );
        let ctl = controller(&fetcher, settings(20, 0, false));
        let a = playlist("A", "http://a");
        let b = playlist("B", "http://b");

        let summary = finish(ctl.select(a.clone())).await;
        assert_eq!(summary.outcome, RunOutcome::Completed);
        let first_channels = ctl.snapshot().channels;
        assert_eq!(first_channels.len(), 3);

        finish(ctl.select(b)).await;
        assert_eq!(ctl.snapshot().channels.len(), 2);

        match ctl.select(a) {
            Selection::CacheHit(channels) => assert_eq!(channels, first_channels),
            other => panic!("expected cache hit, got {:?}", other),
        }

        let state = ctl.snapshot();
        assert_eq!(state.phase, SelectionPhase::CacheHit);
        assert!(!state.switching);
        assert_eq!(state.channels, first_channels);
        assert_eq!(fetcher.opens("http://a"), 1);
        assert_eq!(fetcher.opens("http://b"), 1);
    }

    #[tokio::test]
    async fn test_late_flush_from_superseded_run_is_discarded() {
        let gate = Arc::new(Notify::new());
        let fetcher = Arc::new(
            ScriptedFetcher::default()
                .with(
                    "http://a",
                    Script::chunks(vec![playlist_text("a", 0..2), playlist_text("a", 2..40)])
                        .gated(1, &gate),
                )
                .with("http://b", Script::chunks(vec![playlist_text("b", 0..5)])),
        );
        let ctl = controller(&fetcher, settings(1, 10, false));

        let a_run = handle(ctl.select(playlist("A", "http://a")));
        let mut rx = ctl.subscribe();
        rx.wait_for(|s| s.phase == SelectionPhase::PartiallyReady)
            .await
            .unwrap();
        assert_eq!(ctl.snapshot().source_url(), Some("http://a"));

        let b_summary = finish(ctl.select(playlist("B", "http://b"))).await;
        assert_eq!(b_summary.outcome, RunOutcome::Completed);

        // A's transfer completes after B's
        gate.notify_one();
        let a_summary = a_run.await.unwrap();
        assert_eq!(a_summary.outcome, RunOutcome::Superseded);

        let state = ctl.snapshot();
        assert_eq!(state.source_url(), Some("http://b"));
        assert_eq!(state.phase, SelectionPhase::Ready);
        assert_eq!(state.channels.len(), 5);
        assert!(state.channels.iter().all(|c| c.url.starts_with("http://b/")));
        assert!(!ctl.cache().contains("http://a"));
        assert!(ctl.cache().contains("http://b"));
    }

    #[tokio::test]
    async fn test_superseded_run_is_aborted() {
        let gate = Arc::new(Notify::new());
        let fetcher = Arc::new(
            ScriptedFetcher::default()
                .with("http://a", Script::chunks(vec![playlist_text("a", 0..3)]).gated(0, &gate))
                .with("http://b", Script::chunks(vec![playlist_text("b", 0..3)])),
        );
        let ctl = controller(&fetcher, settings(20, 0, true));

        let a_run = handle(ctl.select(playlist("A", "http://a")));
        finish(ctl.select(playlist("B", "http://b"))).await;

        let err = a_run.await.expect_err("superseded run should be aborted");
        assert!(err.is_cancelled());
        assert_eq!(ctl.snapshot().source_url(), Some("http://b"));
        assert!(!ctl.cache().contains("http://a"));
    }

    #[tokio::test]
    async fn test_fast_path_publishes_before_transfer_ends() {
        let gate = Arc::new(Notify::new());
        let fetcher = Arc::new(ScriptedFetcher::default().with(
            "http://a",
            Script::chunks(vec![playlist_text("a", 0..3), playlist_text("a", 3..5)]).gated(1, &gate),
        ));
        let ctl = controller(&fetcher, settings(2, 0, false));

        let run = handle(ctl.select(playlist("A", "http://a")));
        let state = ctl.snapshot();
        assert_eq!(state.phase, SelectionPhase::Loading);
        assert!(state.switching);
        assert!(state.channels.is_empty());

        let mut rx = ctl.subscribe();
        rx.wait_for(|s| s.phase == SelectionPhase::PartiallyReady)
            .await
            .unwrap();
        let partial = ctl.snapshot();
        assert!(!partial.switching);
        assert_eq!(partial.channels.len(), 2);
        assert!(!ctl.cache().contains("http://a"));

        gate.notify_one();
        let summary = run.await.unwrap();
        assert_eq!(summary.channels, 5);

        let done = ctl.snapshot();
        assert_eq!(done.phase, SelectionPhase::Ready);
        assert_eq!(done.channels.len(), 5);
        assert_eq!(done.channels[0].name, "a 0");
        assert_eq!(done.channels[0].logo, "http://logo/a0.png");
        assert!(ctl.cache().contains("http://a"));
    }

    #[tokio::test]
    async fn test_ready_resets_page() {
        let gate = Arc::new(Notify::new());
        let fetcher = Arc::new(ScriptedFetcher::default().with(
            "http://a",
            Script::chunks(vec![playlist_text("a", 0..4), playlist_text("a", 4..9)]).gated(1, &gate),
        ));
        let mut s = settings(4, 0, false);
        s.page_size = 2;
        let ctl = controller(&fetcher, s);

        let run = handle(ctl.select(playlist("A", "http://a")));
        let mut rx = ctl.subscribe();
        rx.wait_for(|s| s.phase == SelectionPhase::PartiallyReady)
            .await
            .unwrap();

        assert_eq!(ctl.set_page(1).page, 1);
        assert_eq!(ctl.set_page(5).page, 1);

        gate.notify_one();
        run.await.unwrap();
        let state = ctl.snapshot();
        assert_eq!(state.phase, SelectionPhase::Ready);
        assert_eq!(state.page, 0);
        assert_eq!(state.current_page().total_pages, 5);
    }

    #[tokio::test]
    async fn test_failed_open_marks_errored_and_allows_retry() {
        let fetcher = Arc::new(ScriptedFetcher::default().with(
            "http://a",
            Script {
                fail_open: true,
                ..Script::default()
            },
        ));
        let ctl = controller(&fetcher, settings(20, 0, false));
        let a = playlist("A", "http://a");

        let summary = finish(ctl.select(a.clone())).await;
        assert!(matches!(summary.outcome, RunOutcome::Failed(_)));

        let state = ctl.snapshot();
        assert_eq!(state.phase, SelectionPhase::Errored);
        assert!(!state.switching);
        assert!(state.channels.is_empty());
        assert!(state.last_error.unwrap().contains("502"));
        assert!(!ctl.cache().contains("http://a"));

        // Manual retry re-runs the pipeline
        finish(ctl.select(a)).await;
        assert_eq!(fetcher.opens("http://a"), 2);
    }

    #[tokio::test]
    async fn test_mid_stream_failure_keeps_published_channels() {
        let fetcher = Arc::new(ScriptedFetcher::default().with(
            "http://a",
            Script {
                fail_at_chunk: Some(1),
                ..Script::chunks(vec![playlist_text("a", 0..3), playlist_text("a", 3..6)])
            },
        ));
        let ctl = controller(&fetcher, settings(2, 0, false));

        let summary = finish(ctl.select(playlist("A", "http://a"))).await;
        assert!(matches!(summary.outcome, RunOutcome::Failed(_)));
        assert_eq!(summary.channels, 2);

        let state = ctl.snapshot();
        assert_eq!(state.phase, SelectionPhase::Errored);
        assert_eq!(state.channels.len(), 2);
        assert!(!ctl.cache().contains("http://a"));
    }

    #[tokio::test]
    async fn test_reselect_while_loading_is_noop() {
        let gate = Arc::new(Notify::new());
        let fetcher = Arc::new(ScriptedFetcher::default().with(
            "http://a",
            Script::chunks(vec![playlist_text("a", 0..3)]).gated(0, &gate),
        ));
        let ctl = controller(&fetcher, settings(20, 0, false));
        let a = playlist("A", "http://a");

        let run = handle(ctl.select(a.clone()));
        assert!(matches!(ctl.select(a), Selection::AlreadyLoading));

        gate.notify_one();
        run.await.unwrap();
        assert_eq!(fetcher.opens("http://a"), 1);
        assert_eq!(ctl.snapshot().generation, 1);
    }

    #[tokio::test]
    async fn test_other_record_with_loading_url_updates_selection() {
        let gate = Arc::new(Notify::new());
        let fetcher = Arc::new(ScriptedFetcher::default().with(
            "http://shared",
            Script::chunks(vec![playlist_text("s", 0..3)]).gated(0, &gate),
        ));
        let ctl = controller(&fetcher, settings(20, 0, false));
        let first = playlist("First", "http://shared");
        let second = playlist("Second", "http://shared");

        let run = handle(ctl.select(first));
        assert!(matches!(ctl.select(second.clone()), Selection::AlreadyLoading));
        let state = ctl.snapshot();
        assert_eq!(state.selected.as_ref().map(|p| p.id), Some(second.id));
        assert_eq!(state.phase, SelectionPhase::Loading);
        assert_eq!(state.generation, 1);

        gate.notify_one();
        let summary = run.await.unwrap();
        assert_eq!(summary.outcome, RunOutcome::Completed);

        let state = ctl.snapshot();
        assert_eq!(state.phase, SelectionPhase::Ready);
        assert_eq!(state.channels.len(), 3);
        assert_eq!(state.selected.map(|p| p.category_name), Some("Second".to_string()));
        assert_eq!(fetcher.opens("http://shared"), 1);
    }

    #[tokio::test]
    async fn test_feed_auto_selects_first_only_once() {
        let fetcher = Arc::new(
            ScriptedFetcher::default()
                .with("http://a", Script::chunks(vec![playlist_text("a", 0..1)]))
                .with("http://b", Script::chunks(vec![playlist_text("b", 0..1)])),
        );
        let ctl = controller(&fetcher, settings(20, 0, false));
        let a = playlist("A", "http://a");
        let b = playlist("B", "http://b");

        let selection = ctl.apply_playlists(vec![a.clone(), b.clone()]).expect("auto select");
        finish(selection).await;
        assert_eq!(ctl.snapshot().selected, Some(a.clone()));

        assert!(ctl.apply_playlists(vec![b.clone(), a.clone()]).is_none());
        assert_eq!(ctl.snapshot().selected, Some(a.clone()));
        assert_eq!(ctl.playlists(), vec![b.clone(), a]);

        finish(ctl.select_by_id(b.id).expect("known playlist")).await;
        assert_eq!(ctl.snapshot().source_url(), Some("http://b"));
        assert!(ctl.select_by_id(Uuid::new_v4()).is_none());
    }

    #[tokio::test]
    async fn test_empty_feed_selects_nothing() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let ctl = controller(&fetcher, settings(20, 0, false));
        assert!(ctl.apply_playlists(Vec::new()).is_none());
        assert_eq!(ctl.snapshot().phase, SelectionPhase::Idle);
    }

    #[tokio::test]
    async fn test_pagination_over_current_list() {
        let fetcher = Arc::new(
            ScriptedFetcher::default().with("http://a", Script::chunks(vec![playlist_text("a", 0..65)])),
        );
        let ctl = controller(&fetcher, settings(20, 0, false));
        finish(ctl.select(playlist("A", "http://a"))).await;

        assert_eq!(ctl.page_view(None).view.items.len(), 30);
        assert_eq!(ctl.set_page(1).items.len(), 30);

        let clamped = ctl.set_page(3);
        assert_eq!(clamped.page, 2);
        assert_eq!(clamped.items.len(), 5);

        assert_eq!(ctl.next_page().page, 2);
        assert_eq!(ctl.prev_page().page, 1);
        assert_eq!(ctl.prev_page().page, 0);
        assert_eq!(ctl.prev_page().page, 0);

        let response = ctl.page_view(Some(2));
        assert_eq!(response.state.page, 2);
        assert_eq!(response.state.total_pages, 3);
        assert_eq!(response.view.items[0].name, "a 60");
    }

    #[tokio::test]
    async fn test_whole_text_body() {
        let fetcher = Arc::new(ScriptedFetcher::default().with(
            "http://a",
            Script {
                whole: true,
                ..Script::chunks(vec![playlist_text("a", 0..25)])
            },
        ));
        let ctl = controller(&fetcher, settings(20, 0, false));
        let summary = finish(ctl.select(playlist("A", "http://a"))).await;
        assert_eq!(summary.channels, 25);
        assert_eq!(ctl.snapshot().phase, SelectionPhase::Ready);
    }

    #[tokio::test]
    async fn test_empty_playlist_is_ready() {
        let fetcher = Arc::new(ScriptedFetcher::default().with(
            "http://a",
            Script::chunks(vec!["#EXTM3U\n#EXTINF:-1,Dangling\n".to_string()]),
        ));
        let ctl = controller(&fetcher, settings(20, 0, false));

        let summary = finish(ctl.select(playlist("A", "http://a"))).await;
        assert_eq!(summary.outcome, RunOutcome::Completed);
        assert_eq!(summary.channels, 0);
        assert!(summary.dangling_entry);

        let state = ctl.snapshot();
        assert_eq!(state.phase, SelectionPhase::Ready);
        assert!(!state.switching);
        assert!(state.channels.is_empty());
        assert!(ctl.cache().contains("http://a"));
    }

    #[tokio::test]
    async fn test_external_list_applies_to_current_selection_only() {
        let fetcher = Arc::new(
            ScriptedFetcher::default().with("http://a", Script::chunks(vec![playlist_text("a", 0..4)])),
        );
        let ctl = controller(&fetcher, settings(20, 0, false));
        finish(ctl.select(playlist("A", "http://a"))).await;

        let reachable = ctl.snapshot().channels[..2].to_vec();
        assert!(!ctl.apply_external_list("http://b", reachable.clone()));
        assert!(ctl.apply_external_list("http://a", reachable.clone()));

        assert_eq!(ctl.snapshot().channels.to_vec(), reachable);
        assert_eq!(ctl.cache().get("http://a").map(|l| l.len()), Some(4));
    }
}
