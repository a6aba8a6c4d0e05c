use serde::Serialize;

use super::channel::{empty_list, ChannelList, ChannelPage};
use super::playlist::Playlist;

/// Phase of the active selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SelectionPhase {
    /// Nothing selected yet
    Idle,
    /// Served from the channel cache, no transfer issued
    CacheHit,
    /// Transfer in progress, nothing published yet
    Loading,
    /// Transfer in progress, a partial list is visible
    PartiallyReady,
    /// Full list published
    Ready,
    /// Transfer or parse failed
    Errored,
}

impl SelectionPhase {
    /// A transfer for the selection is still running
    pub fn is_loading(&self) -> bool {
        matches!(self, SelectionPhase::Loading | SelectionPhase::PartiallyReady)
    }
}

impl Default for SelectionPhase {
    fn default() -> Self {
        Self::Idle
    }
}

impl std::fmt::Display for SelectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectionPhase::Idle => write!(f, "idle"),
            SelectionPhase::CacheHit => write!(f, "cacheHit"),
            SelectionPhase::Loading => write!(f, "loading"),
            SelectionPhase::PartiallyReady => write!(f, "partiallyReady"),
            SelectionPhase::Ready => write!(f, "ready"),
            SelectionPhase::Errored => write!(f, "errored"),
        }
    }
}

/// Observable state of the channel list controller
#[derive(Debug, Clone)]
pub struct ChannelListState {
    pub selected: Option<Playlist>,
    pub phase: SelectionPhase,
    pub channels: ChannelList,
    /// True from selection until first milestone flush or cache hit
    pub switching: bool,
    pub page: usize,
    pub page_size: usize,
    pub last_error: Option<String>,
    /// Selection counter of the run that owns this state
    pub generation: u64,
}

impl ChannelListState {
    pub fn new(page_size: usize) -> Self {
        Self {
            selected: None,
            phase: SelectionPhase::Idle,
            channels: empty_list(),
            switching: false,
            page: 0,
            page_size: page_size.max(1),
            last_error: None,
            generation: 0,
        }
    }

    /// Source URL of the current selection
    pub fn source_url(&self) -> Option<&str> {
        self.selected.as_ref().map(|p| p.source_url.as_str())
    }

    /// Page view at the stored page index
    pub fn current_page(&self) -> ChannelPage {
        ChannelPage::build(&self.channels, self.page_size, self.page)
    }

    pub fn summary(&self) -> StateSummary {
        StateSummary {
            selected: self.selected.clone(),
            phase: self.phase,
            switching: self.switching,
            channel_count: self.channels.len(),
            page: self.page,
            total_pages: super::channel::total_pages(self.channels.len(), self.page_size),
            last_error: self.last_error.clone(),
        }
    }
}

/// Lightweight state description (no channel payload)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected: Option<Playlist>,
    pub phase: SelectionPhase,
    pub switching: bool,
    pub channel_count: usize,
    pub page: usize,
    pub total_pages: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Channels endpoint response: state summary plus the current page
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsResponse {
    #[serde(flatten)]
    pub state: StateSummary,
    pub view: ChannelPage,
}
