use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Placeholder used when an EXTINF line carries no display name
pub const UNKNOWN_CHANNEL_NAME: &str = "Unknown";

/// Single playable channel parsed from an M3U playlist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub name: String,
    /// Logo URL, empty when the playlist has no `tvg-logo`
    #[serde(default)]
    pub logo: String,
    pub url: String,
}

/// Immutable snapshot of a channel list.
/// Every published list is a fresh snapshot, never mutated after creation.
pub type ChannelList = Arc<[Channel]>;

/// Empty channel list
pub fn empty_list() -> ChannelList {
    Arc::from(Vec::new())
}

/// Number of pages needed for `len` channels (0 for an empty list)
pub fn total_pages(len: usize, page_size: usize) -> usize {
    if page_size == 0 {
        return 0;
    }
    len.div_ceil(page_size)
}

/// Clamp a requested page index into `[0, total_pages - 1]` (0 when empty)
pub fn clamp_page(page: usize, len: usize, page_size: usize) -> usize {
    match total_pages(len, page_size) {
        0 => 0,
        pages => page.min(pages - 1),
    }
}

/// Paginated view over the current channel list
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelPage {
    pub items: Vec<Channel>,
    pub page: usize,
    pub total_pages: usize,
    pub page_size: usize,
    pub total: usize,
    pub has_prev: bool,
    pub has_next: bool,
}

impl ChannelPage {
    /// Build the page at `page` (clamped) over `channels`
    pub fn build(channels: &[Channel], page_size: usize, page: usize) -> Self {
        let page_size = page_size.max(1);
        let total = channels.len();
        let total_pages = total_pages(total, page_size);
        let page = clamp_page(page, total, page_size);

        let start = (page * page_size).min(total);
        let end = (start + page_size).min(total);

        Self {
            items: channels[start..end].to_vec(),
            page,
            total_pages,
            page_size,
            total,
            has_prev: page > 0,
            has_next: page + 1 < total_pages,
        }
    }
}
