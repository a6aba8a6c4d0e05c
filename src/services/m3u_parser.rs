use futures::stream::BoxStream;
use futures::StreamExt;
use lazy_static::lazy_static;
use regex::Regex;

use crate::models::channel::{Channel, UNKNOWN_CHANNEL_NAME};
use crate::services::source::{PlaylistBody, SourceError};

const EXTINF_PREFIX: &str = "#EXTINF:";

// Lines longer than this are dropped whole
const MAX_LINE_BYTES: usize = 32 * 1024;

lazy_static! {
    /// Regex to extract the logo attribute from an EXTINF line
    static ref LOGO_REGEX: Regex = Regex::new(r#"tvg-logo="([^"]*)""#).unwrap();
}

/// Entry opened by an EXTINF line, waiting for its URL line
#[derive(Debug)]
struct PendingEntry {
    name: String,
    logo: String,
}

/// Outcome counters for one parse run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseSummary {
    pub channels: usize,
    /// Input ended with an EXTINF line that never got its URL
    pub dangling_entry: bool,
    /// EXTINF lines replaced by a later EXTINF before any URL
    pub dropped_entries: usize,
    pub oversized_lines: usize,
}

/// Events produced by [`channel_stream`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseEvent {
    Channel(Channel),
    Finished(ParseSummary),
}

/// Parse an EXTINF line into name and logo.
/// The name is whatever follows the last comma.
fn parse_extinf(line: &str) -> PendingEntry {
    let name = line
        .rsplit_once(',')
        .map(|(_, title)| title)
        .unwrap_or(line)
        .trim();

    let name = if name.is_empty() {
        UNKNOWN_CHANNEL_NAME.to_string()
    } else {
        name.to_string()
    };

    let logo = LOGO_REGEX
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();

    PendingEntry { name, logo }
}

fn is_stream_url(line: &str) -> bool {
    line.starts_with("http://") || line.starts_with("https://")
}

/// Incremental, single-pass M3U parser.
///
/// Bytes are fed in arbitrary chunks; a partial trailing line is held back
/// until its line feed arrives, so the emitted channels never depend on
/// where chunk boundaries fall.
#[derive(Debug, Default)]
pub struct M3uParser {
    pending_line: Vec<u8>,
    /// Set when the held-back line grew past MAX_LINE_BYTES
    discarding_line: bool,
    current: Option<PendingEntry>,
    summary: ParseSummary,
}

impl M3uParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk, returning the channels completed by it
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Channel> {
        let mut out = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let head = &rest[..pos];
            rest = &rest[pos + 1..];

            if self.discarding_line {
                self.discarding_line = false;
                continue;
            }

            let channel = if self.pending_line.is_empty() {
                self.complete_line(head)
            } else {
                let mut line = std::mem::take(&mut self.pending_line);
                line.extend_from_slice(head);
                let channel = self.complete_line(&line);
                line.clear();
                self.pending_line = line;
                channel
            };

            if let Some(channel) = channel {
                out.push(channel);
            }
        }

        if !self.discarding_line && !rest.is_empty() {
            self.pending_line.extend_from_slice(rest);
            if self.pending_line.len() > MAX_LINE_BYTES {
                self.pending_line.clear();
                self.discarding_line = true;
                self.summary.oversized_lines += 1;
            }
        }

        out
    }

    /// Signal end of input. The held-back partial line is processed as a
    /// final line; an entry still waiting for its URL is dropped.
    pub fn finish(mut self) -> (Option<Channel>, ParseSummary) {
        let channel = if self.discarding_line || self.pending_line.is_empty() {
            None
        } else {
            let line = std::mem::take(&mut self.pending_line);
            self.complete_line(&line)
        };

        self.summary.dangling_entry = self.current.is_some();
        (channel, self.summary)
    }

    fn complete_line(&mut self, raw: &[u8]) -> Option<Channel> {
        if raw.len() > MAX_LINE_BYTES {
            self.summary.oversized_lines += 1;
            return None;
        }

        let text = String::from_utf8_lossy(raw);
        let line = text.trim();

        if line.starts_with(EXTINF_PREFIX) {
            if self.current.is_some() {
                self.summary.dropped_entries += 1;
            }
            self.current = Some(parse_extinf(line));
            return None;
        }

        if is_stream_url(line) {
            // Orphan URL lines (no pending EXTINF) are ignored
            let entry = self.current.take()?;
            self.summary.channels += 1;
            return Some(Channel {
                name: entry.name,
                logo: entry.logo,
                url: line.to_string(),
            });
        }

        None
    }
}

/// Parse a complete playlist text
#[cfg(test)]
pub fn parse_text(text: &str) -> Vec<Channel> {
    let mut parser = M3uParser::new();
    let mut channels = parser.feed(text.as_bytes());
    let (last, _) = parser.finish();
    channels.extend(last);
    channels
}

/// Turn a playlist body into a lazy sequence of parse events.
/// Chunked bodies are parsed as each chunk arrives; the last event of a
/// successful run is always `ParseEvent::Finished`.
pub fn channel_stream(body: PlaylistBody) -> BoxStream<'static, Result<ParseEvent, SourceError>> {
    Box::pin(async_stream::try_stream! {
        let mut parser = M3uParser::new();

        match body {
            PlaylistBody::Whole(text) => {
                for channel in parser.feed(text.as_bytes()) {
                    yield ParseEvent::Channel(channel);
                }
            }
            PlaylistBody::Chunks(mut chunks) => {
                while let Some(chunk) = chunks.next().await {
                    let chunk = chunk?;
                    for channel in parser.feed(&chunk) {
                        yield ParseEvent::Channel(channel);
                    }
                }
            }
        }

        let (last, summary) = parser.finish();
        if let Some(channel) = last {
            yield ParseEvent::Channel(channel);
        }

        if summary.dangling_entry {
            tracing::debug!("Playlist ended with an EXTINF entry missing its URL; entry dropped");
        }
        if summary.channels == 0 {
            tracing::info!("Playlist parsed with zero channels");
        }

        yield ParseEvent::Finished(summary);
    })
}
