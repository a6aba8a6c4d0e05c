//! Playlist source adapter
//!
//! Fetches raw M3U text for a remote URL, optionally through a pass-through
//! CORS proxy (`<proxy-base>?url=<percent-encoded target>`). The body comes
//! back either as one complete string or as a lazy stream of byte chunks.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Client;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;
use crate::services::metrics;

/// Transfer strategy for playlist bodies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Await the whole body, then parse
    Whole,
    /// Parse chunks as they arrive
    Streaming,
}

impl FetchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchMode::Whole => "whole",
            FetchMode::Streaming => "streaming",
        }
    }
}

impl FromStr for FetchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "whole" | "text" => Ok(FetchMode::Whole),
            "streaming" | "stream" => Ok(FetchMode::Streaming),
            other => Err(format!("unknown fetch mode: {}", other)),
        }
    }
}

/// Underlying reason a playlist fetch failed
#[derive(Debug, Error)]
pub enum FetchCause {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("upstream returned HTTP {0}")]
    Status(u16),
    #[error("proxy error: {0}")]
    ProxyBody(String),
    #[error("payload too large: {0} bytes")]
    TooLarge(u64),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

/// Errors surfaced by playlist sources
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to fetch playlist {url}: {cause}")]
    FetchFailed {
        url: String,
        #[source]
        cause: FetchCause,
    },
}

impl SourceError {
    pub fn fetch_failed(url: &str, cause: impl Into<FetchCause>) -> Self {
        SourceError::FetchFailed {
            url: url.to_string(),
            cause: cause.into(),
        }
    }
}

/// Lazy, finite, non-restartable sequence of body chunks
pub type ChunkStream = BoxStream<'static, Result<Vec<u8>, SourceError>>;

/// Playlist payload as delivered by a source
pub enum PlaylistBody {
    Whole(String),
    Chunks(ChunkStream),
}

impl std::fmt::Debug for PlaylistBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaylistBody::Whole(text) => write!(f, "Whole({} bytes)", text.len()),
            PlaylistBody::Chunks(_) => write!(f, "Chunks(..)"),
        }
    }
}

/// Anything able to open a playlist body for a source URL
#[async_trait]
pub trait PlaylistFetcher: Send + Sync {
    async fn open(&self, source_url: &str) -> Result<PlaylistBody, SourceError>;
}

/// Build the request URL, routing through `proxy_base` unless it is empty
pub fn proxied_url(proxy_base: &str, target: &str) -> String {
    let base = proxy_base.trim();
    if base.is_empty() {
        return target.to_string();
    }
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{}{}url={}", base, separator, urlencoding::encode(target))
}

/// Detect a proxy error document (a JSON object with `error`/`message`)
/// where playlist text was expected
pub fn detect_proxy_error(body: &[u8]) -> Option<String> {
    let start = body.iter().position(|b| !b.is_ascii_whitespace())?;
    if body[start] != b'{' {
        return None;
    }

    let value: serde_json::Value = serde_json::from_slice(&body[start..]).ok()?;
    let object = value.as_object()?;
    object
        .get("error")
        .or_else(|| object.get("message"))
        .map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
}

/// Most leading bytes buffered while deciding whether a streamed body is a
/// proxy error document
const PROXY_SNIFF_LIMIT: usize = 64 * 1024;

#[derive(Debug, PartialEq, Eq)]
enum Sniff {
    NeedMore,
    ProxyError(String),
    Playlist,
}

/// Classify the leading bytes of a streamed body. A body opening with `{` is
/// held until the JSON document is complete, so an error object split across
/// chunks is still recognised.
fn sniff_proxy_error(head: &[u8]) -> Sniff {
    let Some(start) = head.iter().position(|b| !b.is_ascii_whitespace()) else {
        return if head.len() > PROXY_SNIFF_LIMIT {
            Sniff::Playlist
        } else {
            Sniff::NeedMore
        };
    };
    if head[start] != b'{' {
        return Sniff::Playlist;
    }

    match serde_json::from_slice::<serde_json::Value>(&head[start..]) {
        Ok(_) => match detect_proxy_error(head) {
            Some(message) => Sniff::ProxyError(message),
            None => Sniff::Playlist,
        },
        Err(e) if e.is_eof() && head.len() <= PROXY_SNIFF_LIMIT => Sniff::NeedMore,
        Err(_) => Sniff::Playlist,
    }
}

/// Only absolute http(s) URLs are fetched
pub fn validate_target(url: &str) -> Result<(), FetchCause> {
    match url::Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
        Ok(parsed) => Err(FetchCause::InvalidUrl(format!(
            "unsupported scheme {}",
            parsed.scheme()
        ))),
        Err(e) => Err(FetchCause::InvalidUrl(e.to_string())),
    }
}

/// HTTP playlist source backed by reqwest
pub struct HttpPlaylistSource {
    client: Client,
    proxy_base: String,
    mode: FetchMode,
    max_bytes: u64,
}

impl HttpPlaylistSource {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        // No total timeout: large playlists may stream for a long time
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .gzip(true)
            .build()?;

        Ok(Self {
            client,
            proxy_base: config.proxy_base.clone(),
            mode: config.fetch_mode,
            max_bytes: (config.max_m3u_size_mb as u64) * 1024 * 1024,
        })
    }

    pub fn mode(&self) -> FetchMode {
        self.mode
    }

    async fn open_inner(&self, source_url: &str) -> Result<PlaylistBody, FetchCause> {
        validate_target(source_url)?;

        let request_url = proxied_url(&self.proxy_base, source_url);
        tracing::debug!(url = %source_url, via = %request_url, mode = self.mode.as_str(), "Opening playlist");

        let response = self.client.get(&request_url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchCause::Status(status.as_u16()));
        }

        if let Some(len) = response.content_length() {
            if len > self.max_bytes {
                return Err(FetchCause::TooLarge(len));
            }
        }

        match self.mode {
            FetchMode::Whole => {
                let text = response.text().await?;
                if text.len() as u64 > self.max_bytes {
                    return Err(FetchCause::TooLarge(text.len() as u64));
                }
                if let Some(message) = detect_proxy_error(text.as_bytes()) {
                    return Err(FetchCause::ProxyBody(message));
                }
                Ok(PlaylistBody::Whole(text))
            }
            FetchMode::Streaming => {
                let url = source_url.to_string();
                let max_bytes = self.max_bytes;
                let mut upstream = Box::pin(response.bytes_stream());

                let chunks = async_stream::try_stream! {
                    let mut received: u64 = 0;
                    // Leading bytes held back until they cannot be a proxy error document
                    let mut head: Vec<u8> = Vec::new();
                    let mut sniffing = true;

                    while let Some(chunk) = upstream.next().await {
                        let chunk = chunk.map_err(|e| SourceError::fetch_failed(&url, e))?;
                        if chunk.is_empty() {
                            continue;
                        }

                        received += chunk.len() as u64;
                        if received > max_bytes {
                            Err::<(), _>(SourceError::fetch_failed(&url, FetchCause::TooLarge(received)))?;
                        }

                        if !sniffing {
                            yield chunk.to_vec();
                            continue;
                        }

                        head.extend_from_slice(&chunk);
                        match sniff_proxy_error(&head) {
                            Sniff::NeedMore => {}
                            Sniff::ProxyError(message) => {
                                Err::<(), _>(SourceError::fetch_failed(&url, FetchCause::ProxyBody(message)))?;
                            }
                            Sniff::Playlist => {
                                sniffing = false;
                                yield std::mem::take(&mut head);
                            }
                        }
                    }

                    if sniffing && !head.is_empty() {
                        if let Some(message) = detect_proxy_error(&head) {
                            Err::<(), _>(SourceError::fetch_failed(&url, FetchCause::ProxyBody(message)))?;
                        }
                        yield head;
                    }
                };

                Ok(PlaylistBody::Chunks(Box::pin(chunks)))
            }
        }
    }
}

#[async_trait]
impl PlaylistFetcher for HttpPlaylistSource {
    async fn open(&self, source_url: &str) -> Result<PlaylistBody, SourceError> {
        metrics::PLAYLIST_FETCHES
            .with_label_values(&[self.mode.as_str()])
            .inc();

        self.open_inner(source_url).await.map_err(|cause| {
            tracing::warn!(url = %source_url, error = %cause, "Playlist fetch failed");
            SourceError::fetch_failed(source_url, cause)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use wiremock::{
        matchers::{method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    const SAMPLE: &str = "#EXTM3U\n#EXTINF:-1 tvg-logo=\"http://l/a.png\",Alpha\nhttp://a/1\n#EXTINF:-1,Beta\nhttp://b/2\n";

    fn source(proxy_base: &str, mode: FetchMode, max_bytes: u64) -> HttpPlaylistSource {
        HttpPlaylistSource {
            client: Client::new(),
            proxy_base: proxy_base.to_string(),
            mode,
            max_bytes,
        }
    }

    /// Serve one response with a chunked body, pausing between chunks
    async fn serve_chunked(chunks: Vec<&'static [u8]>, pause: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nTransfer-Encoding: chunked\r\n\r\n")
                .await
                .unwrap();
            for chunk in chunks {
                socket.write_all(format!("{:x}\r\n", chunk.len()).as_bytes()).await.unwrap();
                socket.write_all(chunk).await.unwrap();
                socket.write_all(b"\r\n").await.unwrap();
                socket.flush().await.unwrap();
                tokio::time::sleep(pause).await;
            }
            socket.write_all(b"0\r\n\r\n").await.unwrap();
            socket.flush().await.unwrap();
        });
        format!("http://{}/list.m3u", addr)
    }

    async fn collect(body: PlaylistBody) -> Result<Vec<u8>, SourceError> {
        match body {
            PlaylistBody::Whole(text) => Ok(text.into_bytes()),
            PlaylistBody::Chunks(mut chunks) => {
                let mut out = Vec::new();
                while let Some(chunk) = chunks.next().await {
                    out.extend_from_slice(&chunk?);
                }
                Ok(out)
            }
        }
    }

    fn cause(err: SourceError) -> FetchCause {
        match err {
            SourceError::FetchFailed { cause, .. } => cause,
        }
    }

    #[test]
    fn test_proxied_url_encodes_target() {
        let url = proxied_url(
            "https://api.allorigins.win/raw",
            "https://iptv-org.github.io/iptv/categories/sports.m3u?x=1&y=2",
        );
        assert_eq!(
            url,
            "https://api.allorigins.win/raw?url=https%3A%2F%2Fiptv-org.github.io%2Fiptv%2Fcategories%2Fsports.m3u%3Fx%3D1%26y%3D2"
        );
    }

    #[test]
    fn test_proxied_url_appends_to_existing_query() {
        let url = proxied_url("http://localhost:3001/api/proxy/raw?fmt=text", "http://a/b.m3u");
        assert_eq!(url, "http://localhost:3001/api/proxy/raw?fmt=text&url=http%3A%2F%2Fa%2Fb.m3u");
    }

    #[test]
    fn test_proxied_url_direct_when_base_empty() {
        assert_eq!(proxied_url("", "http://a/b.m3u"), "http://a/b.m3u");
        assert_eq!(proxied_url("   ", "http://a/b.m3u"), "http://a/b.m3u");
    }

    #[test]
    fn test_detect_proxy_error() {
        assert_eq!(
            detect_proxy_error(br#"  {"error": "upstream timeout"}"#),
            Some("upstream timeout".to_string())
        );
        assert_eq!(
            detect_proxy_error(br#"{"message": "Too many requests"}"#),
            Some("Too many requests".to_string())
        );
        assert_eq!(detect_proxy_error(b"#EXTM3U\n#EXTINF:-1,A\nhttp://a\n"), None);
        assert_eq!(detect_proxy_error(br#"{"contents": "x"}"#), None);
        assert_eq!(detect_proxy_error(b""), None);
    }

    #[test]
    fn test_fetch_mode_from_str() {
        assert_eq!("whole".parse::<FetchMode>(), Ok(FetchMode::Whole));
        assert_eq!(" Streaming ".parse::<FetchMode>(), Ok(FetchMode::Streaming));
        assert!("chunky".parse::<FetchMode>().is_err());
    }

    #[test]
    fn test_validate_target() {
        assert!(validate_target("https://example.com/list.m3u").is_ok());
        assert!(matches!(
            validate_target("ftp://example.com/list.m3u"),
            Err(FetchCause::InvalidUrl(_))
        ));
        assert!(matches!(validate_target("not a url"), Err(FetchCause::InvalidUrl(_))));
    }

    #[test]
    fn test_fetch_failed_keeps_cause() {
        let err = SourceError::fetch_failed("http://a/b.m3u", FetchCause::Status(503));
        assert_eq!(
            err.to_string(),
            "failed to fetch playlist http://a/b.m3u: upstream returned HTTP 503"
        );
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source, Some("upstream returned HTTP 503".to_string()));
    }

    #[test]
    fn test_sniff_waits_for_complete_json_document() {
        let body = br#"{"error": "upstream timeout"}"#;
        for end in 1..body.len() {
            assert_eq!(sniff_proxy_error(&body[..end]), Sniff::NeedMore, "prefix of {} bytes", end);
        }
        assert_eq!(
            sniff_proxy_error(body),
            Sniff::ProxyError("upstream timeout".to_string())
        );
        assert_eq!(sniff_proxy_error(b"  \n"), Sniff::NeedMore);
        assert_eq!(sniff_proxy_error(b"#EXTM3U\n"), Sniff::Playlist);
        assert_eq!(sniff_proxy_error(br#"{"contents": "x"}"#), Sniff::Playlist);
        assert_eq!(sniff_proxy_error(b"{not json at all"), Sniff::Playlist);
    }

    #[tokio::test]
    async fn test_streaming_open_through_proxy() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/raw"))
            .and(query_param("url", "http://origin/list.m3u"))
            .respond_with(ResponseTemplate::new(200).set_body_string(SAMPLE))
            .mount(&mock_server)
            .await;

        let source = source(&format!("{}/raw", mock_server.uri()), FetchMode::Streaming, 1024 * 1024);
        let body = source.open("http://origin/list.m3u").await.unwrap();
        assert!(matches!(body, PlaylistBody::Chunks(_)));
        assert_eq!(collect(body).await.unwrap(), SAMPLE.as_bytes());
    }

    #[tokio::test]
    async fn test_whole_open_direct() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/list.m3u"))
            .respond_with(ResponseTemplate::new(200).set_body_string(SAMPLE))
            .mount(&mock_server)
            .await;

        let source = source("", FetchMode::Whole, 1024 * 1024);
        let body = source
            .open(&format!("{}/list.m3u", mock_server.uri()))
            .await
            .unwrap();
        match body {
            PlaylistBody::Whole(text) => assert_eq!(text, SAMPLE),
            other => panic!("expected whole body, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_error_status_is_fetch_failed() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        for mode in [FetchMode::Whole, FetchMode::Streaming] {
            let url = format!("{}/missing.m3u", mock_server.uri());
            let err = source("", mode, 1024 * 1024).open(&url).await.unwrap_err();
            match &err {
                SourceError::FetchFailed { url: failed, .. } => assert_eq!(failed, &url),
            }
            assert!(matches!(cause(err), FetchCause::Status(404)));
        }
    }

    #[tokio::test]
    async fn test_declared_length_over_limit_is_rejected() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(SAMPLE))
            .mount(&mock_server)
            .await;

        let err = source("", FetchMode::Streaming, 16)
            .open(&format!("{}/list.m3u", mock_server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(cause(err), FetchCause::TooLarge(len) if len == SAMPLE.len() as u64));
    }

    #[tokio::test]
    async fn test_streamed_bytes_over_limit_fail_mid_stream() {
        let url = serve_chunked(
            vec![&b"#EXTM3U\n#EXTINF:-1,A\n"[..], &b"http://a/1\n#EXTINF:-1,B\n"[..], &b"http://b/2\n"[..]],
            Duration::from_millis(20),
        )
        .await;

        let body = source("", FetchMode::Streaming, 30).open(&url).await.unwrap();
        let PlaylistBody::Chunks(mut chunks) = body else {
            panic!("expected chunked body");
        };
        let mut delivered = Vec::new();
        let err = loop {
            match chunks.next().await {
                Some(Ok(chunk)) => delivered.extend_from_slice(&chunk),
                Some(Err(e)) => break e,
                None => panic!("stream ended without exceeding the limit"),
            }
        };
        assert!(delivered.len() <= 30);
        assert!(b"#EXTM3U\n#EXTINF:-1,A\nhttp://a/1\n".starts_with(&delivered));
        assert!(matches!(cause(err), FetchCause::TooLarge(n) if n > 30));
    }

    #[tokio::test]
    async fn test_proxy_error_body_rejected_in_both_modes() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"error": "upstream timeout"}"#))
            .mount(&mock_server)
            .await;
        let proxy = format!("{}/raw", mock_server.uri());

        let err = source(&proxy, FetchMode::Whole, 1024)
            .open("http://origin/list.m3u")
            .await
            .unwrap_err();
        assert!(matches!(cause(err), FetchCause::ProxyBody(m) if m == "upstream timeout"));

        let body = source(&proxy, FetchMode::Streaming, 1024)
            .open("http://origin/list.m3u")
            .await
            .unwrap();
        let err = collect(body).await.unwrap_err();
        assert!(matches!(cause(err), FetchCause::ProxyBody(m) if m == "upstream timeout"));
    }

    #[tokio::test]
    async fn test_proxy_error_split_across_chunks_is_detected() {
        let url = serve_chunked(
            vec![&b"{\"err"[..], &b"or\": \"upstream "[..], &b"timeout\"}"[..]],
            Duration::from_millis(20),
        )
        .await;

        let body = source("", FetchMode::Streaming, 1024).open(&url).await.unwrap();
        let PlaylistBody::Chunks(mut chunks) = body else {
            panic!("expected chunked body");
        };
        let err = chunks.next().await.unwrap().unwrap_err();
        assert!(matches!(cause(err), FetchCause::ProxyBody(m) if m == "upstream timeout"));
    }

    #[tokio::test]
    async fn test_split_playlist_chunks_pass_through_unchanged() {
        let url = serve_chunked(
            vec![&b"#EXTM3U\n#EXTINF:-1,Al"[..], &b"pha\nhttp://a/1\n"[..]],
            Duration::from_millis(20),
        )
        .await;

        let body = source("", FetchMode::Streaming, 1024).open(&url).await.unwrap();
        assert_eq!(
            collect(body).await.unwrap(),
            b"#EXTM3U\n#EXTINF:-1,Alpha\nhttp://a/1\n"
        );
    }
}
