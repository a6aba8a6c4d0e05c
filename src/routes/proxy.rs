use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::Response,
};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::routes::{api_error, ApiError};
use crate::services::source::validate_target;
use crate::AppState;

// Re-export reqwest header module to avoid version conflicts
mod reqwest_header {
    pub use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE, ETAG, LAST_MODIFIED};
}

/// Query parameters for the raw proxy
#[derive(Deserialize)]
pub struct RawProxyQuery {
    pub url: String,
}

/// Guess content type from URL
fn guess_content_type(url: &str) -> &'static str {
    let lower = url.to_lowercase();
    if lower.contains(".m3u8") {
        "application/vnd.apple.mpegurl"
    } else if lower.contains(".m3u") {
        "audio/x-mpegurl"
    } else if lower.contains(".json") {
        "application/json"
    } else {
        "text/plain; charset=utf-8"
    }
}

/// Copy a header from the upstream response if it is representable
fn forward_header(
    upstream: &reqwest::header::HeaderMap,
    from: reqwest::header::HeaderName,
    to: header::HeaderName,
    out: &mut HeaderMap,
) {
    if let Some(value) = upstream.get(from).and_then(|v| v.to_str().ok()) {
        if let Ok(parsed) = HeaderValue::from_str(value) {
            out.insert(to, parsed);
        }
    }
}

fn upstream_error(url: &str, status: StatusCode, detail: String) -> ApiError {
    tracing::error!("Raw proxy error for {}: {}", url, detail);
    (
        status,
        axum::Json(serde_json::json!({
            "error": "Upstream fetch failed",
            "detail": detail
        })),
    )
}

/// Send the upstream request. Connecting and receiving the response headers
/// are time-bounded; the body stream is not.
async fn open_upstream(config: &Config, url: &str, accept: &str) -> Result<reqwest::Response, ApiError> {
    let client = Client::builder()
        .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
        .user_agent(&config.user_agent)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(|e| {
            tracing::error!("Failed to create HTTP client: {}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        })?;

    let request = client.get(url).header(reqwest_header::ACCEPT, accept).send();

    match tokio::time::timeout(Duration::from_millis(config.raw_proxy_timeout_ms), request).await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(e)) => {
            let status = if e.is_timeout() {
                StatusCode::GATEWAY_TIMEOUT
            } else {
                StatusCode::BAD_GATEWAY
            };
            Err(upstream_error(url, status, e.to_string()))
        }
        Err(_) => Err(upstream_error(
            url,
            StatusCode::GATEWAY_TIMEOUT,
            format!("no response headers within {}ms", config.raw_proxy_timeout_ms),
        )),
    }
}

/// GET /api/proxy/raw?url=<encoded>
/// Pass-through fetch of a remote document with permissive CORS, so the
/// playlist source can use this server as its relay. The body is streamed,
/// never buffered.
pub async fn raw_proxy(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RawProxyQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    validate_target(&query.url)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Invalid url parameter: {}", e)))?;

    let accept = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("*/*");

    let upstream_response = open_upstream(&state.config, &query.url, accept).await?;

    let upstream_status = upstream_response.status();
    let upstream_headers = upstream_response.headers();

    let mut response_headers = HeaderMap::new();
    let content_type = upstream_headers
        .get(reqwest_header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| HeaderValue::from_str(v).ok())
        .unwrap_or_else(|| HeaderValue::from_static(guess_content_type(&query.url)));
    response_headers.insert(header::CONTENT_TYPE, content_type);
    response_headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response_headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response_headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static("Content-Length, Content-Type"),
    );

    forward_header(upstream_headers, reqwest_header::CONTENT_LENGTH, header::CONTENT_LENGTH, &mut response_headers);
    forward_header(upstream_headers, reqwest_header::ETAG, header::ETAG, &mut response_headers);
    forward_header(upstream_headers, reqwest_header::LAST_MODIFIED, header::LAST_MODIFIED, &mut response_headers);

    let status = StatusCode::from_u16(upstream_status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let body = Body::from_stream(upstream_response.bytes_stream());

    let mut response = Response::builder().status(status);
    for (key, value) in response_headers.iter() {
        response = response.header(key, value);
    }

    response.body(body).map_err(|e| {
        tracing::error!("Failed to build response: {}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
    })
}
