//! HTTP handlers

pub mod channels;
pub mod health;
pub mod playlists;
pub mod proxy;

use axum::{
    http::{HeaderMap, StatusCode},
    Json,
};

use crate::AppState;

/// Header carrying the admin key
pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// Error shape returned by every handler
pub type ApiError = (StatusCode, Json<serde_json::Value>);

pub fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(serde_json::json!({ "error": message.into() })))
}

/// Reject the request unless it carries the configured admin key.
/// When no key is configured, admin routes are open (development).
pub fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = state.config.admin_key.as_deref() else {
        return Ok(());
    };

    let provided = headers.get(ADMIN_KEY_HEADER).and_then(|v| v.to_str().ok());
    if provided == Some(expected) {
        Ok(())
    } else {
        Err(api_error(StatusCode::UNAUTHORIZED, "Invalid or missing admin key"))
    }
}
