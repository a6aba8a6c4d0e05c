//! Database repositories
//!
//! Data access functions, kept apart from the controller logic.

pub mod playlists;
