pub mod cache;
pub mod controller;
pub mod feed;
pub mod m3u_parser;
pub mod metrics;
pub mod publisher;
pub mod redis;
pub mod source;
