use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_ENCODING};
use reqwest::Client;

use crate::core::error::ModError;

pub const APP_USER_AGENT: &str = concat!("AmethystMods/", env!("CARGO_PKG_VERSION"));

/// Shared client for registry and download traffic.
///
/// `connect_timeout` bounds the handshake only; each request sets its own
/// overall timeout so large downloads can be given more room than API calls.
pub fn build_http_client(connect_timeout: Duration) -> Result<Client, reqwest::Error> {
    let mut default_headers = HeaderMap::new();
    default_headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));

    Client::builder()
        .user_agent(APP_USER_AGENT)
        .default_headers(default_headers)
        .connect_timeout(connect_timeout)
        .build()
}

/// Classify a transport error, keeping timeouts distinguishable.
pub fn map_request_error(url: &str, error: reqwest::Error) -> ModError {
    if error.is_timeout() {
        ModError::Timeout(url.to_string())
    } else {
        ModError::Http(error)
    }
}
