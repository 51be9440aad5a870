pub mod direct;
pub mod stealth;

pub use direct::DirectFetcher;
pub use stealth::StealthFetcher;

use axum::http::{HeaderMap, Method};
use bytes::Bytes;

/// Outbound request handed to a fetcher: the decoded absolute target plus
/// whatever the client sent us.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// What came back from upstream, already fully buffered and decompressed.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl FetchResponse {
    pub fn content_type(&self) -> String {
        self.headers
            .get(axum::http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase()
    }
}
