use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use axum::http::{header, HeaderMap};
use bytes::BytesMut;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::config::FetchConfig;
use crate::error::GatewayError;
use super::{FetchRequest, FetchResponse};

/// Headers we never forward upstream; either hop-by-hop or replaced with our
/// own spoofed values.
const STRIPPED_REQUEST_HEADERS: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "content-length",
    "accept-encoding",
    "user-agent",
    "referer",
    "origin",
];

/// Pooled outbound HTTP fetcher with browser-like request shaping.
///
/// 4xx/5xx responses are returned, not raised; only network and timeout
/// failures become errors. Redirects are never followed here so the
/// orchestrator can validate and re-encode every hop itself.
pub struct DirectFetcher {
    client: reqwest::Client,
    config: FetchConfig,
    ua_cursor: AtomicUsize,
}

impl DirectFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            client,
            config: config.clone(),
            ua_cursor: AtomicUsize::new(0),
        })
    }

    /// Next user agent from the rotation pool.
    pub fn next_user_agent(&self) -> &str {
        let idx = self.ua_cursor.fetch_add(1, Ordering::Relaxed);
        &self.config.user_agents[idx % self.config.user_agents.len()]
    }

    pub async fn fetch(&self, request: &FetchRequest) -> crate::error::Result<FetchResponse> {
        let response = self.send(request, false).await?;

        if self.config.retry.enabled && looks_like_block_page(&response, &self.config.retry) {
            debug!(url = %request.url, status = response.status, "block page suspected, retrying with alternate profile");
            match self.send(request, true).await {
                Ok(retried) => return Ok(retried),
                Err(e) => {
                    warn!(url = %request.url, error = %e, "alternate-profile retry failed, keeping first response");
                    return Ok(response);
                }
            }
        }

        Ok(response)
    }

    async fn send(
        &self,
        request: &FetchRequest,
        alternate_profile: bool,
    ) -> crate::error::Result<FetchResponse> {
        let origin = target_origin(&request.url);

        let mut builder = self
            .client
            .request(request.method.clone(), &request.url);

        for (name, value) in request.headers.iter() {
            if !STRIPPED_REQUEST_HEADERS.contains(&name.as_str()) {
                builder = builder.header(name.as_str(), value.as_bytes());
            }
        }

        builder = builder
            .header(header::USER_AGENT, self.next_user_agent())
            .header(
                header::ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
            )
            .header(header::ACCEPT_LANGUAGE, "en-US,en;q=0.9");

        if let Some(origin) = &origin {
            builder = builder
                .header(header::REFERER, format!("{origin}/"))
                .header(header::ORIGIN, origin.as_str());
        }

        if alternate_profile {
            builder = builder
                .header("Sec-Fetch-Dest", "document")
                .header("Sec-Fetch-Mode", "navigate")
                .header("Sec-Fetch-Site", "none")
                .header("Sec-Fetch-User", "?1")
                .header("Upgrade-Insecure-Requests", "1")
                .header(header::COOKIE, format!("sid={}", Uuid::new_v4().simple()));
        }

        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::FetchTimeout(request.url.clone())
            } else {
                GatewayError::Fetch(format!("{}: {}", request.url, e))
            }
        })?;

        let status = response.status().as_u16();
        let headers: HeaderMap = response.headers().clone();
        let body = self.read_capped(response, &request.url).await?;

        Ok(FetchResponse {
            status,
            headers,
            body,
        })
    }

    /// Buffer the response body under the hard size cap.
    async fn read_capped(
        &self,
        mut response: reqwest::Response,
        url: &str,
    ) -> crate::error::Result<bytes::Bytes> {
        let cap = self.config.max_response_bytes;
        let mut buf = BytesMut::new();

        loop {
            let chunk = response.chunk().await.map_err(|e| {
                if e.is_timeout() {
                    GatewayError::FetchTimeout(url.to_string())
                } else {
                    GatewayError::Fetch(format!("{}: body read failed: {}", url, e))
                }
            })?;
            let Some(chunk) = chunk else { break };
            if buf.len() + chunk.len() > cap {
                return Err(GatewayError::Fetch(format!(
                    "{}: response exceeds {} byte cap",
                    url, cap
                )));
            }
            buf.extend_from_slice(&chunk);
        }

        Ok(buf.freeze())
    }
}

fn target_origin(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    match parsed.port() {
        Some(port) => Some(format!("{}://{}:{}", parsed.scheme(), host, port)),
        None => Some(format!("{}://{}", parsed.scheme(), host)),
    }
}

/// The retry-on-block heuristic: 403/404 outright, or any 4xx whose body is
/// implausibly small and carries block-indicative text. Thresholds come from
/// config; this is sniffing, not a contract.
fn looks_like_block_page(response: &FetchResponse, retry: &crate::config::RetryConfig) -> bool {
    if response.status == 403 || response.status == 404 {
        return true;
    }
    if !(400..500).contains(&response.status) {
        return false;
    }
    if response.body.len() >= retry.max_body_bytes {
        return false;
    }
    let body = String::from_utf8_lossy(&response.body).to_ascii_lowercase();
    retry.markers.iter().any(|m| body.contains(&m.to_ascii_lowercase()))
}
