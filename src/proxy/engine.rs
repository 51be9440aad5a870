use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::Body,
    extract::{Path, Request, State},
    http::{header, HeaderMap, HeaderName, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, post},
    Json, Router,
};
use bytes::Bytes;
use http_body_util::BodyExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::codec;
use crate::config::{Config, ServerConfig};
use crate::error::{GatewayError, Result as GatewayResult, INVALID_TOKEN_PAGE};
use crate::fetch::{DirectFetcher, FetchRequest, FetchResponse, StealthFetcher};
use crate::guard::{BlockList, SsrfGuard};
use crate::rewrite::{rewrite_css, rewrite_html};
use super::cache::AssetCache;

/// Response headers never forwarded back to the client. Hop-by-hop and
/// framing headers are stale after buffering; the security headers would
/// break the injected script or the embedding frame.
const STRIPPED_RESPONSE_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "content-length",
    "content-encoding",
    "content-security-policy",
    "content-security-policy-report-only",
    "x-frame-options",
    // a surviving location would hand the client an unproxied navigation
    // target; resolvable redirects are re-encoded before passthrough runs
    "location",
];

/// The request handler tying codec, guard, cache, fetchers, and rewriters
/// together. One instance serves all requests; per-request state lives on the
/// stack of `handle`.
pub struct ProxyGateway {
    config: Arc<Config>,
    guard: SsrfGuard,
    cache: Arc<AssetCache>,
    direct: DirectFetcher,
    stealth: Arc<StealthFetcher>,
}

#[derive(Clone)]
struct AppState {
    gateway: Arc<ProxyGateway>,
}

#[derive(Debug, Deserialize)]
struct EncodeRequest {
    url: String,
}

#[derive(Debug, Serialize)]
struct EncodeResponse {
    token: String,
}

impl ProxyGateway {
    pub fn new(config: Arc<Config>, block_list: Arc<dyn BlockList>) -> Result<Self> {
        let direct = DirectFetcher::new(&config.gateway.fetch)?;
        let stealth = Arc::new(StealthFetcher::new(
            &config.gateway.stealth,
            &config.gateway.fetch.user_agents[0],
        ));
        let cache = Arc::new(AssetCache::new(&config.gateway.cache));

        Ok(Self {
            config,
            guard: SsrfGuard::new(block_list),
            cache,
            direct,
            stealth,
        })
    }

    /// Start the gateway server; runs until the listener fails.
    pub async fn start(self: Arc<Self>, server_config: &ServerConfig) -> GatewayResult<()> {
        self.cache.spawn_sweeper();

        let app = Router::new()
            .route("/api/encode", post(encode_handler))
            .route("/proxy", any(missing_token_handler))
            .route("/proxy/", any(missing_token_handler))
            .route("/proxy/*path", any(proxy_handler))
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(CorsLayer::permissive())
                    .into_inner(),
            )
            .with_state(AppState { gateway: self.clone() });

        let addr = format!("{}:{}", server_config.host, server_config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| GatewayError::Internal(format!("Failed to bind to {}: {}", addr, e)))?;

        info!("gateway listening on {}", addr);

        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .map_err(|e| GatewayError::Internal(format!("Server error: {}", e)))?;

        Ok(())
    }

    /// The per-request state machine: decode, validate, cache check, fetch,
    /// redirect check, content branch, respond.
    #[instrument(
        skip(self, req),
        fields(request_id = tracing::field::Empty, target = tracing::field::Empty)
    )]
    pub async fn handle(&self, path: &str, req: Request) -> GatewayResult<Response> {
        let request_id = Uuid::new_v4().to_string();
        tracing::Span::current().record("request_id", request_id.as_str());

        let (token, residual) = split_token(path);
        let decoded = codec::decode(token).ok_or(GatewayError::InvalidToken)?;
        let target = assemble_target(&decoded, residual, req.uri().query());
        tracing::Span::current().record("target", target.as_str());

        if !self.guard.is_allowed(&target) {
            return Err(GatewayError::BlockedTarget(target));
        }

        let (parts, body) = req.into_parts();
        let body_bytes = body
            .collect()
            .await
            .map_err(|e| GatewayError::Internal(format!("Failed to read request body: {}", e)))?
            .to_bytes();

        let is_get = parts.method == Method::GET;
        let cacheable = is_get && AssetCache::is_cacheable_url(&target);

        if cacheable {
            if let Some(hit) = self.cache.get(&target) {
                debug!(%target, "serving cached asset");
                return Ok(cached_response(hit));
            }
        }

        let fetch_request = FetchRequest {
            method: parts.method.clone(),
            url: target.clone(),
            headers: parts.headers.clone(),
            body: body_bytes,
        };

        let response = self.fetch(&fetch_request, is_get).await?;

        if let Some(redirect) = self.check_redirect(&target, &response)? {
            return Ok(redirect);
        }

        self.respond(&target, response, cacheable)
    }

    /// Content branch: HTML and CSS are rewritten, everything else passes
    /// through byte-identical.
    fn respond(
        &self,
        target: &str,
        response: FetchResponse,
        cacheable: bool,
    ) -> GatewayResult<Response> {
        let content_type = response.content_type();
        if content_type.contains("text/html") {
            return self.respond_html(target, response);
        }
        if content_type.contains("text/css") {
            return self.respond_css(target, response, cacheable);
        }

        if cacheable && response.status == 200 {
            self.cache
                .put(target, response.body.clone(), &content_type);
        }
        Ok(passthrough_response(response))
    }

    /// Stealth for listed hostnames, direct for everything else. A stealth
    /// failure degrades to the direct path instead of failing the request.
    async fn fetch(&self, request: &FetchRequest, is_get: bool) -> GatewayResult<FetchResponse> {
        if is_get && self.needs_stealth(&request.url) {
            match self.stealth.fetch(&request.url).await {
                Ok(page) => {
                    let mut headers = HeaderMap::new();
                    headers.insert(
                        header::CONTENT_TYPE,
                        header::HeaderValue::from_static("text/html; charset=utf-8"),
                    );
                    return Ok(FetchResponse {
                        status: page.status,
                        headers,
                        body: Bytes::from(page.html),
                    });
                }
                Err(e) => {
                    warn!(url = %request.url, error = %e, "stealth fetch failed, falling back to direct");
                }
            }
        }
        self.direct.fetch(request).await
    }

    fn needs_stealth(&self, url: &str) -> bool {
        let Some(host) = Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        else {
            return false;
        };
        self.config
            .gateway
            .stealth_hosts
            .iter()
            .any(|h| host == *h || host.ends_with(&format!(".{h}")))
    }

    /// 3xx responses are handed back to the client as redirects pointing at
    /// the re-encoded target. Redirect locations are attacker-influenced, so
    /// they go through the same validation as the original request.
    fn check_redirect(
        &self,
        target: &str,
        response: &FetchResponse,
    ) -> GatewayResult<Option<Response>> {
        if !(300..400).contains(&response.status) || response.status == 304 {
            return Ok(None);
        }
        let Some(location) = response
            .headers
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
        else {
            return Ok(None);
        };

        let base = Url::parse(target)
            .map_err(|_| GatewayError::Internal(format!("unparsable target: {target}")))?;
        let Some(next) = crate::resolve::resolve(location, &base) else {
            return Ok(None);
        };
        if !self.guard.is_allowed(&next) {
            return Err(GatewayError::BlockedTarget(next));
        }

        debug!(from = target, to = %next, status = response.status, "rewriting redirect");
        let response = Response::builder()
            .status(StatusCode::from_u16(response.status).unwrap_or(StatusCode::FOUND))
            .header(header::LOCATION, format!("/proxy/{}", codec::encode(&next)))
            .body(Body::empty())
            .map_err(|e| GatewayError::Internal(e.to_string()))?;
        Ok(Some(response))
    }

    fn respond_html(&self, target: &str, response: FetchResponse) -> GatewayResult<Response> {
        let base = Url::parse(target)
            .map_err(|_| GatewayError::Internal(format!("unparsable target: {target}")))?;
        let html = String::from_utf8_lossy(&response.body);
        let rewritten = rewrite_html(&html, &base);

        // Charset ambiguity upstream is irrelevant: the rewritten body is
        // UTF-8 by construction.
        Response::builder()
            .status(StatusCode::from_u16(response.status).unwrap_or(StatusCode::OK))
            .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
            .header("X-Cache", "MISS")
            .body(Body::from(rewritten))
            .map_err(|e| GatewayError::Internal(e.to_string()))
    }

    fn respond_css(
        &self,
        target: &str,
        response: FetchResponse,
        cacheable: bool,
    ) -> GatewayResult<Response> {
        let base = Url::parse(target)
            .map_err(|_| GatewayError::Internal(format!("unparsable target: {target}")))?;
        let css = String::from_utf8_lossy(&response.body);
        let rewritten = Bytes::from(rewrite_css(&css, &base));

        if cacheable && response.status == 200 {
            // Cached rewritten: the key is the absolute target, and the
            // rewrite is deterministic for it.
            self.cache.put(target, rewritten.clone(), "text/css");
        }

        Response::builder()
            .status(StatusCode::from_u16(response.status).unwrap_or(StatusCode::OK))
            .header(header::CONTENT_TYPE, "text/css; charset=utf-8")
            .header("X-Cache", "MISS")
            .body(Body::from(rewritten))
            .map_err(|e| GatewayError::Internal(e.to_string()))
    }
}

/// First path segment is the token; the rest rides along to the target.
fn split_token(path: &str) -> (&str, &str) {
    match path.split_once('/') {
        Some((token, residual)) => (token, residual),
        None => (path, ""),
    }
}

/// Rebuild the full upstream URL from decoded token, residual path segments,
/// and the inbound query string. The residual extends the path component, so
/// a query already baked into the token stays behind it.
fn assemble_target(decoded: &str, residual: &str, query: Option<&str>) -> String {
    let mut target = if residual.is_empty() {
        decoded.to_string()
    } else if let Ok(mut url) = Url::parse(decoded) {
        let mut path = url.path().to_string();
        if !path.ends_with('/') {
            path.push('/');
        }
        path.push_str(residual);
        url.set_path(&path);
        url.to_string()
    } else {
        // the guard rejects unparsable targets right after this
        decoded.to_string()
    };
    if let Some(query) = query {
        target.push(if target.contains('?') { '&' } else { '?' });
        target.push_str(query);
    }
    target
}

fn cached_response(hit: super::cache::CachedAsset) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, hit.content_type)
        .header("X-Cache", "HIT")
        .body(Body::from(hit.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn passthrough_response(response: FetchResponse) -> Response {
    let mut builder = Response::builder()
        .status(StatusCode::from_u16(response.status).unwrap_or(StatusCode::OK));

    for (name, value) in response.headers.iter() {
        if !is_stripped_response_header(name) {
            builder = builder.header(name.as_str(), value.as_bytes());
        }
    }

    builder
        .header("X-Cache", "MISS")
        .body(Body::from(response.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn is_stripped_response_header(name: &HeaderName) -> bool {
    STRIPPED_RESPONSE_HEADERS.contains(&name.as_str())
}

async fn proxy_handler(
    State(state): State<AppState>,
    Path(path): Path<String>,
    req: Request,
) -> Response {
    match state.gateway.handle(&path, req).await {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "proxy request failed");
            e.into_response()
        }
    }
}

async fn missing_token_handler() -> Response {
    (
        StatusCode::BAD_REQUEST,
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        INVALID_TOKEN_PAGE,
    )
        .into_response()
}

/// Token mint for collaborator features; keeps the cipher in one place.
async fn encode_handler(Json(body): Json<EncodeRequest>) -> Response {
    let valid = Url::parse(&body.url)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false);

    if !valid {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "url must be absolute http(s)" })),
        )
            .into_response();
    }

    Json(EncodeResponse {
        token: codec::encode(&body.url),
    })
    .into_response()
}
