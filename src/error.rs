use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Fixed error page for undecodable or missing proxy tokens.
pub const INVALID_TOKEN_PAGE: &str = "<!DOCTYPE html>\
<html><head><meta charset=\"utf-8\"><title>Invalid link</title></head>\
<body style=\"font-family:sans-serif;text-align:center;padding-top:4em\">\
<h1>Invalid proxy link</h1>\
<p>This link is malformed or has expired. Go back and try again.</p>\
</body></html>";

/// Fixed error page for targets the gateway refuses to reach.
pub const BLOCKED_TARGET_PAGE: &str = "<!DOCTYPE html>\
<html><head><meta charset=\"utf-8\"><title>Blocked</title></head>\
<body style=\"font-family:sans-serif;text-align:center;padding-top:4em\">\
<h1>This site can't be reached through the gateway</h1>\
<p>The requested address is not allowed.</p>\
</body></html>";

/// Fixed error page for upstream fetch failures.
pub const FETCH_FAILED_PAGE: &str = "<!DOCTYPE html>\
<html><head><meta charset=\"utf-8\"><title>Unable to load page</title></head>\
<body style=\"font-family:sans-serif;text-align:center;padding-top:4em\">\
<h1>Unable to load page</h1>\
<p>The site did not respond in time. Try again in a moment.</p>\
</body></html>";

/// Application-wide error types
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Invalid or missing proxy token")]
    InvalidToken,

    #[error("Blocked target: {0}")]
    BlockedTarget(String),

    #[error("Fetch timed out: {0}")]
    FetchTimeout(String),

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Stealth fetch failed: {0}")]
    Stealth(String),

    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::InvalidToken => StatusCode::BAD_REQUEST,
            GatewayError::BlockedTarget(_) => StatusCode::FORBIDDEN,
            GatewayError::FetchTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Fetch(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Stealth(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_page(&self) -> &'static str {
        match self {
            GatewayError::InvalidToken => INVALID_TOKEN_PAGE,
            GatewayError::BlockedTarget(_) => BLOCKED_TARGET_PAGE,
            _ => FETCH_FAILED_PAGE,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            self.error_page(),
        )
            .into_response()
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(
            GatewayError::InvalidToken.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::BlockedTarget("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            GatewayError::FetchTimeout("x".into()).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            GatewayError::Fetch("x".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn error_pages_are_fixed_html() {
        for page in [INVALID_TOKEN_PAGE, BLOCKED_TARGET_PAGE, FETCH_FAILED_PAGE] {
            assert!(page.starts_with("<!DOCTYPE html>"));
            assert!(page.contains("</html>"));
        }
    }
}
