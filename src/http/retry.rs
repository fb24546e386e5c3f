//! Sorting HTTP failures into ones worth another attempt and ones that are not.

use reqwest::StatusCode;
use thiserror::Error;

/// Failures that will not go away by asking again.
#[derive(Debug, Error)]
pub enum NonRetryableError {
    #[error("Authentication required for {0}")]
    AuthenticationFailed(String),
    #[error("Access to {0} is forbidden")]
    Forbidden(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Too many requests to {0}, try again later")]
    TooManyRequests(String),
    #[error("Descriptor at {0} exceeds the size limit")]
    TooLarge(String),
    #[error("HTTP {status} from {url}")]
    ClientError { status: u16, url: String },
}

/// `Some` when the failure is permanent.
pub fn classify_error(error: &reqwest::Error) -> Option<NonRetryableError> {
    let status = error.status()?;
    let url = error.url().map_or_else(|| "<unknown>".to_string(), |u| u.to_string());
    let permanent = match status {
        StatusCode::UNAUTHORIZED => NonRetryableError::AuthenticationFailed(url),
        StatusCode::FORBIDDEN => NonRetryableError::Forbidden(url),
        StatusCode::NOT_FOUND => NonRetryableError::NotFound(url),
        StatusCode::TOO_MANY_REQUESTS => NonRetryableError::TooManyRequests(url),
        s if s.is_client_error() => NonRetryableError::ClientError {
            status: s.as_u16(),
            url,
        },
        _ => return None,
    };
    Some(permanent)
}

/// Convert a failed response into an error the retry loop can inspect.
pub fn check_retryable(error: reqwest::Error) -> anyhow::Error {
    match classify_error(&error) {
        Some(permanent) => permanent.into(),
        None => error.into(),
    }
}
