use thiserror::Error;

/// Error kinds surfaced by the cloud API client.
///
/// `Auth` is never retried by the request wrapper; the caller has to run the
/// re-authentication flow. `Network` covers timeouts, connect failures and
/// 5xx responses and is retried with capped backoff. `Api` is everything
/// permanent: application-level returnValue errors, non-auth 4xx, malformed
/// JSON.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("api error: {0}")]
    Api(String),

    #[error("network error: {0}")]
    Network(String),
}

impl ApiError {
    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::Auth(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Network(_))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            ApiError::Network(err.to_string())
        } else if let Some(status) = err.status() {
            if status == reqwest::StatusCode::UNAUTHORIZED
                || status == reqwest::StatusCode::FORBIDDEN
            {
                ApiError::Auth(format!("HTTP {}", status))
            } else if status.is_server_error() {
                ApiError::Network(format!("HTTP {}", status))
            } else {
                ApiError::Api(format!("HTTP {}", status))
            }
        } else {
            ApiError::Network(err.to_string())
        }
    }
}
