//! Crate-wide error type.
//!
//! TAXONOMY
//! ========
//! - Transport: socket or HTTP layer failed, or a body was not valid JSON.
//!   Fatal to the current attempt, never retried here.
//! - Protocol violation: a well-formed response that is semantically wrong.
//! - HTTP status: non-2xx responses, split by class so callers can pick a
//!   retry policy. Each carries code, status text and the raw body.
//!
//! Rate limiting is not represented: the limiter absorbs 429s and only the
//! final response (possibly a second 429) reaches callers as `Client`.

use crate::config::ConfigError;

/// Status line and body of a non-success HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpFailure {
    pub code: u16,
    pub status: String,
    pub body: String,
}

impl std::fmt::Display for HttpFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HTTP {} {}: {}", self.code, self.status, self.body)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("websocket failed: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("malformed response body: {0}")]
    MalformedBody(#[from] serde_json::Error),
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("redirect response: {0}")]
    Redirect(HttpFailure),
    #[error("client error: {0}")]
    Client(HttpFailure),
    #[error("server error: {0}")]
    Server(HttpFailure),
    #[error("unexpected response: {0}")]
    UnexpectedStatus(HttpFailure),
    #[error("gateway not connected")]
    NotConnected,
    #[error("gateway already connected")]
    AlreadyConnected,
    #[error("gateway closed")]
    Closed,
    #[error("invalid config: {0}")]
    Config(#[from] ConfigError),
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

impl Error {
    /// Classify a non-2xx response by status class.
    #[must_use]
    pub fn from_status(failure: HttpFailure) -> Self {
        match failure.code {
            300..=399 => Self::Redirect(failure),
            400..=499 => Self::Client(failure),
            500..=599 => Self::Server(failure),
            _ => Self::UnexpectedStatus(failure),
        }
    }

    /// HTTP status code, for errors produced by a response.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Redirect(f) | Self::Client(f) | Self::Server(f) | Self::UnexpectedStatus(f) => {
                Some(f.code)
            }
            _ => None,
        }
    }

    /// True for transport-layer failures.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Http(_) | Self::WebSocket(_) | Self::MalformedBody(_))
    }
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
