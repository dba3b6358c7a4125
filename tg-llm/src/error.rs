use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LlmError>;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("unexpected response format: {0}")]
    ResponseFormat(String),

    #[error("api error: {0}")]
    Api(ApiFailure),

    #[error("request failed after {attempts} attempt(s): {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("request cancelled")]
    Cancelled,
}

impl From<serde_json::Error> for LlmError {
    fn from(e: serde_json::Error) -> Self {
        Self::ResponseFormat(e.to_string())
    }
}

/// Transport-level failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The upstream answered with an error payload or status.
    Api,
    /// Internal client plumbing failed (connection reset, DNS, TLS).
    Connection,
    /// The request timed out before any status was received.
    Timeout,
}

/// A failed upstream call, as seen by the retry classifier.
///
/// Header names are stored lower-cased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiFailure {
    pub kind: FailureKind,
    pub status: Option<u16>,
    pub message: Option<String>,
    pub headers: HashMap<String, String>,
}

impl ApiFailure {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Api,
            status: Some(status),
            message: Some(message.into()),
            headers: HashMap::new(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Connection,
            status: None,
            message: Some(message.into()),
            headers: HashMap::new(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Timeout,
            status: None,
            message: Some(message.into()),
            headers: HashMap::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

impl fmt::Display for ApiFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.status, self.message.as_deref()) {
            (Some(status), Some(message)) => write!(f, "status={status} {message}"),
            (Some(status), None) => write!(f, "status={status}"),
            (None, Some(message)) => write!(f, "{message}"),
            (None, None) => write!(f, "{:?} failure", self.kind),
        }
    }
}

impl From<reqwest::Error> for ApiFailure {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Self::timeout(e.to_string());
        }
        match e.status() {
            Some(status) => Self::api(status.as_u16(), e.to_string()),
            None => Self::connection(e.to_string()),
        }
    }
}
