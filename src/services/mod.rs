pub mod imagegen;
pub mod prompts;
pub mod vision;

/// Whether a failed API call is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// Timeouts, rate limits, 5xx. Likely to succeed on retry.
    Transient,
    /// Bad requests, auth failures, unparseable responses. Retry will not help.
    Permanent,
}

/// Failure from the vision or generation service. The clients classify;
/// the pipeline decides what to do about it.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl ApiError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Transient,
            status: None,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Permanent,
            status: None,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ApiErrorKind::Transient
    }

    /// Classify a non-2xx response. 429 and 5xx are transient; any other
    /// 4xx is permanent.
    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        let kind = if status.as_u16() == 429 || status.is_server_error() {
            ApiErrorKind::Transient
        } else {
            ApiErrorKind::Permanent
        };
        Self {
            kind,
            status: Some(status.as_u16()),
            message: format!("HTTP {}: {}", status.as_u16(), truncate(&body, 500)),
        }
    }

    /// Classify a transport-level failure. Timeouts and connection errors
    /// are transient; body-decode failures are permanent.
    pub fn from_transport(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() || err.is_connect() || err.is_request() {
            ApiErrorKind::Transient
        } else {
            ApiErrorKind::Permanent
        };
        Self {
            kind,
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
