//! Upstream error taxonomy.
//!
//! `ApiError::is_transient` is the single classification predicate in the
//! system; retry policies, scheduler audit rows, and user-facing messages
//! all branch on it. URLs are redacted before they are attached.

use galley_config::redact_url;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network-class failures, 429, 502/503/504, pool timeouts. Retryable.
    Transient,
    /// 4xx (except 429), malformed payloads, validation failures. Not
    /// retryable.
    Permanent,
    /// Unclassifiable — gets one silent retry, then counts as permanent.
    Unknown,
}

#[derive(Debug, Clone)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub status: Option<u16>,
    pub message: String,
    /// Redacted upstream URL, when known.
    pub url: Option<String>,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            status: None,
            message: message.into(),
            url: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Permanent,
            status: None,
            message: message.into(),
            url: None,
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Unknown,
            status: None,
            message: message.into(),
            url: None,
        }
    }

    /// Classify an HTTP status code per the project-wide policy.
    pub fn from_status(status: u16, url: &str) -> Self {
        let kind = match status {
            429 | 502 | 503 | 504 => ErrorKind::Transient,
            s if (500..600).contains(&s) => ErrorKind::Transient,
            s if (400..500).contains(&s) => ErrorKind::Permanent,
            _ => ErrorKind::Unknown,
        };
        Self {
            kind,
            status: Some(status),
            message: format!("upstream returned HTTP {status}"),
            url: Some(redact_url(url)),
        }
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.url = Some(redact_url(url));
        self
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ErrorKind::Transient
    }

    pub fn status_is(&self, code: u16) -> bool {
        self.status == Some(code)
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() || err.is_connect() {
            ErrorKind::Transient
        } else if err.is_decode() || err.is_builder() {
            ErrorKind::Permanent
        } else if err.is_request() {
            // Connection-reset and protocol errors surface here.
            ErrorKind::Transient
        } else {
            ErrorKind::Unknown
        };

        let url = err.url().map(|u| redact_url(u.as_str()));
        Self {
            kind,
            status: err.status().map(|s| s.as_u16()),
            // reqwest's Display includes the URL; keep only the class.
            message: format!("http transport error: {}", err.without_url()),
            url,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.status, &self.url) {
            (Some(s), Some(u)) => write!(f, "{} (HTTP {s}, {u})", self.message),
            (Some(s), None) => write!(f, "{} (HTTP {s})", self.message),
            (None, Some(u)) => write!(f, "{} ({u})", self.message),
            (None, None) => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ApiError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_xx_and_429_are_transient() {
        for s in [429u16, 500, 502, 503, 504] {
            assert!(ApiError::from_status(s, "http://x/y").is_transient(), "{s}");
        }
    }

    #[test]
    fn other_four_xx_are_permanent() {
        for s in [400u16, 401, 403, 404, 422] {
            let e = ApiError::from_status(s, "http://x/y");
            assert_eq!(e.kind, ErrorKind::Permanent, "{s}");
        }
    }

    #[test]
    fn url_is_redacted_on_attachment() {
        let e = ApiError::from_status(500, "http://pos/api?key=verysecret");
        assert!(e.url.as_deref().unwrap().contains("key=***"));
        assert!(!e.to_string().contains("verysecret"));
    }
}
