//! Classification of upload outcomes.

use std::fmt;

use serde::Serialize;

/// Result of one upload attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UploadStatus {
    /// 2xx.
    Success { code: u16 },
    /// 3xx. Redirects are never followed.
    HttpRedirection { code: u16 },
    /// 4xx other than the ones below.
    HttpClientError { code: u16 },
    /// 408 and 429.
    HttpClientRateLimiting { code: u16 },
    /// 401 and 403.
    InvalidToken { code: u16 },
    /// 5xx.
    HttpServerError { code: u16 },
    UnknownHttpError { code: u16 },
    NetworkError,
    DnsError,
    /// The request could not even be built (bad endpoint, bad header).
    RequestCreationError,
}

impl UploadStatus {
    pub fn from_status_code(code: u16) -> Self {
        match code {
            200..=299 => UploadStatus::Success { code },
            300..=399 => UploadStatus::HttpRedirection { code },
            401 | 403 => UploadStatus::InvalidToken { code },
            408 | 429 => UploadStatus::HttpClientRateLimiting { code },
            400..=499 => UploadStatus::HttpClientError { code },
            500..=599 => UploadStatus::HttpServerError { code },
            _ => UploadStatus::UnknownHttpError { code },
        }
    }

    /// HTTP status code, when a response was received.
    pub fn code(&self) -> Option<u16> {
        match *self {
            UploadStatus::Success { code }
            | UploadStatus::HttpRedirection { code }
            | UploadStatus::HttpClientError { code }
            | UploadStatus::HttpClientRateLimiting { code }
            | UploadStatus::InvalidToken { code }
            | UploadStatus::HttpServerError { code }
            | UploadStatus::UnknownHttpError { code } => Some(code),
            UploadStatus::NetworkError
            | UploadStatus::DnsError
            | UploadStatus::RequestCreationError => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, UploadStatus::Success { .. })
    }

    /// Failures that will never succeed on retry.
    pub fn is_permanent_failure(&self) -> bool {
        matches!(
            self,
            UploadStatus::HttpClientError { .. }
                | UploadStatus::InvalidToken { .. }
                | UploadStatus::RequestCreationError
        )
    }

    pub fn should_retry(&self) -> bool {
        !self.is_success() && !self.is_permanent_failure()
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadStatus::Success { code } => write!(f, "success ({})", code),
            UploadStatus::HttpRedirection { code } => write!(f, "redirection ({})", code),
            UploadStatus::HttpClientError { code } => write!(f, "client error ({})", code),
            UploadStatus::HttpClientRateLimiting { code } => write!(f, "rate limited ({})", code),
            UploadStatus::InvalidToken { code } => write!(f, "invalid token ({})", code),
            UploadStatus::HttpServerError { code } => write!(f, "server error ({})", code),
            UploadStatus::UnknownHttpError { code } => write!(f, "unknown http error ({})", code),
            UploadStatus::NetworkError => write!(f, "network error"),
            UploadStatus::DnsError => write!(f, "dns error"),
            UploadStatus::RequestCreationError => write!(f, "request creation error"),
        }
    }
}
