//! Failure taxonomy used for every retry decision

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CommonError;

/// Closed set of failure categories
///
/// Every failure of a protected operation is reduced to exactly one of these
/// before the executor decides whether to retry. The category selects the
/// retry budget and the base delay from the active
/// [`RetryPolicy`](super::RetryPolicy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Connection refused/reset, DNS and other transport failures
    Network,
    /// The dependency did not answer in time
    Timeout,
    /// The dependency is throttling us (HTTP 429)
    RateLimit,
    /// Credentials were rejected (HTTP 401/403)
    Auth,
    /// The dependency failed internally (HTTP 5xx)
    ServerError,
    /// The request itself is wrong (HTTP 4xx other than 401/403/408/429)
    ClientError,
    /// The embedding or model service failed
    Embedding,
    /// The graph database or its driver failed
    Database,
    /// Nothing matched
    Unknown,
}

impl ErrorCategory {
    /// All categories, in classification priority order
    pub const ALL: [ErrorCategory; 9] = [
        ErrorCategory::Network,
        ErrorCategory::Timeout,
        ErrorCategory::RateLimit,
        ErrorCategory::Auth,
        ErrorCategory::ServerError,
        ErrorCategory::ClientError,
        ErrorCategory::Embedding,
        ErrorCategory::Database,
        ErrorCategory::Unknown,
    ];

    /// Stable snake_case name, as used in logs, metrics and config files
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::RateLimit => "rate_limit",
            Self::Auth => "auth",
            Self::ServerError => "server_error",
            Self::ClientError => "client_error",
            Self::Embedding => "embedding",
            Self::Database => "database",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCategory {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|category| category.as_str() == normalized).ok_or_else(|| {
            CommonError::validation_with_value("error_category", "unknown error category", s)
        })
    }
}
