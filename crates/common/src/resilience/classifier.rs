//! Reduces arbitrary failures to an [`ErrorCategory`]
//!
//! Classification runs in two layers:
//!
//! 1. **Structured signals.** The error and every error in its `source()`
//!    chain are inspected for types that carry a reliable signal: a
//!    [`StatusError`] with an HTTP status, a `std::io::Error` kind, a tokio
//!    `Elapsed` timeout and, with the `http` feature, a `reqwest::Error`.
//!    The first signal found wins.
//! 2. **Keyword heuristic.** Otherwise the lowercased messages of the whole
//!    chain are matched against fixed keyword groups, checked in this order:
//!
//! | Order | Category | Keywords |
//! |-------|----------|----------|
//! | 1 | `network` | connection, network, dns, resolve |
//! | 2 | `timeout` | timeout, timed out |
//! | 3 | `rate_limit` | rate limit, too many requests, 429 |
//! | 4 | `auth` | unauthorized, authentication, forbidden, 401, 403 |
//! | 5 | `server_error` | server error, internal server, service unavailable, bad gateway, 502, 503, 504 |
//! | 6 | `client_error` | bad request, not found, 400, 404 |
//! | 7 | `embedding` | embedding, model, openai |
//! | 8 | `database` | neo4j, database, bolt, cypher |
//!
//! The first group with a hit decides, so "connection timed out" is
//! `network`, not `timeout`. If no keyword matches, a Rust type name that
//! belongs to an HTTP client stack (`reqwest`, `hyper`) maps to `network`;
//! anything else is `unknown`.
//!
//! Classification is a pure function: the same error always yields the same
//! category.

use std::error::Error;
use std::io;

use thiserror::Error as ThisError;

use super::category::ErrorCategory;

/// Keyword groups in priority order
const KEYWORD_RULES: &[(ErrorCategory, &[&str])] = &[
    (ErrorCategory::Network, &["connection", "network", "dns", "resolve"]),
    (ErrorCategory::Timeout, &["timeout", "timed out"]),
    (ErrorCategory::RateLimit, &["rate limit", "too many requests", "429"]),
    (ErrorCategory::Auth, &["unauthorized", "authentication", "forbidden", "401", "403"]),
    (
        ErrorCategory::ServerError,
        &[
            "server error",
            "internal server",
            "service unavailable",
            "bad gateway",
            "502",
            "503",
            "504",
        ],
    ),
    (ErrorCategory::ClientError, &["bad request", "not found", "400", "404"]),
    (ErrorCategory::Embedding, &["embedding", "model", "openai"]),
    (ErrorCategory::Database, &["neo4j", "database", "bolt", "cypher"]),
];

/// Type-name fragments of HTTP client stacks whose errors are transport-level
const NETWORK_TYPE_HINTS: &[&str] = &["reqwest", "hyper"];

/// An error carrying the HTTP status returned by a dependency
///
/// Callers that talk to the graph service over HTTP should surface failed
/// responses as a `StatusError` (directly or as a `source()` of their own
/// error) so the status outranks message text during classification.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
#[error("HTTP {status}: {message}")]
pub struct StatusError {
    status: u16,
    message: String,
}

impl StatusError {
    /// Create a status error
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    /// The HTTP status code
    pub fn status(&self) -> u16 {
        self.status
    }

    /// The response message or body excerpt
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Classify a typed error
///
/// Uses the structured signals in the error chain first, then message and
/// type-name keywords. Never fails; falls back to [`ErrorCategory::Unknown`].
pub fn classify<E>(error: &E) -> ErrorCategory
where
    E: Error + 'static,
{
    classify_with_type_name(error, std::any::type_name::<E>())
}

/// Classify a type-erased error
///
/// Same as [`classify`] but without a static type name to inspect.
pub fn classify_dyn(error: &(dyn Error + 'static)) -> ErrorCategory {
    classify_with_type_name(error, "")
}

fn classify_with_type_name(error: &(dyn Error + 'static), type_name: &str) -> ErrorCategory {
    if let Some(category) = structured_category(error) {
        return category;
    }

    classify_message(&chain_message(error), type_name)
}

/// Map an HTTP status to a category
///
/// Returns `None` for statuses that do not signal failure.
pub fn classify_status(status: u16) -> Option<ErrorCategory> {
    match status {
        408 => Some(ErrorCategory::Timeout),
        429 => Some(ErrorCategory::RateLimit),
        401 | 403 => Some(ErrorCategory::Auth),
        400..=499 => Some(ErrorCategory::ClientError),
        500..=599 => Some(ErrorCategory::ServerError),
        _ => None,
    }
}

/// Keyword classification of a message and a type name
///
/// Both inputs are compared case-insensitively.
pub fn classify_message(message: &str, type_name: &str) -> ErrorCategory {
    let message = message.to_lowercase();

    for (category, keywords) in KEYWORD_RULES {
        if keywords.iter().any(|keyword| message.contains(keyword)) {
            return *category;
        }
    }

    let type_name = type_name.to_lowercase();
    if NETWORK_TYPE_HINTS.iter().any(|hint| type_name.contains(hint)) {
        return ErrorCategory::Network;
    }

    ErrorCategory::Unknown
}

fn structured_category(error: &(dyn Error + 'static)) -> Option<ErrorCategory> {
    let mut current = Some(error);
    while let Some(err) = current {
        if let Some(category) = signal_of(err) {
            return Some(category);
        }
        current = err.source();
    }
    None
}

fn signal_of(error: &(dyn Error + 'static)) -> Option<ErrorCategory> {
    if let Some(status) = error.downcast_ref::<StatusError>() {
        return classify_status(status.status());
    }

    if let Some(io_error) = error.downcast_ref::<io::Error>() {
        return io_kind_category(io_error.kind());
    }

    #[cfg(feature = "runtime")]
    if error.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
        return Some(ErrorCategory::Timeout);
    }

    #[cfg(feature = "http")]
    if let Some(http_error) = error.downcast_ref::<reqwest::Error>() {
        if http_error.is_timeout() {
            return Some(ErrorCategory::Timeout);
        }
        if http_error.is_connect() {
            return Some(ErrorCategory::Network);
        }
        if let Some(status) = http_error.status() {
            return classify_status(status.as_u16());
        }
    }

    None
}

fn io_kind_category(kind: io::ErrorKind) -> Option<ErrorCategory> {
    match kind {
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::AddrNotAvailable
        | io::ErrorKind::BrokenPipe => Some(ErrorCategory::Network),
        io::ErrorKind::TimedOut => Some(ErrorCategory::Timeout),
        _ => None,
    }
}

fn chain_message(error: &(dyn Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut current = error.source();
    while let Some(err) = current {
        message.push_str(": ");
        message.push_str(&err.to_string());
        current = err.source();
    }
    message
}
