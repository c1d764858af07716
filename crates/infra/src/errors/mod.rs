//! Infrastructure errors.
//!
//! Composes with [`CommonError`] instead of duplicating its variants, so
//! policy validation failures surface unchanged.

use graphguard_common::{
    impl_error_classification, impl_error_conversion, CommonError, ErrorClassification,
    ErrorSeverity,
};
use thiserror::Error;

/// Result alias for infrastructure operations
pub type InfraResult<T> = Result<T, InfraError>;

/// Errors raised while loading settings or wiring the runtime
#[derive(Debug, Error)]
pub enum InfraError {
    /// No settings file at the given or probed locations
    #[error("Settings file not found: {0}")]
    SettingsNotFound(String),

    /// File extension is neither `toml` nor `json`
    #[error("Unsupported settings format: {0}")]
    UnsupportedFormat(String),

    /// The global tracing subscriber could not be installed
    #[error("Failed to initialise tracing: {0}")]
    Tracing(String),

    #[error(transparent)]
    Common(#[from] CommonError),
}

impl_error_conversion!(InfraError, Common);

impl From<toml::de::Error> for InfraError {
    fn from(err: toml::de::Error) -> Self {
        Self::Common(CommonError::from(err))
    }
}

impl_error_classification!(InfraError, Common,
    Self::SettingsNotFound(_) => {
        retryable: false,
        severity: ErrorSeverity::Error,
        critical: false,
    },
    Self::UnsupportedFormat(_) => {
        retryable: false,
        severity: ErrorSeverity::Error,
        critical: false,
    },
    Self::Tracing(_) => {
        retryable: false,
        severity: ErrorSeverity::Warning,
        critical: false,
    }
);
