//! Error types for the caching engine
//!
//! Provides unified error handling using thiserror.

use std::time::Duration;

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the caching engine.
///
/// Every variant describes a configuration problem detected either when a
/// memoizer is built or when an expiration is first scheduled. Errors raised
/// by the wrapped computation never pass through this type; they reach the
/// caller unchanged.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    /// Invalid option value (capacity, max args, environment defaults)
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Negative, non-finite or out-of-range expiration duration
    #[error("Invalid expiration: {0}")]
    InvalidExpiration(String),

    /// A feature that needs a tokio runtime was used outside of one
    #[error("Runtime unavailable: {0}")]
    RuntimeUnavailable(String),
}

impl CacheError {
    /// Builds the error reported for an out-of-range expiration duration.
    pub(crate) fn invalid_duration(millis: f64) -> Self {
        CacheError::InvalidExpiration(format!(
            "duration must be a finite, non-negative number of milliseconds no larger than a Duration can hold (got {})",
            millis
        ))
    }

    /// Builds the error reported when a duration puts the deadline past
    /// what the clock can represent.
    pub(crate) fn deadline_overflow(duration: Duration) -> Self {
        CacheError::InvalidExpiration(format!(
            "expiration deadline {:?} from now is out of range",
            duration
        ))
    }
}

// == Result Type Alias ==
/// Convenience Result type for the caching engine.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CacheError::InvalidConfig("capacity must be positive".to_string());
        assert_eq!(err.to_string(), "Invalid configuration: capacity must be positive");

        let err = CacheError::invalid_duration(-5.0);
        assert!(err.to_string().contains("got -5"));
    }

    #[test]
    fn test_error_converts_into_anyhow() {
        let err: anyhow::Error = CacheError::RuntimeUnavailable("no reactor".to_string()).into();
        assert!(err.downcast_ref::<CacheError>().is_some());
    }
}
