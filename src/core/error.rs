//! # Error Handling Module
//!
//! Error types for the mediation cache, built on `thiserror`.
//!
//! Two families of failures exist and they are deliberately kept apart:
//!
//! - [`MediationError`] is what the cache mediator hands back to the host
//!   pipeline. Only *fatal* conditions end up here: a message travelling in the
//!   wrong direction for the mediator's collector mode, a request that cannot be
//!   fingerprinted, or a misconfigured continuation.
//! - [`crate::caching::CacheError`] describes store-level failures. The
//!   controller never propagates those to the host; they are logged and the
//!   transaction carries on as if caching were disabled for that operation.

use thiserror::Error;

/// Main result type used throughout the mediator
pub type MediationResult<T> = Result<T, MediationError>;

/// Errors surfaced to the host pipeline
#[derive(Debug, Error, Clone)]
pub enum MediationError {
    /// Configuration-related errors (invalid config, missing files, unknown references)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// A request reached a collector, or a response reached a non-collector
    #[error("{direction} messages cannot be handled in a {mode} cache")]
    Direction {
        direction: &'static str,
        mode: &'static str,
    },

    /// The request could not be read or parsed into a fingerprint
    #[error("Error in calculating the hash value of the request: {reason}")]
    Fingerprint { reason: String },

    /// The on-hit continuation could not be resolved or failed while mediating
    #[error("On-hit continuation error ({sequence}): {message}")]
    Continuation { sequence: String, message: String },

    /// Internal errors for unexpected failures
    #[error("Internal error: {message}")]
    Internal { message: String },

    /// I/O errors (configuration files)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {message}")]
    Json { message: String },

    /// YAML parsing errors for configuration files
    #[error("YAML error: {message}")]
    Yaml { message: String },
}

impl MediationError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// A request arrived at a response-only (collector) mediator
    pub fn request_at_collector() -> Self {
        Self::Direction {
            direction: "Request",
            mode: "collector",
        }
    }

    /// A response arrived at a request-only mediator
    pub fn response_at_non_collector() -> Self {
        Self::Direction {
            direction: "Response",
            mode: "non collector",
        }
    }

    /// Create a fingerprint error with a custom reason
    pub fn fingerprint<S: Into<String>>(reason: S) -> Self {
        Self::Fingerprint {
            reason: reason.into(),
        }
    }

    /// Create a continuation error
    pub fn continuation<S: Into<String>, M: Into<String>>(sequence: S, message: M) -> Self {
        Self::Continuation {
            sequence: sequence.into(),
            message: message.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the host should abort this mediator step.
    ///
    /// Every variant the mediator returns is fatal for the step; the method
    /// exists so hosts can treat configuration-loading errors (I/O, YAML)
    /// differently from per-transaction faults.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Direction { .. } => true,
            Self::Fingerprint { .. } => true,
            Self::Continuation { .. } => true,
            Self::Configuration { .. } => true,
            Self::Internal { .. } => true,
            Self::Io { .. } | Self::Json { .. } | Self::Yaml { .. } => false,
        }
    }

    /// Get a string representation of the error type for structured logs
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration_error",
            Self::Direction { .. } => "direction_error",
            Self::Fingerprint { .. } => "fingerprint_error",
            Self::Continuation { .. } => "continuation_error",
            Self::Internal { .. } => "internal_error",
            Self::Io { .. } => "io_error",
            Self::Json { .. } => "json_error",
            Self::Yaml { .. } => "yaml_error",
        }
    }
}

/// Implement conversion from std::io::Error
impl From<std::io::Error> for MediationError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

/// Implement conversion from serde_json::Error
impl From<serde_json::Error> for MediationError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
        }
    }
}

/// Implement conversion from serde_yaml::Error
impl From<serde_yaml::Error> for MediationError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml {
            message: err.to_string(),
        }
    }
}

/// Convenience macro for creating internal errors
///
/// Usage: `internal_error!("Failed to bind mediator: {}", id)`
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::core::error::MediationError::internal(format!($($arg)*))
    };
}

/// Convenience macro for creating configuration errors
///
/// Usage: `config_error!("Invalid scope: {}", scope)`
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::core::error::MediationError::config(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_messages() {
        assert_eq!(
            MediationError::request_at_collector().to_string(),
            "Request messages cannot be handled in a collector cache"
        );
        assert_eq!(
            MediationError::response_at_non_collector().to_string(),
            "Response messages cannot be handled in a non collector cache"
        );
    }

    #[test]
    fn test_fatal_classification() {
        assert!(MediationError::fingerprint("empty body").is_fatal());
        assert!(MediationError::request_at_collector().is_fatal());
        assert!(!MediationError::Io { message: "missing".into() }.is_fatal());
    }

    #[test]
    fn test_macros() {
        let err = config_error!("bad scope {}", "nowhere");
        assert_eq!(err.error_type(), "configuration_error");
        assert!(err.to_string().contains("bad scope nowhere"));

        let err = internal_error!("boom {}", 1);
        assert_eq!(err.error_type(), "internal_error");
    }
}
