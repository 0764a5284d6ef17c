//! Error types for subleak.
//!
//! All errors are strongly typed using thiserror so callers can match on
//! configuration problems separately from detected leaks.

use thiserror::Error;

/// Errors delivered to observers through the stream's error channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StreamError {
    message: String,
}

impl StreamError {
    /// Creates a stream error with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Top-level error type for subleak.
#[derive(Debug, Error)]
pub enum LeakError {
    /// The target stream type exposes no subscribe implementation to wrap.
    #[error("Configuration error: stream type '{target}' cannot be intercepted: {reason}")]
    Configuration {
        /// Name of the stream type.
        target: String,
        /// Why interception is impossible.
        reason: String,
    },

    /// Subscriptions were still open when the snapshot was taken.
    #[error("Subscription leak detected: {count} subscription(s) still open")]
    LeakDetected {
        /// Number of leaked subscriptions in the snapshot.
        count: usize,
        /// Rendered leak report.
        report: String,
    },

    /// The report sink rejected output.
    #[error("Failed to write leak report: {0}")]
    Report(#[from] std::io::Error),

    /// A snapshot could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Detector configuration could not be parsed.
    #[error("Invalid detector configuration: {reason}")]
    Config {
        /// What was wrong with the input.
        reason: String,
    },
}

impl LeakError {
    /// Creates a configuration error for the named stream type.
    #[must_use]
    pub fn configuration(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if this is a leak-detected failure.
    #[must_use]
    pub const fn is_leak(&self) -> bool {
        matches!(self, Self::LeakDetected { .. })
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }

    /// Number of leaked subscriptions, if this is a leak failure.
    #[must_use]
    pub const fn leak_count(&self) -> Option<usize> {
        match self {
            Self::LeakDetected { count, .. } => Some(*count),
            _ => None,
        }
    }
}

/// Result type alias for subleak operations.
pub type LeakResult<T> = Result<T, LeakError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_message() {
        let err = LeakError::configuration("Observable", "no subscribe implementation installed");
        let msg = format!("{err}");
        assert!(msg.contains("Observable"));
        assert!(msg.contains("no subscribe implementation"));
        assert!(err.is_configuration());
        assert!(!err.is_leak());
        assert_eq!(err.leak_count(), None);
    }

    #[test]
    fn test_leak_detected_carries_count() {
        let err = LeakError::LeakDetected {
            count: 3,
            report: String::new(),
        };
        assert!(err.is_leak());
        assert_eq!(err.leak_count(), Some(3));
        assert!(format!("{err}").contains("3 subscription(s)"));
    }

    #[test]
    fn test_report_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "sink closed");
        let err: LeakError = io.into();
        assert!(matches!(err, LeakError::Report(_)));
        assert!(format!("{err}").contains("sink closed"));
    }

    #[test]
    fn test_stream_error_message() {
        let err = StreamError::new("boom");
        assert_eq!(err.message(), "boom");
        assert_eq!(err.to_string(), "boom");
    }
}
