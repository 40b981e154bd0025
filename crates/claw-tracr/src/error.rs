//! Error types for the log buffering engine.

use thiserror::Error;

/// Errors that can occur while buffering or flushing correlated logs.
#[derive(Debug, Error)]
pub enum TracrError {
    /// Appending would grow a key's buffer beyond the configured cap.
    #[error("buffer for {key:?} would exceed {limit} bytes")]
    CapacityExceeded {
        /// The correlation key that was rejected.
        key: String,
        /// The configured per-key byte cap.
        limit: usize,
    },

    /// A key scheduled for flushing had no buffered text.
    #[error("missing buffer for {0:?}")]
    MissingBuffer(String),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The background flush task failed.
    #[error("flush task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, TracrError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = TracrError::CapacityExceeded {
            key: "abc".to_string(),
            limit: 64,
        };
        assert_eq!(err.to_string(), "buffer for \"abc\" would exceed 64 bytes");

        let err = TracrError::MissingBuffer("xyz".to_string());
        assert_eq!(err.to_string(), "missing buffer for \"xyz\"");

        let err = TracrError::Config("zero flush interval".to_string());
        assert_eq!(err.to_string(), "configuration error: zero flush interval");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TracrError>();
    }

    #[test]
    fn error_io_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err: TracrError = io_err.into();
        assert!(err.to_string().contains("I/O error"));
        assert!(err.to_string().contains("read-only"));
    }

    #[test]
    fn error_serialization_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json")
            .err()
            .map(TracrError::from);
        assert!(matches!(json_err, Some(TracrError::Serialization(_))));
    }

    #[test]
    fn result_type_err() {
        let result: Result<()> = Err(TracrError::MissingBuffer("k".to_string()));
        assert!(result.is_err());
    }
}
