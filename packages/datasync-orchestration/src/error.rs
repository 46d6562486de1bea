use datasync_storage::StorageError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Sink unreachable at startup: {0}")]
    SinkUnavailable(String),
}

impl SyncError {
    pub fn sink_unavailable<E: std::fmt::Display>(e: E) -> Self {
        Self::SinkUnavailable(e.to_string())
    }
}

/// Where inside a cycle a failure was absorbed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureScope {
    /// A row source fetch failed; counted as zero rows
    Source,
    /// One row failed to transform or write; row still accounted for
    Row,
    /// Sink unreachable; rest of the cycle abandoned
    Sink,
    /// Watermark save failed; advanced in-process only
    Watermark,
}

impl FailureScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureScope::Source => "source",
            FailureScope::Row => "row",
            FailureScope::Sink => "sink",
            FailureScope::Watermark => "watermark",
        }
    }
}

impl std::fmt::Display for FailureScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_scope_display() {
        assert_eq!(FailureScope::Source.to_string(), "source");
        assert_eq!(FailureScope::Watermark.as_str(), "watermark");
        assert_eq!(
            serde_json::to_string(&FailureScope::Sink).unwrap(),
            "\"sink\""
        );
    }

    #[test]
    fn test_sink_unavailable_keeps_cause() {
        let err = SyncError::sink_unavailable(StorageError::connectivity("refused"));
        assert!(matches!(err, SyncError::SinkUnavailable(_)));
        assert!(err.to_string().starts_with("Sink unreachable at startup"));
        assert!(err.to_string().contains("refused"));
    }

    #[test]
    fn test_storage_error_conversion() {
        let err: SyncError = StorageError::connectivity("down").into();
        assert!(matches!(err, SyncError::Storage(ref e) if e.is_connectivity()));
        assert!(err.to_string().contains("down"));
    }
}
