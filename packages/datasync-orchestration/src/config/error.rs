//! Configuration error types

use thiserror::Error;

/// Configuration error type
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file missing
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    /// Field failed validation
    #[error("Invalid value for '{field}': {hint}")]
    Invalid { field: String, hint: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            hint: hint.into(),
        }
    }
}

/// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_display() {
        let err = ConfigError::invalid("sync.interval_minutes", "must be at least 1");
        assert_eq!(
            err.to_string(),
            "Invalid value for 'sync.interval_minutes': must be at least 1"
        );
    }
}
