use thiserror::Error;

/// Fatal misconfiguration, reported before any network activity.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("concurrency must be at least 1, got {0}")]
    NonPositiveConcurrency(i64),

    #[error("max depth must not be negative, got {0}")]
    NegativeMaxDepth(i64),

    #[error("invalid registry URL '{url}': {reason}")]
    InvalidRegistryUrl { url: String, reason: String },

    #[error("invalid value '{value}' for {key}: expected {expected}")]
    InvalidValue {
        key: String,
        value: String,
        expected: &'static str,
    },

    #[error("failed to create HTTP client: {0}")]
    HttpClient(String),
}

impl ConfigError {
    #[must_use]
    pub fn invalid_value(key: &str, value: &str, expected: &'static str) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            expected,
        }
    }
}

/// Errors that abort a whole run.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to read the local store: {0}")]
    Store(#[source] crate::pkg::SyncError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_messages() {
        assert_eq!(
            ConfigError::NonPositiveConcurrency(0).to_string(),
            "concurrency must be at least 1, got 0"
        );
        let err = ConfigError::invalid_value("NPMSYNC_MAX_DEPTH", "deep", "a non-negative integer");
        assert_eq!(
            err.to_string(),
            "invalid value 'deep' for NPMSYNC_MAX_DEPTH: expected a non-negative integer"
        );
    }

    #[test]
    fn test_error_wraps_config() {
        let err: Error = ConfigError::NegativeMaxDepth(-1).into();
        assert!(matches!(err, Error::Config(ConfigError::NegativeMaxDepth(-1))));
        assert_eq!(err.to_string(), "max depth must not be negative, got -1");
    }
}
