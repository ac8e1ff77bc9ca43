//! Sync engine error types.
//!
//! Per-package failures are values, not panics: the resolver and the
//! download engine collect them and keep going. Only configuration errors
//! (see [`crate::error::ConfigError`]) abort a run.

use std::fmt;
use std::io;

/// Sync error codes.
pub mod codes {
    pub const SYNC_PACKUMENT_FETCH_FAILED: &str = "SYNC_PACKUMENT_FETCH_FAILED";
    pub const SYNC_NOT_FOUND: &str = "SYNC_NOT_FOUND";
    pub const SYNC_VERSION_UNRESOLVED: &str = "SYNC_VERSION_UNRESOLVED";
    pub const SYNC_RANGE_INVALID: &str = "SYNC_RANGE_INVALID";
    pub const SYNC_DOWNLOAD_FAILED: &str = "SYNC_DOWNLOAD_FAILED";
    pub const SYNC_EMPTY_TARBALL: &str = "SYNC_EMPTY_TARBALL";
    pub const SYNC_INTEGRITY_MISMATCH: &str = "SYNC_INTEGRITY_MISMATCH";
    pub const SYNC_STORE_ERROR: &str = "SYNC_STORE_ERROR";
    pub const SYNC_REGISTRY_ERROR: &str = "SYNC_REGISTRY_ERROR";
}

/// A non-fatal, per-package error.
///
/// `Clone` so that a single failed packument fetch can be handed to every
/// caller that was waiting on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncError {
    code: &'static str,
    message: String,
}

impl SyncError {
    /// Create a new error with the given code and message.
    #[must_use]
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Get the error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// Get the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Metadata for a package name could not be fetched.
    #[must_use]
    pub fn packument_fetch(name: &str, cause: impl fmt::Display) -> Self {
        Self::new(
            codes::SYNC_PACKUMENT_FETCH_FAILED,
            format!("Failed to fetch metadata for '{name}': {cause}"),
        )
    }

    /// The registry does not know the package.
    #[must_use]
    pub fn not_found(name: &str) -> Self {
        Self::new(codes::SYNC_NOT_FOUND, format!("Package not found: {name}"))
    }

    /// No version in the packument satisfies a range or tag.
    #[must_use]
    pub fn version_unresolved(name: &str, range: &str) -> Self {
        Self::new(
            codes::SYNC_VERSION_UNRESOLVED,
            format!("No version of {name} satisfies range: {range}"),
        )
    }

    pub fn range_invalid(msg: impl Into<String>) -> Self {
        Self::new(codes::SYNC_RANGE_INVALID, msg)
    }

    pub fn download_failed(msg: impl Into<String>) -> Self {
        Self::new(codes::SYNC_DOWNLOAD_FAILED, msg)
    }

    #[must_use]
    pub fn empty_tarball(name: &str, version: &str) -> Self {
        Self::new(
            codes::SYNC_EMPTY_TARBALL,
            format!("Registry returned an empty tarball for {name}@{version}"),
        )
    }

    #[must_use]
    pub fn integrity_mismatch(name: &str, version: &str, expected: &str, actual: &str) -> Self {
        Self::new(
            codes::SYNC_INTEGRITY_MISMATCH,
            format!("Integrity mismatch for {name}@{version}: expected {expected}, got {actual}"),
        )
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::new(codes::SYNC_STORE_ERROR, msg)
    }

    pub fn registry(msg: impl Into<String>) -> Self {
        Self::new(codes::SYNC_REGISTRY_ERROR, msg)
    }

    /// Whether retrying the same request later could succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.code,
            codes::SYNC_DOWNLOAD_FAILED
                | codes::SYNC_EMPTY_TARBALL
                | codes::SYNC_REGISTRY_ERROR
                | codes::SYNC_PACKUMENT_FETCH_FAILED
                | codes::SYNC_STORE_ERROR
        )
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for SyncError {}

impl From<io::Error> for SyncError {
    fn from(e: io::Error) -> Self {
        Self::store(e.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::registry(format!("Request timed out: {e}"))
        } else if e.is_connect() {
            Self::registry(format!("Connection failed: {e}"))
        } else {
            Self::registry(e.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        Self::registry(format!("Invalid JSON: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_format() {
        let err = SyncError::not_found("left-pad");
        assert_eq!(err.code(), codes::SYNC_NOT_FOUND);
        assert!(err.to_string().starts_with("SYNC_NOT_FOUND: "));
        assert!(err.message().contains("left-pad"));
    }

    #[test]
    fn test_error_codes_uppercase() {
        let all_codes = [
            codes::SYNC_PACKUMENT_FETCH_FAILED,
            codes::SYNC_NOT_FOUND,
            codes::SYNC_VERSION_UNRESOLVED,
            codes::SYNC_RANGE_INVALID,
            codes::SYNC_DOWNLOAD_FAILED,
            codes::SYNC_EMPTY_TARBALL,
            codes::SYNC_INTEGRITY_MISMATCH,
            codes::SYNC_STORE_ERROR,
            codes::SYNC_REGISTRY_ERROR,
        ];

        for code in all_codes {
            assert!(
                code.chars().all(|c| c.is_uppercase() || c == '_'),
                "Error code '{code}' should be SCREAMING_SNAKE_CASE"
            );
        }
    }

    #[test]
    fn test_retryable() {
        assert!(SyncError::download_failed("boom").is_retryable());
        assert!(SyncError::empty_tarball("a", "1.0.0").is_retryable());
        assert!(!SyncError::integrity_mismatch("a", "1.0.0", "x", "y").is_retryable());
        assert!(!SyncError::not_found("a").is_retryable());
    }
}
