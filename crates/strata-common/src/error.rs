//! Error types for Strata.

use thiserror::Error;

/// Result type alias using StrataError.
pub type Result<T> = std::result::Result<T, StrataError>;

/// Errors that can occur in Strata operations.
#[derive(Debug, Error)]
pub enum StrataError {
    // Page cache errors
    #[error("Page not found: {page_id}")]
    PageNotFound { page_id: u64 },

    #[error("Page read failed: {0}")]
    ReadFailed(String),

    // B+ tree errors
    #[error("Invalid page type")]
    InvalidPageType,

    #[error("B+ tree corrupted: {0}")]
    BTreeCorrupted(String),

    #[error("Record number out of range: {recno}")]
    RecordOutOfRange { recno: u64 },

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Outcome of an operation that can lose a race with a concurrent writer.
///
/// A restart is expected traffic on the read path, so it is reported
/// alongside success rather than as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStatus {
    /// The operation took effect.
    Complete,
    /// A concurrent change was observed; the caller must retry.
    Restart,
}

impl RetryStatus {
    /// Returns true if the caller must retry.
    #[inline]
    pub fn is_restart(self) -> bool {
        self == RetryStatus::Restart
    }
}
