//! Unified error handling for logsight
//!
//! This module provides a comprehensive error type that encompasses
//! all possible errors across the logsight crates.

use std::path::PathBuf;
use thiserror::Error;

/// Unified error type for all logsight operations
#[derive(Error, Debug)]
pub enum Error {
    // ==================== I/O Errors ====================

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File not found
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    // ==================== Parse Errors ====================

    /// Invalid magic bytes at file start
    #[error("Invalid magic bytes: expected {expected:?}, found {found:?}")]
    InvalidMagic {
        expected: Vec<u8>,
        found: Vec<u8>,
    },

    /// Unsupported binary format version
    #[error("Unsupported version: {version} (supported: {supported})")]
    UnsupportedVersion {
        version: u32,
        supported: String,
    },

    /// Unexpected end of file
    #[error("Unexpected end of file at offset {offset}")]
    UnexpectedEof {
        offset: u64,
    },

    /// No registered parser recognized the file
    #[error("Unknown log format: {0}")]
    UnknownFormat(PathBuf),

    /// Invalid data encountered while decoding
    #[error("Invalid data: {message}")]
    InvalidData {
        message: String,
    },

    /// Missing required field
    #[error("Missing required field: {field}")]
    MissingField {
        field: String,
    },

    // ==================== Store Errors ====================

    /// Analytical engine failure
    #[error("Store error: {message}")]
    Store {
        message: String,
    },

    /// A write was attempted after the store was finalized
    #[error("Store already finalized")]
    StoreFinalized,

    /// A query was issued before the store was finalized
    #[error("Store not finalized")]
    StoreNotFinalized,

    // ==================== Session Errors ====================

    /// Session id not known to the manager
    #[error("Session not found: {id}")]
    SessionNotFound {
        id: String,
    },

    /// Session exists but is not queryable yet
    #[error("Session not ready: {id} is {status}")]
    SessionNotReady {
        id: String,
        status: String,
    },

    // ==================== Upload Errors ====================

    /// Upload job id not known to the manager
    #[error("Upload job not found: {id}")]
    JobNotFound {
        id: String,
    },

    /// An upload id was completed twice
    #[error("Upload already completed: {id}")]
    DuplicateUpload {
        id: String,
    },

    /// A chunk index was out of range or its payload undecodable
    #[error("Invalid chunk: {message}")]
    InvalidChunk {
        message: String,
    },

    /// Decompression failed
    #[error("Decompression failed: {message}")]
    DecompressionFailed {
        message: String,
    },

    // ==================== Configuration Errors ====================

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        message: String,
    },

    // ==================== General Errors ====================

    /// Operation cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Operation timed out
    #[error("Operation timed out after {seconds} seconds")]
    Timeout {
        seconds: u64,
    },

    /// Shutdown in progress or worker capacity exhausted
    #[error("Service unavailable: {message}")]
    Unavailable {
        message: String,
    },

    /// Internal error (should not happen)
    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },

    /// Custom error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

/// Result type using the unified Error
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an error with additional context
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Error::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal {
            message: message.into(),
        }
    }

    /// Create an invalid data error
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Error::InvalidData {
            message: message.into(),
        }
    }

    /// Create a store error from an engine failure
    pub fn store(message: impl Into<String>) -> Self {
        Error::Store {
            message: message.into(),
        }
    }

    /// Create a missing field error
    pub fn missing_field(field: impl Into<String>) -> Self {
        Error::MissingField {
            field: field.into(),
        }
    }

    /// Check if this is a "not found" type error
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::FileNotFound(_)
                | Error::SessionNotFound { .. }
                | Error::JobNotFound { .. }
        )
    }

    /// Check if this is a parse/format error
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidMagic { .. }
                | Error::UnsupportedVersion { .. }
                | Error::UnexpectedEof { .. }
                | Error::UnknownFormat(_)
                | Error::InvalidData { .. }
                | Error::MissingField { .. }
        )
    }

    /// Check if the error should abort the owning worker
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::UnknownFormat(_) | Error::Store { .. }
        )
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_with_context() {
        let err = Error::FileNotFound(PathBuf::from("/test"));
        let contextualized = err.with_context("while staging upload");

        assert!(contextualized.to_string().contains("while staging upload"));
    }

    #[test]
    fn test_is_not_found() {
        assert!(Error::FileNotFound(PathBuf::from("/test")).is_not_found());
        assert!(Error::SessionNotFound { id: "s1".into() }.is_not_found());
        assert!(!Error::StoreFinalized.is_not_found());
    }

    #[test]
    fn test_is_parse_error() {
        assert!(Error::InvalidMagic {
            expected: vec![0x4C, 0x4C, 0x4F, 0x47],
            found: vec![0, 0, 0, 0],
        }
        .is_parse_error());

        assert!(!Error::FileNotFound(PathBuf::from("/test")).is_parse_error());
    }

    #[test]
    fn test_result_context() {
        let result: Result<()> = Err(Error::FileNotFound(PathBuf::from("/test")));
        let with_context = result.context("loading session");

        assert!(with_context.is_err());
        assert!(with_context.unwrap_err().to_string().contains("loading session"));
    }
}
