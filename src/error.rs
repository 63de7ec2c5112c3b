// src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Core error types for Choco
#[derive(Error, Debug)]
pub enum Error {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors, carried unmodified after retries are exhausted
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed XML in a manifest or config file
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// Unreadable package archive
    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Directory traversal failure
    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// JSON encoding of stored snapshots
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed operation arguments
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Version string that cannot be parsed
    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    /// Package manifest is missing or incomplete
    #[error("Invalid package manifest: {0}")]
    Manifest(String),

    /// Package or version could not be found
    #[error("Package not found: {0}")]
    PackageNotFound(String),

    /// Installed state or constraints rule out the requested change
    #[error("Unable to resolve {0}")]
    Resolution(String),

    /// Lifecycle script failed or could not be started
    #[error("{step} script failed: {message}")]
    Script { step: String, message: String },

    /// Attempt to delete or move the filesystem root
    #[error("Refusing to operate on filesystem root: {}", .0.display())]
    FilesystemRoot(PathBuf),

    /// Unrecoverable condition that aborts the whole operation
    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl Error {
    /// Whether this error must abort the whole operation instead of a single package
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::FilesystemRoot(_) | Error::Fatal(_))
    }
}

/// Result type alias using Choco's Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::FilesystemRoot(PathBuf::from("/")).is_fatal());
        assert!(Error::Fatal("cannot create root".to_string()).is_fatal());
        assert!(!Error::PackageNotFound("git".to_string()).is_fatal());
        assert!(!Error::Io(std::io::Error::other("locked")).is_fatal());
    }
}
