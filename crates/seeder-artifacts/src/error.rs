//! Error types for artifact providers
//!
//! These errors never cross the provider boundary: a provider logs them and
//! reports the artifact as absent. They exist so the logs say *why*.

use std::path::PathBuf;
use thiserror::Error;

/// Error type for artifact lookups
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// Key cannot be mapped onto a backend location
    #[error("invalid artifact key: {0}")]
    InvalidKey(String),

    /// Path exists but is not a regular file
    #[error("not a regular file: {}", .0.display())]
    NotAFile(PathBuf),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Provider configuration rejected at construction
    #[error("invalid provider configuration: {0}")]
    InvalidConfig(String),

    /// Registry URL could not be parsed or has the wrong scheme
    #[error("invalid registry URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// HTTP transport failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Registry answered with an unexpected status
    #[error("registry returned {status} for {url}")]
    UnexpectedStatus { status: u16, url: String },

    /// Authentication against the registry failed
    #[error("registry authentication failed: {0}")]
    Auth(String),

    /// Manifest could not be decoded
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// Downloaded content does not match its descriptor
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    /// Downloaded content has the wrong length
    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// Lookup exceeded its deadline
    #[error("lookup timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Result type for artifact operations
pub type Result<T> = std::result::Result<T, ArtifactError>;
