//! Error types shared between the server binary and the common crate.
//!
//! The `FeedError` enum unifies the failure cases the system distinguishes:
//! authentication rejections, upstream data-call failures, unknown symbols,
//! bad configuration, and the usual I/O and serialization plumbing. Handlers
//! map the domain variants onto HTTP status codes at the boundary.
use std::io;
use std::sync::PoisonError;

use thiserror::Error;

/// Unified error type for the feed server workspace.
#[derive(Error, Debug)]
pub enum FeedError {
    /// I/O error originating from the standard library or sockets/files.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Failure while encoding/decoding JSON via serde_json.
    #[error("JSON serialization/deserialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// The upstream rejected our credentials, or no session is active.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// A data call to the upstream provider failed (network or API error).
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// A requested symbol or resource does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid or incomplete configuration detected at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error indicating a poisoned mutex/lock was encountered.
    #[error("Mutex Lock Poisoned: {0}")]
    MutexLock(String),
}

impl<T> From<PoisonError<T>> for FeedError {
    fn from(err: PoisonError<T>) -> Self {
        FeedError::MutexLock(err.to_string())
    }
}
