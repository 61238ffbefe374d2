//! Error types for the brickvol crate.
//!
//! These are the fatal errors of the convenience layer. Problems found while
//! validating documents or decoding bricks are not errors in this sense: they
//! are collected as [`ValidationError`](crate::ValidationError) values.

use std::fmt;

/// Result type for brickvol operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in brickvol operations.
#[derive(Debug)]
pub enum Error {
    /// A file could not be opened or read.
    Io {
        /// The path that failed.
        path: String,
        /// The error message.
        message: String,
    },
    /// A document could not be parsed as JSON.
    Json {
        /// Which document was being parsed.
        context: &'static str,
        /// The error message.
        message: String,
    },
    /// Synthetic volume generation was asked for something it cannot build.
    Synthetic {
        /// Description of what was invalid.
        detail: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io { path, message } => write!(f, "cannot read {path}: {message}"),
            Error::Json { context, message } => {
                write!(f, "failed to parse {context}: {message}")
            }
            Error::Synthetic { detail } => write!(f, "synthetic volume: {detail}"),
        }
    }
}

impl std::error::Error for Error {}
