// File: src/error.rs
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TrainerError>;

#[derive(Debug, Error)]
pub enum TrainerError {
    /// Reference and attempt cannot be paired up line by line.
    #[error("input shape mismatch: {message}")]
    InputShape { message: String },

    #[error("reference song has no {what} to score")]
    EmptyReference { what: &'static str },

    /// The stored profile exists but does not parse. Recoverable through
    /// `ProfileStore::load_or_recover`.
    #[error("profile for user '{user_id}' at {} is unreadable: {source}", .path.display())]
    ProfileCorruption {
        user_id: String,
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("timed out after {waited:?} waiting for the profile lock of user '{user_id}'")]
    LockTimeout { user_id: String, waited: Duration },

    #[error("I/O error while {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error while {context}: {source}")]
    Json {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("invalid input: {message}")]
    InvalidInput { message: String },
}

impl TrainerError {
    pub(crate) fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }

    pub(crate) fn json(context: &'static str, source: serde_json::Error) -> Self {
        Self::Json { context, source }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub(crate) fn input_shape(message: impl Into<String>) -> Self {
        Self::InputShape {
            message: message.into(),
        }
    }

    /// Only lock contention is worth retrying unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }
}
