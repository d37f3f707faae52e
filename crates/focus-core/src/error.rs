use std::path::PathBuf;

use thiserror::Error;

/// A failed credential operation. The message is shown to the user as-is.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct AuthError {
    message: String,
}

impl AuthError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("invalid backend config: {0}")]
    InvalidConfig(String),

    #[error("failed to parse backend config: {0}")]
    MalformedConfig(#[from] serde_json::Error),

    #[error("failed to read backend config {path}: {source}")]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to prepare backend storage at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt backend state in {path}: {detail}")]
    Corrupt { path: PathBuf, detail: String },
}

/// Failure of a data-layer request (subscribe, create, update, delete).
#[derive(Debug, Error)]
pub enum OperationError {
    #[error("permission denied for collection of user {user}")]
    PermissionDenied { user: String },

    #[error("task not found: {id}")]
    NotFound { id: String },

    #[error("backend unavailable")]
    Unavailable,

    #[error("storage failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode record: {0}")]
    Serialization(#[from] serde_json::Error),
}
