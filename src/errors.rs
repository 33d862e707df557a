//! Typed error hierarchy for the task board client.
//!
//! Three top-level enums follow the three failure classes of the client:
//! - `StoreError`: table reads/writes and realtime channel failures
//! - `BoardError`: board service and live board failures
//! - `AuthError`: sign-in, session and token failures

use thiserror::Error;
use uuid::Uuid;

/// Errors from the remote store (PostgREST tables and realtime channels).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store rejected request ({status}): {message}")]
    Rejected {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Failed to decode {table} row: {source}")]
    Decode {
        table: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Realtime channel error: {0}")]
    Realtime(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn decode(table: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Decode {
            table: table.into(),
            source,
        }
    }
}

/// Errors from the board data service and the live board cache.
#[derive(Debug, Error)]
pub enum BoardError {
    #[error("Task {id} not found")]
    TaskNotFound { id: Uuid },

    #[error("Column '{key}' not found")]
    ColumnNotFound { key: String },

    #[error("No project selected")]
    NoProjectSelected,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Board is closed")]
    Closed,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from the auth subsystem. Rendered to users as plain status text.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Not signed in")]
    NotSignedIn,

    #[error("{message}")]
    Rejected { status: u16, message: String },

    #[error("Callback URL carries neither an auth code nor tokens")]
    MissingCallbackCredentials,

    #[error("No pending sign-in; start an OAuth sign-in first")]
    MissingVerifier,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Failed to persist session at {path}: {source}")]
    Persist {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode auth response: {0}")]
    Decode(#[from] serde_json::Error),
}
