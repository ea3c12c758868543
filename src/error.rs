//! Error types
//!
//! One enum per collaborator boundary. Generation that produces nothing is
//! not an error and never shows up here.

use thiserror::Error;

/// Errors from loading or saving persisted state
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error on {path}: {source}")]
    Serialization {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl PersistError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn json(path: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            path: path.into(),
            source,
        }
    }
}

/// Errors from the chat transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Send timed out after {0} seconds")]
    Timeout(u64),

    #[error("Transport not ready")]
    NotReady,
}

/// Errors from the translation service
#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unknown language: {0}")]
    UnknownLanguage(String),

    #[error("Unexpected response: {0}")]
    BadResponse(String),
}
