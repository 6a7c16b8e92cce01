use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::key::UPLOAD_KEY_HEX_LENGTH;

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("missing upload_key query parameter")]
    MissingKey,

    #[error(
        "invalid upload_key length: expected {}-character hex string",
        UPLOAD_KEY_HEX_LENGTH
    )]
    InvalidKeyLength { actual: usize },

    #[error("invalid upload_key format: must be hexadecimal")]
    InvalidKeyFormat,

    #[error("invalid upload_key value: generate another one and try again")]
    UnknownKey,

    #[error("invalid JSON on line {line}: {reason}")]
    InvalidRecord { line: usize, reason: String },

    #[error("invalid position: expected a non-negative integer, got {0:?}")]
    InvalidPosition(String),

    #[error("error reading request body: {0}")]
    Body(#[source] io::Error),

    #[error("failed to {operation} {}: {source}", .path.display())]
    Storage {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("failed to generate upload key: {0}")]
    Entropy(#[source] rand::Error),
}

impl SessionError {
    pub(crate) fn storage(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: io::Error,
    ) -> Self {
        SessionError::Storage {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Whether the failure is attributable to the caller (bad key, bad payload)
    /// rather than to the server.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SessionError::MissingKey
                | SessionError::InvalidKeyLength { .. }
                | SessionError::InvalidKeyFormat
                | SessionError::UnknownKey
                | SessionError::InvalidRecord { .. }
                | SessionError::InvalidPosition(_)
                | SessionError::Body(_)
        )
    }

    pub fn code(&self) -> &'static str {
        match self {
            SessionError::MissingKey
            | SessionError::InvalidKeyLength { .. }
            | SessionError::InvalidKeyFormat
            | SessionError::UnknownKey => "E_ADMISSION",
            SessionError::InvalidRecord { .. } => "E_PAYLOAD",
            SessionError::InvalidPosition(_) | SessionError::Body(_) => "E_REQUEST",
            SessionError::Storage { .. } | SessionError::Metadata(_) => "E_STORAGE",
            SessionError::Entropy(_) => "E_ENTROPY",
        }
    }
}
