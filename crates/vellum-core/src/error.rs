//! Error types for the data model.

use thiserror::Error;

/// Reasons an envelope is refused before it reaches a storage engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("envelope is missing required field `{0}`")]
    MissingField(&'static str),
}

/// Failures turning typed documents into bytes and back.
#[derive(Error, Debug, Clone)]
pub enum CodecError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("expected model `{expected}`, found `{found}`")]
    ModelMismatch { expected: String, found: String },

    #[error("payload could not be opened: {0}")]
    Payload(String),
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        CodecError::Serialization(err.to_string())
    }
}
