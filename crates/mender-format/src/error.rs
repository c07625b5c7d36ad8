//! Error taxonomy for reading, writing and repacking artifacts.

use std::io;

use thiserror::Error;

/// Error type returned by caller-supplied callbacks (handlers, script sinks).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors produced by the signature protocol.
///
/// These never abort parsing on their own; the reader records them and
/// reports them next to the structural result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("artifact is signed but no verification key was provided")]
    Unverifiable,

    #[error("signature verification failed: {0}")]
    Invalid(String),

    #[error("invalid key: {0}")]
    Key(String),

    #[error("malformed signature: {0}")]
    Encoding(String),
}

/// Errors from artifact codec operations.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// Bad or unsupported framing, unexpected entries, short transfers.
    #[error("format error: {0}")]
    Format(String),

    #[error("checksum mismatch for '{file}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    #[error("no handler registered for payload type '{0}'")]
    UnsupportedPayloadType(String),

    #[error("a handler for payload type '{0}' is already registered")]
    DuplicateHandler(String),

    #[error("invalid script name: {0}")]
    InvalidScriptName(String),

    /// Checked before any output is produced.
    #[error("version constraint violated: {0}")]
    VersionConstraint(String),

    #[error("artifact is already signed; use force to replace the signature")]
    AlreadySigned,

    #[error("signing is not supported for artifact version {version}")]
    SignatureNotSupported { version: u32 },

    #[error("handler for '{type_tag}' failed: {message}")]
    Handler { type_tag: String, message: String },

    #[error("script callback failed for '{name}': {message}")]
    ScriptCallback { name: String, message: String },

    #[error("invalid repack request: {0}")]
    InvalidRepack(String),

    #[error(transparent)]
    Signature(#[from] SignatureError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ArtifactError {
    pub(crate) fn format(message: impl Into<String>) -> Self {
        Self::Format(message.into())
    }

    pub(crate) fn version_constraint(message: impl Into<String>) -> Self {
        Self::VersionConstraint(message.into())
    }

    pub(crate) fn handler(type_tag: &str, err: BoxError) -> Self {
        Self::Handler {
            type_tag: type_tag.to_string(),
            message: err.to_string(),
        }
    }
}

/// Result type for artifact operations
pub type Result<T> = std::result::Result<T, ArtifactError>;
