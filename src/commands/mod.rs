//! Command implementations behind the CLI.
//!
//! Each command takes its resolved arguments plus the [`ToolConfig`] and
//! writes human-readable output to the supplied writer. Failures are
//! [`CommandError`]s, which map onto the process exit code.

pub mod modify;
pub mod read;
pub mod sign;
pub mod validate;
pub mod write;

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use mender_format::{ArtifactError, Ed25519Signer, Ed25519Verifier};
use thiserror::Error;

use crate::config::{ConfigError, ToolConfig};
use crate::keys::{self, KeyError};

pub use modify::{modify, ImageEdits, ModifyArgs, ModifyReport, PayloadMounter};
pub use read::{read, ReadArgs};
pub use sign::{sign, SignArgs};
pub use validate::{validate, ValidateArgs};
pub use write::{write_rootfs_image, WriteRootfsArgs};

/// Exit codes
pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_SIGNATURE: i32 = 2;
pub const EXIT_INVALID_PARAMETERS: i32 = 3;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{0}")]
    InvalidArguments(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error("can not open '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    /// The artifact is structurally sound but its signature did not verify
    #[error("artifact file '{path}' formatted correctly, but error validating signature: {reason}")]
    SignatureFailed { path: PathBuf, reason: String },

    #[error("can not modify payload image: {0}")]
    Modify(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CommandError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidArguments(_) | Self::Config(_) | Self::Key(_) => {
                EXIT_INVALID_PARAMETERS
            }
            Self::SignatureFailed { .. } => EXIT_SIGNATURE,
            _ => EXIT_FAILURE,
        }
    }
}

pub(crate) fn open_artifact(path: &Path) -> Result<File, CommandError> {
    File::open(path).map_err(|source| CommandError::Open {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn optional_signer(path: Option<&Path>) -> Result<Option<Ed25519Signer>, CommandError> {
    Ok(path.map(keys::load_signer).transpose()?)
}

pub(crate) fn optional_verifier(
    path: Option<&Path>,
) -> Result<Option<Ed25519Verifier>, CommandError> {
    Ok(path.map(keys::load_verifier).transpose()?)
}

/// Scratch parent from the configuration, checked up front
pub(crate) fn scratch_dir(config: &ToolConfig) -> Result<Option<&Path>, CommandError> {
    match config.scratch_dir.as_deref() {
        Some(dir) if !dir.is_dir() => Err(CommandError::InvalidArguments(format!(
            "scratch directory '{}' does not exist",
            dir.display()
        ))),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            CommandError::InvalidArguments("x".into()).exit_code(),
            EXIT_INVALID_PARAMETERS
        );
        assert_eq!(
            CommandError::SignatureFailed {
                path: PathBuf::from("a.mender"),
                reason: "bad".into()
            }
            .exit_code(),
            EXIT_SIGNATURE
        );
        assert_eq!(
            CommandError::Artifact(ArtifactError::AlreadySigned).exit_code(),
            EXIT_FAILURE
        );
    }

    #[test]
    fn test_signature_failure_message() {
        let err = CommandError::SignatureFailed {
            path: PathBuf::from("a.mender"),
            reason: "signature verification failed: bad".into(),
        };
        assert_eq!(
            err.to_string(),
            "artifact file 'a.mender' formatted correctly, but error validating signature: \
             signature verification failed: bad"
        );
    }
}
