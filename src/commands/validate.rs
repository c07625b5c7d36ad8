//! `validate`: check structure, checksums and signature.

use std::io::{BufReader, Write};
use std::path::PathBuf;

use mender_format::{discarding_installer, ArtifactInfo, ArtifactReader};

use super::{open_artifact, optional_verifier, CommandError};

#[derive(Debug, Clone)]
pub struct ValidateArgs {
    pub path: PathBuf,
    /// Public key for verifying the manifest signature
    pub key: Option<PathBuf>,
}

/// Validate the artifact and confirm success on `out`.
///
/// Structural errors win over signature errors. A signed artifact with no
/// key to check it against counts as a signature failure.
pub fn validate(args: &ValidateArgs, out: &mut dyn Write) -> Result<ArtifactInfo, CommandError> {
    let verifier = optional_verifier(args.key.as_deref())?;
    let file = open_artifact(&args.path)?;

    let mut reader =
        ArtifactReader::new(BufReader::new(file)).with_handler(discarding_installer())?;
    if let Some(verifier) = &verifier {
        reader = reader.with_verifier(verifier);
    }
    let (info, signature) = reader.read().into_result()?;

    signature
        .check()
        .map_err(|e| CommandError::SignatureFailed {
            path: args.path.clone(),
            reason: e.to_string(),
        })?;

    writeln!(
        out,
        "Artifact file '{}' validated successfully",
        args.path.display()
    )?;
    Ok(info)
}
