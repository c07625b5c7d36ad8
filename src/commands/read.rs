//! `read`: describe an artifact.

use std::io::Write;
use std::path::PathBuf;

use mender_format::{discarding_installer, ArtifactInfo, ArtifactReader, SignatureStatus};

use super::{open_artifact, optional_verifier, CommandError};

#[derive(Debug, Clone)]
pub struct ReadArgs {
    pub path: PathBuf,
    /// Public key for verifying the manifest signature
    pub key: Option<PathBuf>,
}

/// Print the artifact description to `out`.
///
/// A signature that fails to verify against the given key is reported in
/// the listing and then returned as [`CommandError::SignatureFailed`]. A
/// signed artifact read without a key is only reported.
pub fn read(args: &ReadArgs, out: &mut dyn Write) -> Result<ArtifactInfo, CommandError> {
    let verifier = optional_verifier(args.key.as_deref())?;
    let file = open_artifact(&args.path)?;

    let mut reader = ArtifactReader::new(std::io::BufReader::new(file))
        .with_handler(discarding_installer())?;
    if let Some(verifier) = &verifier {
        reader = reader.with_verifier(verifier);
    }
    let (info, signature) = reader.read().into_result()?;

    print_info(&info, &signature, out)?;

    if let SignatureStatus::Invalid(reason) = signature {
        return Err(CommandError::SignatureFailed {
            path: args.path.clone(),
            reason,
        });
    }
    Ok(info)
}

fn print_info(
    info: &ArtifactInfo,
    signature: &SignatureStatus,
    out: &mut dyn Write,
) -> std::io::Result<()> {
    writeln!(out, "Mender artifact:")?;
    writeln!(out, "  Name: {}", info.artifact_name)?;
    writeln!(out, "  Format: {}", info.format.format)?;
    writeln!(out, "  Version: {}", info.format.version)?;
    writeln!(out, "  Signature: {}", signature.describe())?;
    writeln!(out, "  Compatible devices: '[{}]'", info.device_types.join(" "))?;
    if !info.scripts.is_empty() {
        writeln!(out, "  State scripts:")?;
        for name in &info.scripts {
            writeln!(out, "    {}", name)?;
        }
    }

    writeln!(out, "\nUpdates:")?;
    for (index, update) in info.updates.iter().enumerate() {
        writeln!(out, "  {:04}:", index)?;
        writeln!(out, "    Type:   {}", update.type_tag)?;
        writeln!(out, "    Files:")?;
        for file in &update.files {
            writeln!(out, "      name:     {}", file.name)?;
            writeln!(out, "      size:     {}", file.size)?;
            writeln!(
                out,
                "      modified: {}",
                file.modified.format("%Y-%m-%d %H:%M:%S %z %Z")
            )?;
            writeln!(out, "      checksum: {}", file.checksum)?;
        }
    }
    Ok(())
}
