//! `sign`: add or replace the manifest signature of an existing artifact.

use std::io::{BufReader, Write};
use std::path::PathBuf;

use mender_format::{repack, RepackOptions, RepackReport};
use tracing::info;

use super::{open_artifact, scratch_dir, CommandError};
use crate::config::ToolConfig;
use crate::keys::load_signer;
use crate::output::place_atomically;

#[derive(Debug, Clone, Default)]
pub struct SignArgs {
    pub path: PathBuf,
    /// Private key used for the new signature
    pub key: Option<PathBuf>,
    /// Where the signed artifact goes; replaces `path` when unset
    pub output_path: Option<PathBuf>,
    /// Replace an existing signature
    pub force: bool,
}

/// Sign the artifact at `args.path`.
///
/// Version 1 artifacts can not carry a signature. An already signed
/// artifact is only re-signed with `force`. On failure the destination is
/// left as it was.
pub fn sign(args: &SignArgs, config: &ToolConfig) -> Result<RepackReport, CommandError> {
    let key = args.key.as_deref().ok_or_else(|| {
        CommandError::InvalidArguments(
            "Missing signing key; please use `-k` parameter for providing one".to_string(),
        )
    })?;
    let signer = load_signer(key)?;
    let scratch = scratch_dir(config)?;
    let source = open_artifact(&args.path)?;
    let dest = args.output_path.as_deref().unwrap_or(&args.path);

    let options = RepackOptions {
        signer: Some(&signer),
        require_unsigned: !args.force,
        scratch_dir: scratch,
        ..Default::default()
    };
    let report = place_atomically(dest, |out: &mut dyn Write| {
        Ok::<_, CommandError>(repack(BufReader::new(source), out, options)?)
    })?;

    info!(
        path = %dest.display(),
        replaced_signature = report.source.signed,
        "artifact signed"
    );
    Ok(report)
}
