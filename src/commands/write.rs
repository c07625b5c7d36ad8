//! `write rootfs-image`: build a new artifact from a root filesystem image.

use std::io::Write;
use std::path::PathBuf;

use mender_format::{rootfs_composer, ArtifactWriter, Scripts, UpdateFile, WriteReport, WriteRequest};
use tracing::info;

use super::{optional_signer, scratch_dir, CommandError};
use crate::config::ToolConfig;
use crate::output::place_atomically;

#[derive(Debug, Clone, Default)]
pub struct WriteRootfsArgs {
    pub update: Option<PathBuf>,
    pub device_types: Vec<String>,
    pub artifact_name: Option<String>,
    /// Private key for signing the manifest
    pub key: Option<PathBuf>,
    /// Script files or directories of scripts
    pub scripts: Vec<PathBuf>,
}

/// Write the artifact to `config.output_path`
pub fn write_rootfs_image(
    args: &WriteRootfsArgs,
    config: &ToolConfig,
) -> Result<WriteReport, CommandError> {
    let (update, artifact_name) = match (&args.update, &args.artifact_name) {
        (Some(update), Some(name)) if !args.device_types.is_empty() && !name.is_empty() => {
            (update, name)
        }
        _ => {
            return Err(CommandError::InvalidArguments(
                "must provide `device-type`, `artifact-name` and `update`".to_string(),
            ))
        }
    };
    if artifact_name.chars().any(char::is_whitespace) {
        return Err(CommandError::InvalidArguments(
            "whitespace is not allowed in the artifact-name".to_string(),
        ));
    }
    if !update.is_file() {
        return Err(CommandError::InvalidArguments(format!(
            "update file '{}' does not exist",
            update.display()
        )));
    }

    let signer = optional_signer(args.key.as_deref())?;
    let scratch = scratch_dir(config)?;

    let mut scripts = Scripts::new();
    for path in &args.scripts {
        scripts.add_path(path)?;
    }

    let mut request = WriteRequest::new(artifact_name.as_str(), args.device_types.clone())
        .with_version(config.format_version)
        .with_scripts(scripts);
    request.format = config.format_name.clone();
    request.updates.push(rootfs_composer(
        config.format_version,
        vec![UpdateFile::new(update)],
    )?);

    let report = place_atomically(&config.output_path, |out: &mut dyn Write| {
        let mut writer = ArtifactWriter::new(out).with_compression(config.compression);
        if let Some(dir) = scratch {
            writer = writer.with_scratch_dir(dir);
        }
        if let Some(signer) = &signer {
            writer = writer.with_signer(signer);
        }
        Ok::<_, CommandError>(writer.write(request)?)
    })?;

    info!(
        path = %config.output_path.display(),
        artifact_name = %report.artifact_name,
        signed = report.signed,
        "artifact written"
    );
    Ok(report)
}
