//! Decompose an existing artifact and write it back out with changes.
//!
//! The source is read once with signature checks disabled. Payload files
//! and scripts are staged in a private scratch directory that is removed
//! on every exit path, then fed to a fresh writer run of the same version.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tempfile::TempDir;
use tracing::{debug, info};

use crate::archive::Compression;
use crate::checksum::copy_bounded;
use crate::error::{ArtifactError, BoxError, Result};
use crate::handlers::{rootfs_composer, DataFile, RootfsInstaller, UpdateFile};
use crate::reader::{ArtifactInfo, ArtifactReader};
use crate::scripts::Scripts;
use crate::signature::{AcceptAll, Signer};
use crate::writer::{ArtifactWriter, WriteReport, WriteRequest};

/// Changes applied while repacking
#[derive(Default, Clone, Copy)]
pub struct RepackOptions<'a> {
    /// New artifact name; the source name otherwise
    pub artifact_name: Option<&'a str>,
    /// File replacing the content of the single payload file
    pub replacement: Option<&'a Path>,
    /// Key for the new manifest signature; unsigned otherwise
    pub signer: Option<&'a dyn Signer>,
    /// Refuse sources that already carry a signature
    pub require_unsigned: bool,
    /// Compression of the new artifact; the source's otherwise
    pub compression: Option<Compression>,
    /// Parent directory of the scratch directory
    pub scratch_dir: Option<&'a Path>,
}

/// Source and result of a repack
#[derive(Debug, Clone)]
pub struct RepackReport {
    pub source: ArtifactInfo,
    pub written: WriteReport,
}

struct StagedFile {
    path: PathBuf,
    name: String,
    modified: DateTime<Utc>,
}

/// Read `source` and write the recomposed artifact to `output`
pub fn repack<R: Read, W: Write>(
    source: R,
    output: W,
    options: RepackOptions<'_>,
) -> Result<RepackReport> {
    let scratch = match options.scratch_dir {
        Some(dir) => TempDir::new_in(dir)?,
        None => TempDir::new()?,
    };
    let payload_dir = scratch.path().join("payload");
    let script_dir = scratch.path().join("scripts");
    fs::create_dir(&payload_dir)?;
    fs::create_dir(&script_dir)?;

    let keep_payload = options.replacement.is_none();
    let mut staged_files: Vec<StagedFile> = Vec::new();
    let mut staged_scripts: Vec<(String, PathBuf)> = Vec::new();

    let outcome = {
        let installer = RootfsInstaller::new(
            |data: &mut dyn Read, file: &DataFile| -> std::result::Result<(), BoxError> {
                let path = payload_dir.join(format!("{:04}", staged_files.len()));
                if keep_payload {
                    copy_bounded(data, &mut File::create(&path)?)?;
                } else {
                    copy_bounded(data, &mut std::io::sink())?;
                }
                staged_files.push(StagedFile {
                    path,
                    name: file.name.clone(),
                    modified: file.modified,
                });
                Ok(())
            },
        );
        ArtifactReader::new(source)
            .with_verifier(AcceptAll)
            .with_handler(installer)?
            .with_script_callback(|content: &mut dyn Read, name: &str| {
                let path = script_dir.join(format!("{:04}", staged_scripts.len()));
                copy_bounded(content, &mut File::create(&path)?)?;
                staged_scripts.push((name.to_string(), path));
                Ok(())
            })
            .read()
    };
    let (info, _) = outcome.into_result()?;
    debug!(
        artifact_name = %info.artifact_name,
        files = staged_files.len(),
        scripts = staged_scripts.len(),
        "source artifact staged"
    );

    if options.require_unsigned && info.signed {
        return Err(ArtifactError::AlreadySigned);
    }
    if options.signer.is_some() && info.format.version < 2 {
        return Err(ArtifactError::SignatureNotSupported {
            version: info.format.version,
        });
    }
    if options.replacement.is_some()
        && (info.updates.len() != 1 || info.updates[0].files.len() != 1)
    {
        return Err(ArtifactError::InvalidRepack(format!(
            "a replacement needs exactly one payload with one file, source has {} payloads",
            info.updates.len()
        )));
    }

    let version = info.format.version;
    let mut staged = staged_files.into_iter();
    let mut request = WriteRequest::new(
        options.artifact_name.unwrap_or(&info.artifact_name),
        info.device_types.clone(),
    )
    .with_version(version);
    request.format = info.format.format.clone();

    for update in &info.updates {
        let files = update
            .files
            .iter()
            .map(|_| {
                let file = staged.next().ok_or_else(|| {
                    ArtifactError::InvalidRepack("staged payload is incomplete".to_string())
                })?;
                Ok(match options.replacement {
                    Some(path) => UpdateFile::new(path).with_name(file.name),
                    None => UpdateFile::new(file.path)
                        .with_name(file.name)
                        .with_modified(file.modified),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        request.updates.push(rootfs_composer(version, files)?);
    }

    let mut scripts = Scripts::new();
    for (name, path) in &staged_scripts {
        scripts.add_named_file(name, path)?;
    }
    request.scripts = scripts;

    let mut writer = ArtifactWriter::new(output)
        .with_compression(options.compression.unwrap_or(info.compression))
        .with_scratch_dir(scratch.path());
    if let Some(signer) = options.signer {
        writer = writer.with_signer(signer);
    }
    let written = writer.write(request)?;

    info!(
        from = %info.artifact_name,
        to = %written.artifact_name,
        replaced = options.replacement.is_some(),
        signed = written.signed,
        "artifact repacked"
    );
    Ok(RepackReport {
        source: info,
        written,
    })
}
