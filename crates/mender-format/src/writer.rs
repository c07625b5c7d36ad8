//! Artifact writer.
//!
//! All version constraints are checked before the first byte is written.
//! Each payload is then composed into an anonymous scratch file so its
//! checksums are known before the header and manifest, which must precede
//! the data in the container, are produced.

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::PathBuf;

use tracing::{debug, info};

use crate::archive::{
    append_bytes, append_stream, finish_nested, nested_builder, Compression,
};
use crate::checksum::sha256_hex;
use crate::error::{ArtifactError, Result};
use crate::handlers::{Composer, DataFile, DataSink};
use crate::header::{
    data_stem, encode_document, update_dir, validate_artifact_name, validate_device_types,
    HeaderInfo, UpdateType, HEADER_INFO_ENTRY, HEADER_STEM, SCRIPT_LIMIT,
};
use crate::layout::{layout_for, Layout};
use crate::manifest::{data_file_path, Manifest, MANIFEST_ENTRY, SIGNATURE_ENTRY};
use crate::reader::UpdateInfo;
use crate::scripts::{validate_script_name, Scripts, SCRIPTS_PREFIX};
use crate::signature::Signer;
use crate::version::{FormatInfo, FORMAT_NAME, LATEST_FORMAT_VERSION, SUPPORTED_VERSIONS, VERSION_ENTRY};

/// What to write
pub struct WriteRequest<'a> {
    pub format: String,
    pub version: u32,
    pub artifact_name: String,
    pub device_types: Vec<String>,
    /// One composer per payload, in order
    pub updates: Vec<Box<dyn Composer + 'a>>,
    pub scripts: Scripts,
}

impl<'a> WriteRequest<'a> {
    /// Request for the latest format version with no payloads yet
    pub fn new(artifact_name: impl Into<String>, device_types: Vec<String>) -> Self {
        Self {
            format: FORMAT_NAME.to_string(),
            version: LATEST_FORMAT_VERSION,
            artifact_name: artifact_name.into(),
            device_types,
            updates: Vec::new(),
            scripts: Scripts::new(),
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_update(mut self, composer: impl Composer + 'a) -> Self {
        self.updates.push(Box::new(composer));
        self
    }

    pub fn with_scripts(mut self, scripts: Scripts) -> Self {
        self.scripts = scripts;
        self
    }
}

/// Summary of a written artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReport {
    pub format: FormatInfo,
    pub artifact_name: String,
    pub device_types: Vec<String>,
    pub updates: Vec<UpdateInfo>,
    pub scripts: Vec<String>,
    pub compression: Compression,
    pub manifest: Option<Manifest>,
    pub signed: bool,
}

/// Sequential artifact writer over any byte sink
pub struct ArtifactWriter<'a, W> {
    output: W,
    signer: Option<Box<dyn Signer + 'a>>,
    compression: Compression,
    scratch_dir: Option<PathBuf>,
}

struct StagedPayload {
    type_tag: String,
    file: File,
    size: u64,
    files: Vec<DataFile>,
}

impl<'a, W: Write> ArtifactWriter<'a, W> {
    pub fn new(output: W) -> Self {
        Self {
            output,
            signer: None,
            compression: Compression::default(),
            scratch_dir: None,
        }
    }

    /// Sign the manifest with `signer`
    pub fn with_signer(mut self, signer: impl Signer + 'a) -> Self {
        self.signer = Some(Box::new(signer));
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Directory for scratch files; the system temp dir otherwise
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    /// Validate, compose and write the artifact
    pub fn write(mut self, request: WriteRequest<'_>) -> Result<WriteReport> {
        let (format, layout) = self.validate(&request)?;

        let mut staged = Vec::with_capacity(request.updates.len());
        for (index, composer) in request.updates.iter().enumerate() {
            staged.push(self.stage_payload(index, composer.as_ref())?);
        }

        let header_name = self.compression.archive_name(HEADER_STEM);
        let header = build_header(&request, &staged, self.compression)?;
        let version_record = format.encode()?;

        let manifest = if layout.has_manifest() {
            let mut manifest = Manifest::new();
            manifest.insert(VERSION_ENTRY, sha256_hex(&version_record))?;
            manifest.insert(header_name.as_str(), sha256_hex(&header))?;
            for (index, payload) in staged.iter().enumerate() {
                for file in &payload.files {
                    manifest.insert(data_file_path(index, &file.name), file.checksum.as_str())?;
                }
            }
            Some(manifest)
        } else {
            None
        };

        let signature = match (&manifest, &self.signer) {
            (Some(manifest), Some(signer)) => Some(signer.sign(&manifest.to_bytes())?),
            _ => None,
        };

        let mut outer = tar::Builder::new(&mut self.output);
        outer.mode(tar::HeaderMode::Deterministic);
        append_bytes(&mut outer, VERSION_ENTRY, &version_record)?;
        if let Some(manifest) = &manifest {
            append_bytes(&mut outer, MANIFEST_ENTRY, &manifest.to_bytes())?;
        }
        if let Some(signature) = &signature {
            append_bytes(&mut outer, SIGNATURE_ENTRY, signature)?;
        }
        append_bytes(&mut outer, &header_name, &header)?;
        for (index, payload) in staged.iter_mut().enumerate() {
            let name = self.compression.archive_name(&data_stem(index));
            payload.file.seek(SeekFrom::Start(0))?;
            append_stream(&mut outer, &name, payload.size, 0, &mut payload.file)?;
        }
        outer.into_inner()?.flush()?;

        info!(
            artifact_name = %request.artifact_name,
            version = format.version,
            updates = staged.len(),
            signed = signature.is_some(),
            "artifact written"
        );

        Ok(WriteReport {
            format,
            artifact_name: request.artifact_name.clone(),
            device_types: request.device_types.clone(),
            updates: staged
                .into_iter()
                .map(|p| UpdateInfo {
                    type_tag: p.type_tag,
                    files: p.files,
                })
                .collect(),
            scripts: request.scripts.names(),
            compression: self.compression,
            manifest,
            signed: signature.is_some(),
        })
    }

    fn validate(&self, request: &WriteRequest<'_>) -> Result<(FormatInfo, Box<dyn Layout>)> {
        if !SUPPORTED_VERSIONS.contains(&request.version) {
            return Err(ArtifactError::version_constraint(format!(
                "unsupported artifact version: {}",
                request.version
            )));
        }
        let format = FormatInfo::new(&request.format, request.version)
            .map_err(|e| ArtifactError::version_constraint(e.to_string()))?;
        let layout = layout_for(request.version)?;

        if self.signer.is_some() && !layout.allows_signature() {
            return Err(ArtifactError::version_constraint(format!(
                "version {} artifacts can not be signed",
                request.version
            )));
        }
        if !request.scripts.is_empty() && !layout.allows_scripts() {
            return Err(ArtifactError::version_constraint(format!(
                "version {} artifacts can not carry state scripts",
                request.version
            )));
        }
        validate_artifact_name(&request.artifact_name)?;
        validate_device_types(&request.device_types)?;
        if request.updates.is_empty() {
            return Err(ArtifactError::version_constraint(
                "artifact must contain at least one update",
            ));
        }
        for (index, composer) in request.updates.iter().enumerate() {
            if composer.format_version() != request.version {
                return Err(ArtifactError::version_constraint(format!(
                    "update {index:04} is composed for version {} but the artifact is version {}",
                    composer.format_version(),
                    request.version
                )));
            }
        }
        for script in request.scripts.iter() {
            validate_script_name(&script.name)?;
        }
        Ok((format, layout))
    }

    fn stage_payload(&self, index: usize, composer: &dyn Composer) -> Result<StagedPayload> {
        let scratch = match &self.scratch_dir {
            Some(dir) => tempfile::tempfile_in(dir)?,
            None => tempfile::tempfile()?,
        };
        let mut sink = DataSink::new(scratch, self.compression);
        let reported = composer.compose(&mut sink)?;
        if reported.is_empty() {
            return Err(ArtifactError::version_constraint(format!(
                "update {index:04} produced no files"
            )));
        }
        if reported != sink.files() {
            return Err(ArtifactError::handler(
                composer.type_tag(),
                "reported files differ from the files it wrote".into(),
            ));
        }

        let (file, files) = sink.finish()?;
        let size = file.metadata()?.len();
        debug!(
            payload = index,
            type_tag = composer.type_tag(),
            files = files.len(),
            size,
            "payload staged"
        );
        Ok(StagedPayload {
            type_tag: composer.type_tag().to_string(),
            file,
            size,
            files,
        })
    }
}

/// Header archive bytes: header-info, scripts, then per-payload headers
fn build_header(
    request: &WriteRequest<'_>,
    staged: &[StagedPayload],
    compression: Compression,
) -> Result<Vec<u8>> {
    let info = HeaderInfo {
        artifact_name: request.artifact_name.clone(),
        device_types_compatible: request.device_types.clone(),
        updates: staged
            .iter()
            .map(|p| UpdateType {
                type_tag: p.type_tag.clone(),
            })
            .collect(),
    };
    info.check()?;

    let mut builder = nested_builder(Vec::new(), compression);
    append_bytes(&mut builder, HEADER_INFO_ENTRY, &encode_document(&info)?)?;

    for script in request.scripts.iter() {
        let (size, content) = script.open()?;
        if size > SCRIPT_LIMIT {
            return Err(ArtifactError::format(format!(
                "script '{}' exceeds the limit of {SCRIPT_LIMIT} bytes",
                script.name
            )));
        }
        let path = format!("{SCRIPTS_PREFIX}{}", script.name);
        append_stream(&mut builder, &path, size, 0, content)?;
    }

    for (index, (composer, payload)) in request.updates.iter().zip(staged).enumerate() {
        let dir = update_dir(index);
        for (name, content) in composer.header_entries(&payload.files)? {
            append_bytes(&mut builder, &format!("{dir}{name}"), &content)?;
        }
    }

    Ok(finish_nested(builder)?)
}
