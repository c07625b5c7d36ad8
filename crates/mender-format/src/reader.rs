//! Artifact reader.
//!
//! Decodes the outer container strictly in written order:
//! `version` → (`manifest` → `manifest.sig`) → header archive → one data
//! archive per payload → staged scripts to the caller. Nothing is read
//! twice and nothing is buffered beyond small metadata entries.
//!
//! A failed signature check never stops decoding. The outcome is recorded
//! and returned in [`ReadOutcome::signature`] next to the structural result,
//! so a corrupt artifact and a well-formed but badly signed one stay
//! distinguishable.

use std::io::Read;

use tracing::{debug, info, warn};

use crate::archive::{entry_path, mtime_to_datetime, ArchiveSource, Compression};
use crate::checksum::{read_limited, sha256_hex, HashingReader};
use crate::error::{ArtifactError, BoxError, Result};
use crate::handlers::{DataFile, HandlerRegistry, Installer};
use crate::header::{
    data_stem, decode_document, parse_update_path, FilesList, HeaderInfo, TypeInfo, UpdateHeader,
    FILES_ENTRY, HEADER_INFO_ENTRY, HEADER_STEM, METADATA_LIMIT, META_DATA_ENTRY, SCRIPT_LIMIT,
    TYPE_INFO_ENTRY,
};
use crate::layout::{layout_for, Layout};
use crate::manifest::{Manifest, MANIFEST_ENTRY, SIGNATURE_ENTRY};
use crate::scripts::{validate_script_name, StagedScript, SCRIPTS_PREFIX};
use crate::signature::{SignatureStatus, SignatureVerifier};
use crate::version::{FormatInfo, VERSION_ENTRY};

/// Callback receiving each state script (content, name) in declared order
pub type ScriptCallback<'a> =
    Box<dyn FnMut(&mut dyn Read, &str) -> std::result::Result<(), BoxError> + 'a>;

/// Decoder position; on failure, where decoding stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    AwaitingVersion,
    AwaitingHeader,
    AwaitingData,
    AwaitingScripts,
    Done,
}

/// One decoded payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateInfo {
    pub type_tag: String,
    pub files: Vec<DataFile>,
}

/// Everything learned from a fully decoded artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactInfo {
    pub format: FormatInfo,
    pub artifact_name: String,
    pub device_types: Vec<String>,
    pub updates: Vec<UpdateInfo>,
    /// Script names in declared order
    pub scripts: Vec<String>,
    /// Whether a manifest signature was present
    pub signed: bool,
    /// Compression of the header and data archives
    pub compression: Compression,
    /// Manifest as received (version 2 only)
    pub manifest: Option<Manifest>,
}

/// Result of a read: the structural result plus the independent signature outcome
#[derive(Debug)]
pub struct ReadOutcome {
    pub artifact: Result<ArtifactInfo>,
    pub signature: SignatureStatus,
    pub state: ReadState,
}

impl ReadOutcome {
    /// Structural result only; the signature status travels alongside
    pub fn into_result(self) -> Result<(ArtifactInfo, SignatureStatus)> {
        let signature = self.signature;
        self.artifact.map(|artifact| (artifact, signature))
    }

    /// Structural errors take precedence, then signature failures
    pub fn into_verified(self) -> Result<ArtifactInfo> {
        let artifact = self.artifact?;
        self.signature.check()?;
        Ok(artifact)
    }
}

/// Sequential artifact reader
pub struct ArtifactReader<'a, R> {
    input: R,
    handlers: HandlerRegistry<'a>,
    verifier: Option<Box<dyn SignatureVerifier + 'a>>,
    on_script: Option<ScriptCallback<'a>>,
}

impl<'a, R: Read> ArtifactReader<'a, R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            handlers: HandlerRegistry::new(),
            verifier: None,
            on_script: None,
        }
    }

    /// Verify the manifest signature with `verifier`
    pub fn with_verifier(mut self, verifier: impl SignatureVerifier + 'a) -> Self {
        self.verifier = Some(Box::new(verifier));
        self
    }

    /// Hand each state script to `callback`
    pub fn with_script_callback(
        mut self,
        callback: impl FnMut(&mut dyn Read, &str) -> std::result::Result<(), BoxError> + 'a,
    ) -> Self {
        self.on_script = Some(Box::new(callback));
        self
    }

    /// Register the installer for one payload type
    pub fn register_handler(&mut self, handler: impl Installer + 'a) -> Result<()> {
        self.handlers.register(Box::new(handler))
    }

    /// Builder form of [`ArtifactReader::register_handler`]
    pub fn with_handler(mut self, handler: impl Installer + 'a) -> Result<Self> {
        self.register_handler(handler)?;
        Ok(self)
    }

    /// Decode the whole artifact
    pub fn read(self) -> ReadOutcome {
        let mut decoder = Decoder {
            state: ReadState::AwaitingVersion,
            signature: SignatureStatus::NotReached,
            handlers: self.handlers,
            verifier: self.verifier,
            on_script: self.on_script,
            layout: None,
            format: None,
            version_digest: String::new(),
            manifest: None,
            signature_seen: false,
            header: None,
            updates: Vec::new(),
        };

        let artifact = decoder.run(self.input);
        match &artifact {
            Ok(info) => info!(
                artifact_name = %info.artifact_name,
                version = info.format.version,
                updates = info.updates.len(),
                "artifact read"
            ),
            Err(e) => debug!(state = ?decoder.state, error = %e, "artifact read failed"),
        }

        ReadOutcome {
            artifact,
            signature: decoder.signature,
            state: decoder.state,
        }
    }
}

struct DecodedHeader {
    info: HeaderInfo,
    updates: Vec<UpdateHeader>,
    scripts: Vec<StagedScript>,
    compression: Compression,
}

struct Decoder<'a> {
    state: ReadState,
    signature: SignatureStatus,
    handlers: HandlerRegistry<'a>,
    verifier: Option<Box<dyn SignatureVerifier + 'a>>,
    on_script: Option<ScriptCallback<'a>>,
    layout: Option<Box<dyn Layout>>,
    format: Option<FormatInfo>,
    version_digest: String,
    manifest: Option<(Manifest, Vec<u8>)>,
    signature_seen: bool,
    header: Option<DecodedHeader>,
    updates: Vec<UpdateInfo>,
}

impl<'a> Decoder<'a> {
    fn run<R: Read>(&mut self, input: R) -> Result<ArtifactInfo> {
        let mut archive = tar::Archive::new(input);
        let entries = archive.entries().map_err(malformed("container"))?;

        for entry in entries {
            let mut entry = entry.map_err(malformed("container"))?;
            let path = entry_path(&entry)?;
            debug!(state = ?self.state, entry = %path, "next entry");

            match self.state {
                ReadState::AwaitingVersion => self.read_version(&path, &mut entry)?,
                ReadState::AwaitingHeader => self.read_preamble(&path, &mut entry)?,
                ReadState::AwaitingData => self.read_data(&path, &mut entry)?,
                ReadState::AwaitingScripts | ReadState::Done => {
                    return Err(ArtifactError::format(format!("unexpected entry '{path}'")));
                }
            }
        }

        self.finish()
    }

    fn read_version<R: Read>(&mut self, path: &str, entry: &mut R) -> Result<()> {
        if path != VERSION_ENTRY {
            return Err(ArtifactError::format(format!(
                "expected '{VERSION_ENTRY}' as first entry, found '{path}'"
            )));
        }
        let bytes = read_metadata(entry, path)?;
        let format = FormatInfo::decode(&bytes)?;
        self.layout = Some(layout_for(format.version)?);
        self.version_digest = sha256_hex(&bytes);
        debug!(format = %format.format, version = format.version, "version probed");

        self.format = Some(format);
        self.state = ReadState::AwaitingHeader;
        Ok(())
    }

    /// Manifest, signature and header archive
    fn read_preamble<R: Read>(&mut self, path: &str, entry: &mut R) -> Result<()> {
        let layout = self.layout.as_deref().ok_or_else(no_version)?;

        if path == MANIFEST_ENTRY {
            if !layout.has_manifest() {
                return Err(ArtifactError::format(format!(
                    "version {} artifacts carry no manifest",
                    layout.version()
                )));
            }
            if self.manifest.is_some() {
                return Err(ArtifactError::format("duplicate manifest"));
            }
            let raw = read_metadata(entry, path)?;
            let manifest = Manifest::parse(&raw)?;
            check_digest(VERSION_ENTRY, manifest.require(VERSION_ENTRY)?, &self.version_digest)?;
            self.manifest = Some((manifest, raw));
            return Ok(());
        }

        if path == SIGNATURE_ENTRY {
            if !layout.allows_signature() {
                return Err(ArtifactError::format(format!(
                    "version {} artifacts can not be signed",
                    layout.version()
                )));
            }
            if self.signature_seen {
                return Err(ArtifactError::format("duplicate manifest signature"));
            }
            let (_, raw_manifest) = self
                .manifest
                .as_ref()
                .ok_or_else(|| ArtifactError::format("signature precedes the manifest"))?;
            let signature = read_metadata(entry, path)?;

            self.signature_seen = true;
            self.signature = match &self.verifier {
                Some(verifier) => {
                    SignatureStatus::from_check(verifier.verify(raw_manifest, &signature))
                }
                None => SignatureStatus::Unverifiable,
            };
            if let SignatureStatus::Invalid(reason) = &self.signature {
                warn!(%reason, "manifest signature did not verify; continuing to read");
            }
            return Ok(());
        }

        let compression = Compression::from_archive_name(path, HEADER_STEM)
            .ok_or_else(|| ArtifactError::format(format!("unexpected entry '{path}'")))?;
        if layout.has_manifest() && self.manifest.is_none() {
            return Err(ArtifactError::format("artifact has no manifest"));
        }

        let mut hashing = HashingReader::new(entry);
        let (info, updates, scripts) = {
            let mut archive = tar::Archive::new(ArchiveSource::new(&mut hashing, compression));
            decode_header(&mut archive, layout)?
        };
        hashing.drain()?;
        let (digest, _) = hashing.finish();

        if let Some((manifest, _)) = &self.manifest {
            check_digest(path, manifest.require(path)?, &digest)?;
        }
        if !self.signature_seen {
            self.signature = SignatureStatus::Unsigned;
        }
        debug!(
            artifact_name = %info.artifact_name,
            updates = updates.len(),
            scripts = scripts.len(),
            "header decoded"
        );

        self.header = Some(DecodedHeader {
            info,
            updates,
            scripts,
            compression,
        });
        self.state = ReadState::AwaitingData;
        Ok(())
    }

    fn read_data<R: Read>(&mut self, path: &str, entry: &mut R) -> Result<()> {
        let header = self.header.as_ref().ok_or_else(no_version)?;
        let layout = self.layout.as_deref().ok_or_else(no_version)?;
        let index = self.updates.len();

        if index >= header.updates.len() {
            return Err(ArtifactError::format(format!(
                "unexpected entry '{path}': all {index} data archives already read"
            )));
        }
        let stem = data_stem(index);
        let compression = Compression::from_archive_name(path, &stem).ok_or_else(|| {
            ArtifactError::format(format!("expected data archive '{stem}', found '{path}'"))
        })?;

        let type_tag = header.info.updates[index].type_tag.clone();
        let handler = self.handlers.get_mut(&type_tag)?;
        let manifest = self.manifest.as_ref().map(|(m, _)| m);

        let files = install_payload(
            ArchiveSource::new(entry, compression),
            index,
            &type_tag,
            &header.updates[index],
            layout,
            manifest,
            handler,
        )?;

        self.updates.push(UpdateInfo { type_tag, files });
        Ok(())
    }

    fn finish(&mut self) -> Result<ArtifactInfo> {
        match self.state {
            ReadState::AwaitingVersion => {
                return Err(ArtifactError::format("artifact has no version record"))
            }
            ReadState::AwaitingHeader => {
                return Err(ArtifactError::format("artifact has no header archive"))
            }
            _ => {}
        }

        let header = self.header.take().ok_or_else(no_version)?;
        if self.updates.len() < header.updates.len() {
            return Err(ArtifactError::format(format!(
                "missing data archive '{}'",
                data_stem(self.updates.len())
            )));
        }
        if let Some((manifest, _)) = &self.manifest {
            let covered = 2 + self.updates.iter().map(|u| u.files.len()).sum::<usize>();
            if manifest.len() != covered {
                return Err(ArtifactError::format(
                    "manifest lists entries that are not in the artifact",
                ));
            }
        }

        self.state = ReadState::AwaitingScripts;
        if let Some(callback) = self.on_script.as_mut() {
            for script in &header.scripts {
                callback(&mut script.content.as_slice(), &script.name).map_err(|e| {
                    ArtifactError::ScriptCallback {
                        name: script.name.clone(),
                        message: e.to_string(),
                    }
                })?;
            }
        }
        self.state = ReadState::Done;

        let format = self.format.take().ok_or_else(no_version)?;
        Ok(ArtifactInfo {
            format,
            artifact_name: header.info.artifact_name,
            device_types: header.info.device_types_compatible,
            updates: std::mem::take(&mut self.updates),
            scripts: header.scripts.into_iter().map(|s| s.name).collect(),
            signed: self.signature_seen,
            compression: header.compression,
            manifest: self.manifest.take().map(|(m, _)| m),
        })
    }
}

fn decode_header<R: Read>(
    archive: &mut tar::Archive<R>,
    layout: &dyn Layout,
) -> Result<(HeaderInfo, Vec<UpdateHeader>, Vec<StagedScript>)> {
    let mut info: Option<HeaderInfo> = None;
    let mut updates: Vec<UpdateHeader> = Vec::new();
    let mut scripts = Vec::new();

    for entry in archive.entries().map_err(malformed("header archive"))? {
        let mut entry = entry.map_err(malformed("header archive"))?;
        let path = entry_path(&entry)?;

        if info.is_none() {
            if path != HEADER_INFO_ENTRY {
                return Err(ArtifactError::format(format!(
                    "header archive must start with '{HEADER_INFO_ENTRY}', found '{path}'"
                )));
            }
            let decoded: HeaderInfo =
                decode_document(&read_metadata(&mut entry, &path)?, HEADER_INFO_ENTRY)?;
            decoded
                .check()
                .map_err(|e| ArtifactError::format(format!("invalid header-info: {e}")))?;
            info = Some(decoded);
            continue;
        }

        if let Some(name) = path.strip_prefix(SCRIPTS_PREFIX) {
            if !layout.allows_scripts() {
                return Err(ArtifactError::format(format!(
                    "version {} artifacts can not carry state scripts",
                    layout.version()
                )));
            }
            if !updates.is_empty() {
                return Err(ArtifactError::format(
                    "state scripts must precede payload headers",
                ));
            }
            validate_script_name(name)?;
            let content = read_limited(&mut entry, SCRIPT_LIMIT, &path)
                .map_err(|e| ArtifactError::format(e.to_string()))?;
            scripts.push(StagedScript {
                name: name.to_string(),
                content,
            });
            continue;
        }

        let (index, rest) = parse_update_path(&path)?;
        if index == updates.len() {
            updates.push(UpdateHeader::default());
        } else if index + 1 != updates.len() {
            return Err(ArtifactError::format(format!(
                "payload header {index:04} is out of order"
            )));
        }
        let update = &mut updates[index];
        let content = read_metadata(&mut entry, &path)?;

        match rest {
            FILES_ENTRY => {
                if !update.files.is_empty() {
                    return Err(ArtifactError::format(format!("duplicate '{path}'")));
                }
                let list: FilesList = decode_document(&content, &path)?;
                update.files = list.files;
            }
            TYPE_INFO_ENTRY => {
                if update.type_tag.is_some() {
                    return Err(ArtifactError::format(format!("duplicate '{path}'")));
                }
                let type_info: TypeInfo = decode_document(&content, &path)?;
                update.type_tag = Some(type_info.type_tag);
            }
            META_DATA_ENTRY => {}
            other => layout.decode_update_entry(other, &content, update)?,
        }
    }

    let info = info.ok_or_else(|| ArtifactError::format("header archive is empty"))?;
    if updates.len() != info.updates.len() {
        return Err(ArtifactError::format(format!(
            "header-info declares {} updates but {} payload headers were found",
            info.updates.len(),
            updates.len()
        )));
    }
    for (index, (update, declared)) in updates.iter().zip(&info.updates).enumerate() {
        match &update.type_tag {
            Some(tag) if *tag == declared.type_tag => {}
            Some(tag) => {
                return Err(ArtifactError::format(format!(
                    "payload {index:04} declares type '{tag}' but header-info says '{}'",
                    declared.type_tag
                )))
            }
            None => {
                return Err(ArtifactError::format(format!(
                    "payload {index:04} has no type-info"
                )))
            }
        }
        if update.files.is_empty() {
            return Err(ArtifactError::format(format!(
                "payload {index:04} lists no files"
            )));
        }
        for (pos, name) in update.files.iter().enumerate() {
            if update.files[..pos].contains(name) {
                return Err(ArtifactError::format(format!(
                    "payload {index:04} lists '{name}' twice"
                )));
            }
        }
    }

    Ok((info, updates, scripts))
}

/// Stream one data archive into its installer, verifying every file
fn install_payload<R: Read>(
    source: ArchiveSource<R>,
    index: usize,
    type_tag: &str,
    update: &UpdateHeader,
    layout: &dyn Layout,
    manifest: Option<&Manifest>,
    handler: &mut dyn Installer,
) -> Result<Vec<DataFile>> {
    let mut archive = tar::Archive::new(source);
    let mut files = Vec::with_capacity(update.files.len());

    for entry in archive.entries().map_err(malformed("data archive"))? {
        let mut entry = entry.map_err(malformed("data archive"))?;
        let name = entry_path(&entry)?;
        let position = files.len();

        let listed = update.files.get(position).ok_or_else(|| {
            ArtifactError::format(format!(
                "data archive {index:04} holds unlisted file '{name}'"
            ))
        })?;
        if *listed != name {
            return Err(ArtifactError::format(format!(
                "data archive {index:04}: expected '{listed}' at position {position}, found '{name}'"
            )));
        }

        let size = entry.header().size().map_err(malformed("data archive"))?;
        let mtime = entry.header().mtime().map_err(malformed("data archive"))?;
        let expected = layout.expected_checksum(manifest, index, update, &name)?;
        let file = DataFile {
            name,
            size,
            modified: mtime_to_datetime(mtime),
            checksum: expected,
        };

        let mut hashing = HashingReader::new(&mut entry);
        handler
            .install(&mut hashing, &file)
            .map_err(|e| ArtifactError::handler(type_tag, e))?;
        let (actual, consumed) = hashing.finish();

        if consumed != size {
            return Err(ArtifactError::format(format!(
                "short transfer for '{}': handler consumed {consumed} of {size} bytes",
                file.name
            )));
        }
        if actual != file.checksum {
            return Err(ArtifactError::ChecksumMismatch {
                file: file.name,
                expected: file.checksum,
                actual,
            });
        }
        debug!(payload = index, file = %file.name, size, "payload file verified");
        files.push(file);
    }

    if let Some(missing) = update.files.get(files.len()) {
        return Err(ArtifactError::format(format!(
            "data archive {index:04} is missing '{missing}'"
        )));
    }
    Ok(files)
}

fn read_metadata<R: Read + ?Sized>(entry: &mut R, path: &str) -> Result<Vec<u8>> {
    read_limited(entry, METADATA_LIMIT, path).map_err(|e| ArtifactError::format(e.to_string()))
}

fn check_digest(file: &str, expected: &str, actual: &str) -> Result<()> {
    if expected != actual {
        return Err(ArtifactError::ChecksumMismatch {
            file: file.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

fn malformed(what: &'static str) -> impl Fn(std::io::Error) -> ArtifactError {
    move |e| ArtifactError::format(format!("malformed {what}: {e}"))
}

fn no_version() -> ArtifactError {
    ArtifactError::format("artifact has no version record")
}
