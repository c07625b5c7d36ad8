//! Payload handlers.
//!
//! A [`Composer`] produces the data archive of one payload when writing; an
//! [`Installer`] consumes it when reading. Both are supplied by the caller;
//! the codec only drives them.

mod rootfs;

pub use rootfs::{
    discarding_installer, rootfs_composer, RootfsInstaller, RootfsV1, RootfsV2, UpdateFile,
    ROOTFS_IMAGE_TYPE,
};

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;

use chrono::{DateTime, Utc};

use crate::archive::{
    append_stream, finish_nested, mtime_to_datetime, nested_builder, ArchiveSink, Compression,
};
use crate::checksum::HashingReader;
use crate::error::{ArtifactError, BoxError, Result};

/// One file of a payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFile {
    pub name: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
    /// Hex SHA-256 of the file content
    pub checksum: String,
}

/// Write side of a payload type
pub trait Composer {
    /// Payload type tag written to the header
    fn type_tag(&self) -> &str;

    /// Artifact format version whose header shape this composer emits
    fn format_version(&self) -> u32;

    /// Stream the payload's files into `sink`, returning them in write order
    fn compose(&self, sink: &mut DataSink) -> Result<Vec<DataFile>>;

    /// Entries for `headers/NNNN/`, as `(relative name, content)` pairs
    fn header_entries(&self, files: &[DataFile]) -> Result<Vec<(String, Vec<u8>)>>;
}

/// Read side of a payload type
pub trait Installer {
    fn type_tag(&self) -> &str;

    /// Consume exactly `file.size` bytes of `data`
    fn install(
        &mut self,
        data: &mut dyn Read,
        file: &DataFile,
    ) -> std::result::Result<(), BoxError>;
}

/// Data archive under construction for one payload.
///
/// Every file added is hashed as it is copied, so the returned
/// [`DataFile`] describes exactly the bytes that were written.
pub struct DataSink {
    builder: tar::Builder<ArchiveSink<File>>,
    files: Vec<DataFile>,
}

impl DataSink {
    pub fn new(scratch: File, compression: Compression) -> Self {
        Self {
            builder: nested_builder(scratch, compression),
            files: Vec::new(),
        }
    }

    /// Append one file; `data` must yield exactly `size` bytes.
    ///
    /// Tar headers carry unsigned mtimes, so a time before 1970 is rejected.
    pub fn add_file<R: Read>(
        &mut self,
        name: &str,
        size: u64,
        modified: DateTime<Utc>,
        data: R,
    ) -> Result<DataFile> {
        validate_file_name(name)?;
        if self.files.iter().any(|f| f.name == name) {
            return Err(ArtifactError::format(format!(
                "duplicate data file name '{name}'"
            )));
        }

        let mtime = u64::try_from(modified.timestamp()).map_err(|_| {
            ArtifactError::format(format!(
                "modification time of '{name}' predates the unix epoch"
            ))
        })?;
        let mut hashing = HashingReader::new(data);
        append_stream(&mut self.builder, name, size, mtime, &mut hashing)?;
        let (checksum, _) = hashing.finish();

        let file = DataFile {
            name: name.to_string(),
            size,
            modified: mtime_to_datetime(mtime),
            checksum,
        };
        self.files.push(file.clone());
        Ok(file)
    }

    /// Files appended so far, in order
    pub fn files(&self) -> &[DataFile] {
        &self.files
    }

    /// Close the archive and return the scratch file with what was written
    pub fn finish(self) -> Result<(File, Vec<DataFile>)> {
        let file = finish_nested(self.builder)?;
        Ok((file, self.files))
    }
}

fn validate_file_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.chars().any(char::is_whitespace)
    {
        return Err(ArtifactError::format(format!(
            "invalid data file name '{name}'"
        )));
    }
    Ok(())
}

/// Installers keyed by payload type, registered before reading
#[derive(Default)]
pub struct HandlerRegistry<'a> {
    handlers: BTreeMap<String, Box<dyn Installer + 'a>>,
}

impl<'a> HandlerRegistry<'a> {
    pub fn new() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }

    /// Register an installer; one per type tag
    pub fn register(&mut self, handler: Box<dyn Installer + 'a>) -> Result<()> {
        let tag = handler.type_tag().to_string();
        if self.handlers.contains_key(&tag) {
            return Err(ArtifactError::DuplicateHandler(tag));
        }
        self.handlers.insert(tag, handler);
        Ok(())
    }

    /// Installer for `type_tag`, or `UnsupportedPayloadType`
    pub fn get_mut(&mut self, type_tag: &str) -> Result<&mut (dyn Installer + 'a)> {
        match self.handlers.get_mut(type_tag) {
            Some(handler) => Ok(handler.as_mut()),
            None => Err(ArtifactError::UnsupportedPayloadType(type_tag.to_string())),
        }
    }
}
