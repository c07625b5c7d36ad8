//! Full root filesystem image payloads.
//!
//! Version 1 and version 2 artifacts carry the same data but declare it
//! differently: version 1 records file checksums in the payload header,
//! version 2 relies on the artifact manifest instead.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use super::{Composer, DataFile, DataSink, Installer};
use crate::error::{ArtifactError, BoxError, Result};
use crate::header::{encode_document, FilesList, TypeInfo, FILES_ENTRY, TYPE_INFO_ENTRY};

/// Type tag of root filesystem image payloads
pub const ROOTFS_IMAGE_TYPE: &str = "rootfs-image";

/// A file on disk to be packed as part of a payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateFile {
    path: PathBuf,
    name: Option<String>,
    modified: Option<DateTime<Utc>>,
}

impl UpdateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            name: None,
            modified: None,
        }
    }

    /// Store the file under `name` instead of its own file name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Record `modified` instead of the file's own modification time
    pub fn with_modified(mut self, modified: DateTime<Utc>) -> Self {
        self.modified = Some(modified);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Name the file is stored under
    pub fn name(&self) -> Result<String> {
        if let Some(name) = &self.name {
            return Ok(name.clone());
        }
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| {
                ArtifactError::format(format!(
                    "update file '{}' has no usable file name",
                    self.path.display()
                ))
            })
    }

    fn append_to(&self, sink: &mut DataSink) -> Result<DataFile> {
        let name = self.name()?;
        let file = File::open(&self.path)?;
        let metadata = file.metadata()?;
        let modified = match self.modified {
            Some(modified) => modified,
            None => DateTime::<Utc>::from(metadata.modified()?),
        };
        sink.add_file(&name, metadata.len(), modified, file)
    }
}

fn compose_files(files: &[UpdateFile], sink: &mut DataSink) -> Result<Vec<DataFile>> {
    if files.is_empty() {
        return Err(ArtifactError::version_constraint(
            "a rootfs-image update needs at least one file",
        ));
    }
    files.iter().map(|f| f.append_to(sink)).collect()
}

fn common_header_entries(files: &[DataFile]) -> Result<Vec<(String, Vec<u8>)>> {
    let list = FilesList {
        files: files.iter().map(|f| f.name.clone()).collect(),
    };
    let type_info = TypeInfo {
        type_tag: ROOTFS_IMAGE_TYPE.to_string(),
    };
    Ok(vec![
        (FILES_ENTRY.to_string(), encode_document(&list)?),
        (TYPE_INFO_ENTRY.to_string(), encode_document(&type_info)?),
    ])
}

/// Root filesystem payload in the version 1 header shape
#[derive(Debug, Clone)]
pub struct RootfsV1 {
    files: Vec<UpdateFile>,
}

impl RootfsV1 {
    pub fn new(file: UpdateFile) -> Self {
        Self { files: vec![file] }
    }

    pub fn with_files(files: Vec<UpdateFile>) -> Self {
        Self { files }
    }
}

impl Composer for RootfsV1 {
    fn type_tag(&self) -> &str {
        ROOTFS_IMAGE_TYPE
    }

    fn format_version(&self) -> u32 {
        1
    }

    fn compose(&self, sink: &mut DataSink) -> Result<Vec<DataFile>> {
        compose_files(&self.files, sink)
    }

    fn header_entries(&self, files: &[DataFile]) -> Result<Vec<(String, Vec<u8>)>> {
        let mut entries = common_header_entries(files)?;
        for file in files {
            entries.push((
                format!("checksums/{}.sha256", file.name),
                file.checksum.clone().into_bytes(),
            ));
        }
        Ok(entries)
    }
}

/// Root filesystem payload in the version 2 header shape
#[derive(Debug, Clone)]
pub struct RootfsV2 {
    files: Vec<UpdateFile>,
}

impl RootfsV2 {
    pub fn new(file: UpdateFile) -> Self {
        Self { files: vec![file] }
    }

    pub fn with_files(files: Vec<UpdateFile>) -> Self {
        Self { files }
    }
}

impl Composer for RootfsV2 {
    fn type_tag(&self) -> &str {
        ROOTFS_IMAGE_TYPE
    }

    fn format_version(&self) -> u32 {
        2
    }

    fn compose(&self, sink: &mut DataSink) -> Result<Vec<DataFile>> {
        compose_files(&self.files, sink)
    }

    fn header_entries(&self, files: &[DataFile]) -> Result<Vec<(String, Vec<u8>)>> {
        common_header_entries(files)
    }
}

/// Pick the rootfs composer variant for a format version
pub fn rootfs_composer(version: u32, files: Vec<UpdateFile>) -> Result<Box<dyn Composer>> {
    match version {
        1 => Ok(Box::new(RootfsV1::with_files(files))),
        2 => Ok(Box::new(RootfsV2::with_files(files))),
        other => Err(ArtifactError::version_constraint(format!(
            "unsupported artifact version: {other}"
        ))),
    }
}

/// Rootfs installer delegating each file to a callback
pub struct RootfsInstaller<F> {
    on_install: F,
}

impl<F> RootfsInstaller<F>
where
    F: FnMut(&mut dyn Read, &DataFile) -> std::result::Result<(), BoxError>,
{
    pub fn new(on_install: F) -> Self {
        Self { on_install }
    }
}

/// Installer that reads and discards the payload, leaving only verification
pub fn discarding_installer() -> RootfsInstaller<
    impl FnMut(&mut dyn Read, &DataFile) -> std::result::Result<(), BoxError>,
> {
    RootfsInstaller::new(|data: &mut dyn Read, _file: &DataFile| {
        std::io::copy(data, &mut std::io::sink())?;
        Ok(())
    })
}

impl<F> Installer for RootfsInstaller<F>
where
    F: FnMut(&mut dyn Read, &DataFile) -> std::result::Result<(), BoxError>,
{
    fn type_tag(&self) -> &str {
        ROOTFS_IMAGE_TYPE
    }

    fn install(
        &mut self,
        data: &mut dyn Read,
        file: &DataFile,
    ) -> std::result::Result<(), BoxError> {
        (self.on_install)(data, file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::Compression;
    use crate::checksum::sha256_hex;
    use std::fs;

    fn update_file(dir: &Path, name: &str, content: &[u8]) -> UpdateFile {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        UpdateFile::new(path)
    }

    #[test]
    fn test_v2_header_has_no_checksums() {
        let dir = tempfile::TempDir::new().unwrap();
        let composer = RootfsV2::new(update_file(dir.path(), "rootfs.ext4", b"abc"));
        let mut sink = DataSink::new(tempfile::tempfile().unwrap(), Compression::None);
        let files = composer.compose(&mut sink).unwrap();

        let entries = composer.header_entries(&files).unwrap();
        let names: Vec<_> = entries.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["files", "type-info"]);
        assert_eq!(entries[0].1, br#"{"files":["rootfs.ext4"]}"#);
    }

    #[test]
    fn test_v1_header_carries_checksums() {
        let dir = tempfile::TempDir::new().unwrap();
        let composer = RootfsV1::new(update_file(dir.path(), "rootfs.ext4", b"abc"));
        let mut sink = DataSink::new(tempfile::tempfile().unwrap(), Compression::None);
        let files = composer.compose(&mut sink).unwrap();

        let entries = composer.header_entries(&files).unwrap();
        let (name, content) = entries.last().unwrap();
        assert_eq!(name, "checksums/rootfs.ext4.sha256");
        assert_eq!(content, &sha256_hex(b"abc").into_bytes());
    }

    #[test]
    fn test_name_and_mtime_overrides() {
        let dir = tempfile::TempDir::new().unwrap();
        let modified = DateTime::parse_from_rfc3339("2020-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);
        let file = update_file(dir.path(), "tmp123", b"payload")
            .with_name("rootfs.ext4")
            .with_modified(modified);

        let mut sink = DataSink::new(tempfile::tempfile().unwrap(), Compression::Gzip);
        let files = RootfsV2::new(file).compose(&mut sink).unwrap();
        assert_eq!(files[0].name, "rootfs.ext4");
        assert_eq!(files[0].modified, modified);
    }

    #[test]
    fn test_composer_selection() {
        assert_eq!(rootfs_composer(1, vec![]).unwrap().format_version(), 1);
        assert_eq!(rootfs_composer(2, vec![]).unwrap().format_version(), 2);
        assert!(matches!(
            rootfs_composer(3, vec![]),
            Err(ArtifactError::VersionConstraint(_))
        ));
    }

    #[test]
    fn test_empty_file_list_rejected() {
        let mut sink = DataSink::new(tempfile::tempfile().unwrap(), Compression::None);
        assert!(RootfsV2::with_files(vec![]).compose(&mut sink).is_err());
    }
}
