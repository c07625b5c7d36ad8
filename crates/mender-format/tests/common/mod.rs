//! Shared fixtures for the codec integration tests.

#![allow(dead_code)]

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use mender_format::{
    ArtifactReader, ArtifactWriter, BoxError, Compression, DataFile, ReadOutcome,
    RootfsInstaller, Scripts, SignatureVerifier, Signer, UpdateFile, WriteReport, WriteRequest,
    rootfs_composer,
};
use sha2::{Digest, Sha256};

pub const DEVICE_TYPE: &str = "qemux86-64";

/// Compute SHA-256 of bytes and return hex string
pub fn compute_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Description of an artifact to build
pub struct Fixture<'a> {
    pub version: u32,
    pub compression: Compression,
    pub name: &'a str,
    /// Per payload, the (file name, content) pairs
    pub payloads: Vec<Vec<(&'a str, Vec<u8>)>>,
    pub scripts: Vec<(&'a str, &'a [u8])>,
}

impl<'a> Fixture<'a> {
    pub fn single(name: &'a str, file: &'a str, content: &[u8]) -> Self {
        Self {
            version: 2,
            compression: Compression::Gzip,
            name,
            payloads: vec![vec![(file, content.to_vec())]],
            scripts: Vec::new(),
        }
    }
}

/// Write `fixture` into memory; update files are created under `dir`
pub fn build(
    dir: &Path,
    fixture: &Fixture<'_>,
    signer: Option<&dyn Signer>,
) -> (Vec<u8>, WriteReport) {
    let mut request = WriteRequest::new(fixture.name, vec![DEVICE_TYPE.to_string()])
        .with_version(fixture.version);

    for (index, files) in fixture.payloads.iter().enumerate() {
        let payload_dir = dir.join(format!("payload-{index}"));
        fs::create_dir_all(&payload_dir).unwrap();
        let update_files = files
            .iter()
            .map(|(name, content)| UpdateFile::new(write_file(&payload_dir, name, content)))
            .collect();
        request
            .updates
            .push(rootfs_composer(fixture.version, update_files).unwrap());
    }

    let mut scripts = Scripts::new();
    for (name, content) in &fixture.scripts {
        scripts.add_inline(name, content.to_vec()).unwrap();
    }
    request.scripts = scripts;

    let mut out = Vec::new();
    let mut writer = ArtifactWriter::new(&mut out).with_compression(fixture.compression);
    if let Some(signer) = signer {
        writer = writer.with_signer(signer);
    }
    let report = writer.write(request).unwrap();
    (out, report)
}

pub fn write_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

/// Everything observed during one read
pub struct Observed {
    pub outcome: ReadOutcome,
    pub installed: Vec<(String, Vec<u8>)>,
    pub scripts: Vec<(String, Vec<u8>)>,
}

/// Read `bytes` with a collecting rootfs handler
pub fn read(bytes: &[u8], verifier: Option<&dyn SignatureVerifier>) -> Observed {
    let mut installed = Vec::new();
    let mut scripts = Vec::new();

    let outcome = {
        let installer = RootfsInstaller::new(
            |data: &mut dyn Read, file: &DataFile| -> Result<(), BoxError> {
                let mut buf = Vec::new();
                data.read_to_end(&mut buf)?;
                installed.push((file.name.clone(), buf));
                Ok(())
            },
        );
        let mut reader = ArtifactReader::new(bytes)
            .with_handler(installer)
            .unwrap()
            .with_script_callback(|content: &mut dyn Read, name: &str| {
                let mut buf = Vec::new();
                content.read_to_end(&mut buf)?;
                scripts.push((name.to_string(), buf));
                Ok(())
            });
        if let Some(verifier) = verifier {
            reader = reader.with_verifier(verifier);
        }
        reader.read()
    };

    Observed {
        outcome,
        installed,
        scripts,
    }
}

/// Entries of the outer container, in order
pub fn unpack_outer(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut archive = tar::Archive::new(bytes);
    let mut entries = Vec::new();
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        let path = entry.path().unwrap().to_string_lossy().to_string();
        let mut content = Vec::new();
        entry.read_to_end(&mut content).unwrap();
        entries.push((path, content));
    }
    entries
}

/// Pack entries into a plain outer container
pub fn pack_outer(entries: Vec<(String, Vec<u8>)>) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, content) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        builder
            .append_data(&mut header, &path, content.as_slice())
            .unwrap();
    }
    builder.into_inner().unwrap()
}

/// Rebuild the outer container, letting `edit` drop or change entries
pub fn rewrite_outer(
    bytes: &[u8],
    edit: impl FnMut((String, Vec<u8>)) -> Option<(String, Vec<u8>)>,
) -> Vec<u8> {
    pack_outer(unpack_outer(bytes).into_iter().filter_map(edit).collect())
}

/// Replace the first occurrence of `needle` in `haystack`
pub fn replace_once(haystack: &mut [u8], needle: &[u8], replacement: &[u8]) {
    assert_eq!(needle.len(), replacement.len());
    let at = haystack
        .windows(needle.len())
        .position(|w| w == needle)
        .expect("needle not found");
    haystack[at..at + needle.len()].copy_from_slice(replacement);
}
