//! Documents carried inside the header archive.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ArtifactError, Result};

/// Entry stem of the header archive in the outer container
pub const HEADER_STEM: &str = "header";

/// First entry of the header archive
pub const HEADER_INFO_ENTRY: &str = "header-info";

/// Prefix of per-payload header directories
pub const UPDATE_HEADERS_PREFIX: &str = "headers/";

/// Per-payload file list entry
pub const FILES_ENTRY: &str = "files";

/// Per-payload type entry
pub const TYPE_INFO_ENTRY: &str = "type-info";

/// Optional per-payload metadata entry, ignored by this reader
pub const META_DATA_ENTRY: &str = "meta-data";

/// Hard limit for metadata entries read into memory
pub const METADATA_LIMIT: u64 = 1024 * 1024;

/// Hard limit for a single state script
pub const SCRIPT_LIMIT: u64 = 10 * 1024 * 1024;

/// Directory of payload `index` inside the header archive
pub fn update_dir(index: usize) -> String {
    format!("{UPDATE_HEADERS_PREFIX}{index:04}/")
}

/// Stem of data archive `index` in the outer container
pub fn data_stem(index: usize) -> String {
    format!("data/{index:04}")
}

/// Type declaration of one payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateType {
    #[serde(rename = "type")]
    pub type_tag: String,
}

/// Contents of `header-info`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderInfo {
    pub artifact_name: String,
    pub device_types_compatible: Vec<String>,
    pub updates: Vec<UpdateType>,
}

impl HeaderInfo {
    /// Structural checks applied on both the write and the read path
    pub fn check(&self) -> Result<()> {
        validate_artifact_name(&self.artifact_name)?;
        validate_device_types(&self.device_types_compatible)?;
        if self.updates.is_empty() {
            return Err(ArtifactError::version_constraint(
                "artifact must contain at least one update",
            ));
        }
        Ok(())
    }
}

/// Contents of `headers/NNNN/files`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesList {
    pub files: Vec<String>,
}

/// Contents of `headers/NNNN/type-info`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeInfo {
    #[serde(rename = "type")]
    pub type_tag: String,
}

/// Per-payload header state accumulated while decoding
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateHeader {
    pub type_tag: Option<String>,
    pub files: Vec<String>,
    /// File checksums carried in the header itself (version 1 only)
    pub checksums: BTreeMap<String, String>,
}

/// Encode a header document in canonical JSON
pub fn encode_document<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json_canonicalizer::to_vec(value)
        .map_err(|e| ArtifactError::format(format!("can not encode header document: {e}")))
}

/// Decode a header document, reporting failures as format errors
pub fn decode_document<T: for<'de> Deserialize<'de>>(bytes: &[u8], what: &str) -> Result<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| ArtifactError::format(format!("malformed {what}: {e}")))
}

/// Artifact names are a single non-empty token
pub fn validate_artifact_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ArtifactError::version_constraint("artifact name is empty"));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(ArtifactError::version_constraint(
            "whitespace is not allowed in the artifact name",
        ));
    }
    Ok(())
}

/// At least one device type, none of them blank
pub fn validate_device_types(device_types: &[String]) -> Result<()> {
    if device_types.is_empty() {
        return Err(ArtifactError::version_constraint(
            "at least one compatible device type is required",
        ));
    }
    if device_types.iter().any(|d| d.trim().is_empty()) {
        return Err(ArtifactError::version_constraint(
            "device types must not be empty",
        ));
    }
    Ok(())
}

/// Split `headers/NNNN/rest` into the payload index and `rest`
pub fn parse_update_path(path: &str) -> Result<(usize, &str)> {
    let malformed = || ArtifactError::format(format!("malformed header entry '{path}'"));
    let tail = path.strip_prefix(UPDATE_HEADERS_PREFIX).ok_or_else(malformed)?;
    let (index, rest) = tail.split_once('/').ok_or_else(malformed)?;
    if index.len() != 4 || !index.bytes().all(|b| b.is_ascii_digit()) || rest.is_empty() {
        return Err(malformed());
    }
    let index = index.parse().map_err(|_| malformed())?;
    Ok((index, rest))
}
