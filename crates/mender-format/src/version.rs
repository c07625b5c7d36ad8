//! Container framing: the `version` record that opens every artifact.

use serde::{Deserialize, Serialize};

use crate::error::{ArtifactError, Result};

/// Outer entry name of the version record
pub const VERSION_ENTRY: &str = "version";

/// Format identifier written into every artifact
pub const FORMAT_NAME: &str = "mender";

/// Newest supported format version, also the default for new artifacts
pub const LATEST_FORMAT_VERSION: u32 = 2;

/// Supported format versions
pub const SUPPORTED_VERSIONS: &[u32] = &[1, 2];

/// Format identity carried by the version record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatInfo {
    /// Format identifier (always "mender")
    pub format: String,

    /// Format version (1 or 2)
    pub version: u32,
}

impl FormatInfo {
    /// Create format info after checking the version is supported
    pub fn new(format: &str, version: u32) -> Result<Self> {
        let info = Self {
            format: format.to_string(),
            version,
        };
        info.check()?;
        Ok(info)
    }

    /// Encode the version record in its canonical form
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json_canonicalizer::to_vec(self)
            .map_err(|e| ArtifactError::format(format!("can not encode version record: {e}")))
    }

    /// Decode and validate a version record
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let info: FormatInfo = serde_json::from_slice(bytes)
            .map_err(|e| ArtifactError::format(format!("malformed version record: {e}")))?;
        info.check()?;
        Ok(info)
    }

    fn check(&self) -> Result<()> {
        if self.format != FORMAT_NAME {
            return Err(ArtifactError::format(format!(
                "unsupported artifact format '{}'",
                self.format
            )));
        }
        if !SUPPORTED_VERSIONS.contains(&self.version) {
            return Err(ArtifactError::format(format!(
                "unsupported artifact version: {}",
                self.version
            )));
        }
        Ok(())
    }
}
