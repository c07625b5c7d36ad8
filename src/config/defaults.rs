//! Built-in defaults (layer 1)

use serde::{Deserialize, Serialize};

/// Built-in default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Where new artifacts are written (default: "artifact.mender")
    pub output_path: String,

    /// Container format name (default: "mender")
    pub format_name: String,

    /// Container format version (default: 2)
    pub format_version: u32,

    /// Header and data archive compression (default: "gzip")
    pub compression: String,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            output_path: "artifact.mender".to_string(),
            format_name: mender_format::FORMAT_NAME.to_string(),
            format_version: mender_format::LATEST_FORMAT_VERSION,
            compression: "gzip".to_string(),
        }
    }
}

impl BuiltinDefaults {
    /// Convert to JSON Value for merging.
    ///
    /// `scratch_dir` has no default; scratch files go to the system temp dir.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "output_path": self.output_path,
            "format": {
                "name": self.format_name,
                "version": self.format_version,
                "compression": self.compression
            }
        })
    }
}
