//! Version-specific container rules.
//!
//! The version probe picks one [`Layout`] and every later decision about
//! manifests, signatures, scripts and where checksums live goes through it.

use crate::error::{ArtifactError, Result};
use crate::header::UpdateHeader;
use crate::manifest::{data_file_path, Manifest};

pub trait Layout {
    fn version(&self) -> u32;

    /// Whether a manifest must precede the header archive
    fn has_manifest(&self) -> bool;

    /// Whether a manifest signature may be attached
    fn allows_signature(&self) -> bool;

    /// Whether state scripts may be bundled in the header
    fn allows_scripts(&self) -> bool;

    /// Handle a version-specific `headers/NNNN/<rest>` entry
    fn decode_update_entry(&self, rest: &str, content: &[u8], update: &mut UpdateHeader)
        -> Result<()>;

    /// Checksum recorded for file `name` of payload `index`
    fn expected_checksum(
        &self,
        manifest: Option<&Manifest>,
        index: usize,
        update: &UpdateHeader,
        name: &str,
    ) -> Result<String>;
}

/// Select the layout for a probed version
pub fn layout_for(version: u32) -> Result<Box<dyn Layout>> {
    match version {
        1 => Ok(Box::new(LayoutV1)),
        2 => Ok(Box::new(LayoutV2)),
        other => Err(ArtifactError::format(format!(
            "unsupported artifact version: {other}"
        ))),
    }
}

/// Version 1: no manifest, no signature, no scripts; checksums in the header
#[derive(Debug, Clone, Copy)]
pub struct LayoutV1;

impl Layout for LayoutV1 {
    fn version(&self) -> u32 {
        1
    }

    fn has_manifest(&self) -> bool {
        false
    }

    fn allows_signature(&self) -> bool {
        false
    }

    fn allows_scripts(&self) -> bool {
        false
    }

    fn decode_update_entry(
        &self,
        rest: &str,
        content: &[u8],
        update: &mut UpdateHeader,
    ) -> Result<()> {
        let name = rest
            .strip_prefix("checksums/")
            .and_then(|r| r.strip_suffix(".sha256"))
            .filter(|n| !n.is_empty() && !n.contains('/'))
            .ok_or_else(|| ArtifactError::format(format!("unexpected header entry '{rest}'")))?;

        let checksum = std::str::from_utf8(content)
            .map(str::trim)
            .map_err(|_| ArtifactError::format(format!("checksum of '{name}' is not text")))?;
        if checksum.len() != 64 || !checksum.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ArtifactError::format(format!(
                "malformed checksum for '{name}'"
            )));
        }
        if update
            .checksums
            .insert(name.to_string(), checksum.to_ascii_lowercase())
            .is_some()
        {
            return Err(ArtifactError::format(format!(
                "duplicate checksum for '{name}'"
            )));
        }
        Ok(())
    }

    fn expected_checksum(
        &self,
        _manifest: Option<&Manifest>,
        _index: usize,
        update: &UpdateHeader,
        name: &str,
    ) -> Result<String> {
        update
            .checksums
            .get(name)
            .cloned()
            .ok_or_else(|| ArtifactError::format(format!("header has no checksum for '{name}'")))
    }
}

/// Version 2: manifest-covered, optionally signed, may carry scripts
#[derive(Debug, Clone, Copy)]
pub struct LayoutV2;

impl Layout for LayoutV2 {
    fn version(&self) -> u32 {
        2
    }

    fn has_manifest(&self) -> bool {
        true
    }

    fn allows_signature(&self) -> bool {
        true
    }

    fn allows_scripts(&self) -> bool {
        true
    }

    fn decode_update_entry(
        &self,
        rest: &str,
        _content: &[u8],
        _update: &mut UpdateHeader,
    ) -> Result<()> {
        Err(ArtifactError::format(format!(
            "unexpected header entry '{rest}'"
        )))
    }

    fn expected_checksum(
        &self,
        manifest: Option<&Manifest>,
        index: usize,
        _update: &UpdateHeader,
        name: &str,
    ) -> Result<String> {
        let manifest =
            manifest.ok_or_else(|| ArtifactError::format("artifact has no manifest"))?;
        manifest
            .require(&data_file_path(index, name))
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::sha256_hex;

    #[test]
    fn test_layout_selection() {
        assert_eq!(layout_for(1).unwrap().version(), 1);
        assert!(layout_for(2).unwrap().has_manifest());
        assert!(layout_for(7).is_err());
    }

    #[test]
    fn test_v1_reads_checksums_from_header() {
        let digest = sha256_hex(b"x");
        let mut update = UpdateHeader::default();
        LayoutV1
            .decode_update_entry(
                "checksums/rootfs.ext4.sha256",
                format!("{digest}\n").as_bytes(),
                &mut update,
            )
            .unwrap();
        assert_eq!(
            LayoutV1
                .expected_checksum(None, 0, &update, "rootfs.ext4")
                .unwrap(),
            digest
        );
        assert!(LayoutV1.expected_checksum(None, 0, &update, "other").is_err());
    }

    #[test]
    fn test_v1_rejects_unknown_entries() {
        let mut update = UpdateHeader::default();
        assert!(LayoutV1
            .decode_update_entry("signatures/x", b"", &mut update)
            .is_err());
        assert!(LayoutV1
            .decode_update_entry("checksums/x.sha256", b"nothex", &mut update)
            .is_err());
    }

    #[test]
    fn test_v2_reads_checksums_from_manifest() {
        let mut manifest = Manifest::new();
        manifest
            .insert(data_file_path(1, "rootfs.ext4"), sha256_hex(b"y"))
            .unwrap();
        let update = UpdateHeader::default();
        assert_eq!(
            LayoutV2
                .expected_checksum(Some(&manifest), 1, &update, "rootfs.ext4")
                .unwrap(),
            sha256_hex(b"y")
        );
        assert!(LayoutV2
            .expected_checksum(Some(&manifest), 0, &update, "rootfs.ext4")
            .is_err());
        assert!(LayoutV2
            .decode_update_entry("checksums/a.sha256", b"", &mut UpdateHeader::default())
            .is_err());
    }
}
