//! Artifact manifest: the canonical checksum list a signature covers.
//!
//! One line per item, `<sha256-hex>  <path>\n`, sorted by path. The same
//! bytes are produced on the write path and re-derived on the read path, so
//! a signature over them is meaningful in both directions.

use std::collections::BTreeMap;

use crate::error::{ArtifactError, Result};

/// Outer entry name of the manifest
pub const MANIFEST_ENTRY: &str = "manifest";

/// Outer entry name of the detached manifest signature
pub const SIGNATURE_ENTRY: &str = "manifest.sig";

/// Manifest path of data file `name` inside payload `index`
pub fn data_file_path(index: usize, name: &str) -> String {
    format!("data/{index:04}/{name}")
}

/// Ordered set of checksums keyed by artifact path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: BTreeMap<String, String>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a checksum; a path may only be recorded once
    pub fn insert(&mut self, path: impl Into<String>, checksum: impl Into<String>) -> Result<()> {
        let path = path.into();
        if path.is_empty() || path.chars().any(char::is_whitespace) {
            return Err(ArtifactError::format(format!(
                "invalid manifest path '{path}'"
            )));
        }
        if self.entries.contains_key(&path) {
            return Err(ArtifactError::format(format!(
                "duplicate manifest entry '{path}'"
            )));
        }
        self.entries.insert(path, checksum.into());
        Ok(())
    }

    /// Look up the checksum recorded for `path`
    pub fn get(&self, path: &str) -> Option<&str> {
        self.entries.get(path).map(String::as_str)
    }

    /// Like [`Manifest::get`] but a missing entry is a format error
    pub fn require(&self, path: &str) -> Result<&str> {
        self.get(path)
            .ok_or_else(|| ArtifactError::format(format!("manifest has no entry for '{path}'")))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate `(path, checksum)` pairs in canonical order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(p, c)| (p.as_str(), c.as_str()))
    }

    /// Canonical byte form
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = String::new();
        for (path, checksum) in &self.entries {
            out.push_str(checksum);
            out.push_str("  ");
            out.push_str(path);
            out.push('\n');
        }
        out.into_bytes()
    }

    /// Parse manifest bytes, requiring them to be in canonical form
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| ArtifactError::format("manifest is not valid UTF-8"))?;

        let mut manifest = Self::new();
        for (lineno, line) in text.lines().enumerate() {
            let (checksum, path) = line.split_once("  ").ok_or_else(|| {
                ArtifactError::format(format!("malformed manifest line {}", lineno + 1))
            })?;
            if checksum.len() != 64 || !checksum.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(ArtifactError::format(format!(
                    "malformed checksum on manifest line {}",
                    lineno + 1
                )));
            }
            manifest.insert(path, checksum.to_ascii_lowercase())?;
        }

        if manifest.to_bytes() != bytes {
            return Err(ArtifactError::format("manifest is not in canonical form"));
        }
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::sha256_hex;

    fn sample() -> Manifest {
        let mut m = Manifest::new();
        m.insert("version", sha256_hex(b"v")).unwrap();
        m.insert(data_file_path(0, "rootfs.ext4"), sha256_hex(b"data"))
            .unwrap();
        m.insert("header.tar.gz", sha256_hex(b"h")).unwrap();
        m
    }

    #[test]
    fn test_lines_sorted_by_path() {
        let text = String::from_utf8(sample().to_bytes()).unwrap();
        let paths: Vec<_> = text
            .lines()
            .map(|l| l.split_once("  ").unwrap().1)
            .collect();
        assert_eq!(paths, vec!["data/0000/rootfs.ext4", "header.tar.gz", "version"]);
    }

    #[test]
    fn test_parse_reproduces_bytes() {
        let bytes = sample().to_bytes();
        let parsed = Manifest::parse(&bytes).unwrap();
        assert_eq!(parsed, sample());
        assert_eq!(parsed.to_bytes(), bytes);
    }

    #[test]
    fn test_non_canonical_rejected() {
        let mut lines: Vec<_> = String::from_utf8(sample().to_bytes())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect();
        lines.reverse();
        let reordered = lines.join("\n") + "\n";
        assert!(Manifest::parse(reordered.as_bytes()).is_err());
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut m = Manifest::new();
        m.insert("version", "a".repeat(64)).unwrap();
        assert!(m.insert("version", "b".repeat(64)).is_err());
    }

    #[test]
    fn test_require_missing_entry() {
        let err = sample().require("data/0001/other").unwrap_err();
        assert!(matches!(err, ArtifactError::Format(_)));
    }

    #[test]
    fn test_malformed_checksum() {
        assert!(Manifest::parse(b"xyz  version\n").is_err());
    }
}
