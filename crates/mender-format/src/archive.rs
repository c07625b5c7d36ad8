//! Tar plumbing for the outer container and the nested header/data archives.

use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::GzBuilder;
use tar::{Builder, Header};

use crate::error::{ArtifactError, Result};

/// Compression applied to nested header and data archives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    None,
    #[default]
    Gzip,
}

impl Compression {
    /// File name suffix of an archive with this compression
    pub fn suffix(self) -> &'static str {
        match self {
            Self::None => ".tar",
            Self::Gzip => ".tar.gz",
        }
    }

    /// Archive entry name for `stem`, e.g. `header.tar.gz`
    pub fn archive_name(self, stem: &str) -> String {
        format!("{stem}{}", self.suffix())
    }

    /// Recover the compression from an entry name, given its expected stem
    pub fn from_archive_name(name: &str, stem: &str) -> Option<Self> {
        match name.strip_prefix(stem)? {
            ".tar.gz" => Some(Self::Gzip),
            ".tar" => Some(Self::None),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gzip => "gzip",
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Compression {
    type Err = ArtifactError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Self::None),
            "gzip" => Ok(Self::Gzip),
            other => Err(ArtifactError::format(format!(
                "unsupported compression '{other}'"
            ))),
        }
    }
}

/// Sink for a nested archive, optionally gzip-compressed
pub enum ArchiveSink<W: Write> {
    Plain(W),
    Gzip(GzEncoder<W>),
}

impl<W: Write> ArchiveSink<W> {
    pub fn new(inner: W, compression: Compression) -> Self {
        match compression {
            Compression::None => Self::Plain(inner),
            Compression::Gzip => Self::Gzip(
                GzBuilder::new()
                    .mtime(0)
                    .operating_system(255)
                    .write(inner, flate2::Compression::default()),
            ),
        }
    }

    /// Flush compression state and hand back the underlying writer
    pub fn finish(self) -> io::Result<W> {
        match self {
            Self::Plain(w) => Ok(w),
            Self::Gzip(enc) => enc.finish(),
        }
    }
}

impl<W: Write> Write for ArchiveSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(w) => w.write(buf),
            Self::Gzip(enc) => enc.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(w) => w.flush(),
            Self::Gzip(enc) => enc.flush(),
        }
    }
}

/// Source of a nested archive, optionally gzip-compressed
pub enum ArchiveSource<R: Read> {
    Plain(R),
    Gzip(GzDecoder<R>),
}

impl<R: Read> ArchiveSource<R> {
    pub fn new(inner: R, compression: Compression) -> Self {
        match compression {
            Compression::None => Self::Plain(inner),
            Compression::Gzip => Self::Gzip(GzDecoder::new(inner)),
        }
    }
}

impl<R: Read> Read for ArchiveSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(r) => r.read(buf),
            Self::Gzip(dec) => dec.read(buf),
        }
    }
}

/// Create a tar builder writing into a (possibly compressed) nested archive
pub fn nested_builder<W: Write>(inner: W, compression: Compression) -> Builder<ArchiveSink<W>> {
    let mut builder = Builder::new(ArchiveSink::new(inner, compression));
    builder.mode(tar::HeaderMode::Deterministic);
    builder
}

/// Write the tar trailer and compression footer of a nested archive
pub fn finish_nested<W: Write>(builder: Builder<ArchiveSink<W>>) -> io::Result<W> {
    builder.into_inner()?.finish()
}

/// Header with normalized ownership and permissions
pub fn entry_header(size: u64, mtime: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_size(size);
    header.set_mtime(mtime);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mode(0o644);
    header.set_entry_type(tar::EntryType::Regular);
    header
}

/// Append a fully-known entry
pub fn append_bytes<W: Write>(builder: &mut Builder<W>, path: &str, data: &[u8]) -> Result<()> {
    let mut header = entry_header(data.len() as u64, 0);
    builder.append_data(&mut header, path, data)?;
    Ok(())
}

/// Append an entry streamed from `data`, which must yield exactly `size` bytes
pub fn append_stream<W: Write, R: Read>(
    builder: &mut Builder<W>,
    path: &str,
    size: u64,
    mtime: u64,
    data: R,
) -> Result<()> {
    let mut counted = ExactReader::new(data, size);
    let mut header = entry_header(size, mtime);
    builder.append_data(&mut header, path, &mut counted)?;
    counted.check(path)
}

/// Enforces that a source produces exactly the declared number of bytes
struct ExactReader<R> {
    inner: R,
    remaining: u64,
}

impl<R: Read> ExactReader<R> {
    fn new(inner: R, size: u64) -> Self {
        Self {
            inner,
            remaining: size,
        }
    }

    fn check(mut self, path: &str) -> Result<()> {
        if self.remaining > 0 {
            return Err(ArtifactError::format(format!(
                "short write for '{path}': {} bytes missing",
                self.remaining
            )));
        }
        let mut probe = [0u8; 1];
        if self.inner.read(&mut probe)? > 0 {
            return Err(ArtifactError::format(format!(
                "long write for '{path}': source has more bytes than declared"
            )));
        }
        Ok(())
    }
}

impl<R: Read> Read for ExactReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Ok(0);
        }
        let max = (buf.len() as u64).min(self.remaining) as usize;
        let n = self.inner.read(&mut buf[..max])?;
        self.remaining -= n as u64;
        Ok(n)
    }
}

/// Convert a tar mtime to a UTC timestamp
pub fn mtime_to_datetime(mtime: u64) -> DateTime<Utc> {
    Utc.timestamp_opt(mtime as i64, 0)
        .single()
        .unwrap_or_default()
}

/// Path of a tar entry as an owned string
pub fn entry_path<R: Read>(entry: &tar::Entry<'_, R>) -> Result<String> {
    let path = entry
        .path()
        .map_err(|e| ArtifactError::format(format!("invalid entry path: {e}")))?;
    path.to_str()
        .map(str::to_string)
        .ok_or_else(|| ArtifactError::format("entry path is not valid UTF-8"))
}
