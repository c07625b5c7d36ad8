//! Streaming SHA-256 helpers shared by the reader and the writer.

use std::io::{self, Read, Write};

use sha2::{Digest, Sha256};

/// Size of the bounded copy buffer used for payload bytes
pub const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Compute the hex SHA-256 of a byte slice
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Reader adapter that hashes and counts every byte passing through it
pub struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
    count: u64,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            count: 0,
        }
    }

    /// Read and hash everything left in the inner reader
    pub fn drain(&mut self) -> io::Result<u64> {
        copy_bounded(self, &mut io::sink())
    }

    /// Hex digest of the bytes read so far
    pub fn finish(self) -> (String, u64) {
        (hex::encode(self.hasher.finalize()), self.count)
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.count += n as u64;
        Ok(n)
    }
}

/// Copy `reader` into `writer` through a fixed-size buffer.
///
/// Unlike `io::copy` the buffer size is pinned so payload handling stays
/// bounded no matter which reader and writer are plugged in.
pub fn copy_bounded<R: Read + ?Sized, W: Write + ?Sized>(
    reader: &mut R,
    writer: &mut W,
) -> io::Result<u64> {
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buf[..n])?;
        total += n as u64;
    }
}

/// Read at most `limit` bytes, failing if the source holds more
pub fn read_limited<R: Read>(reader: R, limit: u64, what: &str) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader.take(limit + 1).read_to_end(&mut buf)?;
    if buf.len() as u64 > limit {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{what} exceeds limit of {limit} bytes"),
        ));
    }
    Ok(buf)
}
