//! Atomic placement of command output.
//!
//! Output is produced into a temporary file in the destination directory
//! and renamed over the destination only once it is complete. A failed
//! producer leaves the destination untouched and removes the temporary.

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use tempfile::NamedTempFile;

/// Run `produce` against a temporary file next to `dest`, then rename it
/// into place
pub fn place_atomically<T, E, F>(dest: &Path, produce: F) -> Result<T, E>
where
    F: FnOnce(&mut dyn Write) -> Result<T, E>,
    E: From<io::Error>,
{
    let dir = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut out = BufWriter::new(NamedTempFile::new_in(dir)?);
    let value = produce(&mut out)?;
    let temp = out.into_inner().map_err(|e| e.into_error())?;

    // Keep the mode of a file being replaced, otherwise use the usual 0644
    match fs::metadata(dest) {
        Ok(existing) => temp.as_file().set_permissions(existing.permissions())?,
        Err(_) => set_default_permissions(temp.as_file())?,
    }
    temp.as_file().sync_all()?;
    temp.persist(dest).map_err(|e| e.error)?;

    tracing::debug!(path = %dest.display(), "output placed");
    Ok(value)
}

#[cfg(unix)]
fn set_default_permissions(file: &fs::File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn set_default_permissions(_file: &fs::File) -> io::Result<()> {
    Ok(())
}
