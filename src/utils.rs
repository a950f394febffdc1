use std::io::{ErrorKind, Write};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tempfile::NamedTempFile;
use uuid::Uuid;

/// Generate a new single-use token.
pub fn new_token() -> String {
    Uuid::new_v4().to_string()
}

/// Read the given file, returning `None` if it does not exist.
pub fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(data) => Ok(Some(data)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("error reading {}", path.display())),
    }
}

/// Write the given data to `path`, atomically replacing any previous content.
///
/// The data is written to a temp file in the destination directory, synced, and then renamed
/// into place, so readers observe either the old or the new content in full.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| anyhow!("path {} has no parent directory", path.display()))?;
    std::fs::create_dir_all(dir).with_context(|| format!("error creating dir {}", dir.display()))?;
    let mut tmp = NamedTempFile::new_in(dir).with_context(|| format!("error creating temp file in {}", dir.display()))?;
    tmp.write_all(data).context("error writing temp file")?;
    tmp.as_file().sync_all().context("error syncing temp file")?;
    tmp.persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("error moving temp file into place at {}", path.display()))?;
    Ok(())
}
