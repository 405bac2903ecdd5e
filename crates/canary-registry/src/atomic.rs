//! Whole-file atomic replacement
//!
//! Content is written to a temporary file in the target's directory, flushed
//! to disk, then renamed over the target. A crash mid-write leaves either the
//! old file or the new one, never a truncated mix.

use crate::error::{RegistryError, RegistryResult};
use std::io::Write;
use std::path::Path;

pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> RegistryResult<()> {
    let write_err = |source: std::io::Error| RegistryError::Write {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(write_err)?;

    let mut temp = tempfile::Builder::new()
        .prefix(".mcp-servers.")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(write_err)?;
    temp.write_all(contents).map_err(write_err)?;
    temp.as_file().sync_all().map_err(write_err)?;

    // Dropping a failed persist removes the temp file.
    temp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}
