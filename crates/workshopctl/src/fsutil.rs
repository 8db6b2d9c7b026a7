//! Dry-run aware filesystem helpers.

use std::io::Write;
use std::path::Path;

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::context::RunContext;
use crate::error::{Error, Result};

/// Write `contents` to `path`, creating parent directories.
///
/// # Errors
///
/// Returns an error if the directory or file cannot be written.
pub fn write_file(ctx: &RunContext, path: &Path, contents: &[u8]) -> Result<()> {
    if ctx.is_dry_run() {
        info!(
            path = %path.display(),
            contents = %String::from_utf8_lossy(contents),
            "Would write file"
        );
        return Ok(());
    }
    debug!(path = %path.display(), bytes = contents.len(), "Writing file");
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    std::fs::write(path, contents).map_err(|e| Error::io(path, e))
}

/// Like [`write_file`], but a newly created file is readable by the owner
/// only. The mode is set when the file is created, so the contents are
/// never exposed to other users.
///
/// # Errors
///
/// Returns an error if the directory or file cannot be written.
pub fn write_private_file(ctx: &RunContext, path: &Path, contents: &[u8]) -> Result<()> {
    if ctx.is_dry_run() {
        info!(path = %path.display(), bytes = contents.len(), "Would write private file");
        return Ok(());
    }
    debug!(path = %path.display(), bytes = contents.len(), "Writing private file");
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    let mut opts = std::fs::OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    let mut file = opts.open(path).map_err(|e| Error::io(path, e))?;
    file.write_all(contents).map_err(|e| Error::io(path, e))
}

/// Remove a file or directory tree. Missing paths are not an error.
///
/// # Errors
///
/// Returns an error if the path exists but cannot be removed.
pub fn remove_path(ctx: &RunContext, path: &Path) -> Result<()> {
    if ctx.is_dry_run() {
        info!(path = %path.display(), "Would delete path");
        return Ok(());
    }
    debug!(path = %path.display(), "Deleting path");
    let result = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    match result {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(Error::io(path, e)),
        _ => Ok(()),
    }
}

/// Copy a file or a whole directory tree from `from` to `to`.
///
/// # Errors
///
/// Returns an error if any entry cannot be read or written.
pub fn copy_path(from: &Path, to: &Path) -> Result<()> {
    debug!(from = %from.display(), to = %to.display(), "Copying");
    if from.is_file() {
        if let Some(parent) = to.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        std::fs::copy(from, to).map_err(|e| Error::io(from, e))?;
        return Ok(());
    }

    for entry in WalkDir::new(from) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(from).to_path_buf();
            Error::io(path, e.into())
        })?;
        let rel = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| Error::config(e.to_string()))?;
        let target = to.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| Error::io(&target, e))?;
        } else {
            std::fs::copy(entry.path(), &target).map_err(|e| Error::io(entry.path(), e))?;
        }
    }
    Ok(())
}
