//! Primitive file operations. The only code that mutates durable storage.
//!
//! No retries: each operation maps onto one filesystem primitive and reports
//! its failure unmodified.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use crate::error::{Result, StorageError};

/// Prefix for in-flight temp files. Leading dot keeps them out of every index.
const TEMP_PREFIX: &str = ".wikistore-";

#[derive(Debug, Clone, Copy, Default)]
pub struct ContentStore;

impl ContentStore {
    pub fn new() -> Self {
        Self
    }

    /// Writes `bytes` to `path`, creating parent directories as needed.
    ///
    /// The content goes to a sibling temp file (owner read/write only) that
    /// is renamed over `path`, so readers see either the old or the new file.
    pub fn write(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let parent = ensure_parent_dir(path)?;

        let mut temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(parent)
            .map_err(|error| StorageError::from_io(parent, error))?;
        temp.write_all(bytes)
            .and_then(|()| temp.as_file().sync_all())
            .map_err(|error| StorageError::from_io(path, error))?;
        restrict_permissions(temp.path())?;
        temp.persist(path)
            .map_err(|error| StorageError::from_io(path, error.error))?;

        log::debug!("wiki store write path={} bytes={}", path.display(), bytes.len());
        Ok(())
    }

    /// Removes the file at `path`. A missing file is reported as `NotFound`.
    pub fn delete(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).map_err(|error| StorageError::from_io(path, error))?;
        log::debug!("wiki store delete path={}", path.display());
        Ok(())
    }

    /// Moves `from` to `to`, creating the destination's parent directories.
    pub fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::symlink_metadata(from).map_err(|error| StorageError::from_io(from, error))?;
        ensure_parent_dir(to)?;
        fs::rename(from, to).map_err(|error| StorageError::from_io(from, error))?;
        log::debug!(
            "wiki store rename from={} to={}",
            from.display(),
            to.display()
        );
        Ok(())
    }

    /// Like [`rename`](Self::rename) but never replaces an existing `to`:
    /// the file is hard-linked into place, which fails atomically when the
    /// destination exists, and the source is then unlinked.
    pub fn rename_new(&self, from: &Path, to: &Path) -> Result<()> {
        fs::symlink_metadata(from).map_err(|error| StorageError::from_io(from, error))?;
        ensure_parent_dir(to)?;
        fs::hard_link(from, to).map_err(|error| {
            if error.kind() == io::ErrorKind::AlreadyExists {
                StorageError::InvalidInput(format!("{} already exists", to.display()))
            } else {
                StorageError::from_io(to, error)
            }
        })?;
        if let Err(error) = fs::remove_file(from) {
            let _ = fs::remove_file(to);
            return Err(StorageError::from_io(from, error));
        }
        log::debug!(
            "wiki store rename_new from={} to={}",
            from.display(),
            to.display()
        );
        Ok(())
    }
}

fn ensure_parent_dir(path: &Path) -> Result<&Path> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|error| StorageError::Io {
        path: parent.to_path_buf(),
        source: error,
    })?;
    Ok(parent)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .map_err(|error| StorageError::from_io(path, error))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
