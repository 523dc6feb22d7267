//! Error-accumulating directory walks.
//!
//! A walk never aborts on a bad entry: unreadable directories, broken
//! metadata and visitor failures are collected as [`WalkError`]s and the
//! walk carries on, so one corrupt file cannot blank a whole index.

use std::fmt;
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use serde::Serialize;

use crate::paths::relative_id;

/// One entry that could not be visited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalkError {
    pub path: Option<PathBuf>,
    pub message: String,
}

impl WalkError {
    pub fn new(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            message: message.into(),
        }
    }

    fn from_ignore(error: &ignore::Error) -> Self {
        Self {
            path: ignore_error_path(error),
            message: error.to_string(),
        }
    }
}

impl fmt::Display for WalkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}: {}", path.display(), self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// A possibly partial result plus the entries that were skipped.
#[derive(Debug, Clone, Default)]
pub struct Indexed<T> {
    pub value: T,
    pub errors: Vec<WalkError>,
}

impl<T> Indexed<T> {
    pub fn new(value: T, errors: Vec<WalkError>) -> Self {
        Self { value, errors }
    }

    pub fn into_value(self) -> T {
        self.value
    }
}

/// A regular file reached by [`walk_files`].
#[derive(Debug)]
pub struct WalkedFile<'a> {
    pub path: &'a Path,
    /// Root-relative identifier with `/` separators.
    pub relative: String,
    pub name: String,
}

/// Which entries a walk skips entirely.
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Skip files and directories whose name starts with `.`.
    pub skip_hidden: bool,
    /// Directory names never descended into, at any depth.
    pub skip_dirs: Vec<String>,
}

impl WalkOptions {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn visible() -> Self {
        Self {
            skip_hidden: true,
            skip_dirs: Vec::new(),
        }
    }

    pub fn skipping_dirs(mut self, dirs: &[String]) -> Self {
        self.skip_dirs = dirs.to_vec();
        self
    }
}

/// Visits every regular file under `root` in file-name order.
///
/// A missing root is an empty tree, not an error. Returns the per-entry
/// failures, including any the visitor reported.
pub fn walk_files<F>(root: &Path, options: &WalkOptions, mut visit: F) -> Vec<WalkError>
where
    F: FnMut(&WalkedFile<'_>) -> std::result::Result<(), WalkError>,
{
    let mut errors = Vec::new();
    if !root.exists() {
        log::debug!("wiki walk skipped missing root={}", root.display());
        return errors;
    }

    let skip_hidden = options.skip_hidden;
    let skip_dirs = options.skip_dirs.clone();
    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .sort_by_file_name(|left, right| left.cmp(right))
        .filter_entry(move |entry| {
            if entry.depth() == 0 {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            if skip_hidden && name.starts_with('.') {
                return false;
            }
            let is_dir = entry.file_type().is_some_and(|kind| kind.is_dir());
            !(is_dir && skip_dirs.iter().any(|skipped| *skipped == name))
        })
        .build();

    for result in walker {
        let entry = match result {
            Ok(entry) => entry,
            Err(error) => {
                let error = WalkError::from_ignore(&error);
                log::warn!("wiki walk skipped entry: {error}");
                errors.push(error);
                continue;
            }
        };
        if !is_file_entry(&entry) {
            continue;
        }
        let Some(relative) = relative_id(root, entry.path()) else {
            continue;
        };
        let file = WalkedFile {
            path: entry.path(),
            relative,
            name: entry.file_name().to_string_lossy().into_owned(),
        };
        if let Err(error) = visit(&file) {
            log::warn!("wiki walk skipped entry: {error}");
            errors.push(error);
        }
    }

    errors
}

/// Regular files, plus symlinks whose target is a regular file. Linked
/// directories are never descended into.
fn is_file_entry(entry: &ignore::DirEntry) -> bool {
    match entry.file_type() {
        Some(kind) if kind.is_file() => true,
        Some(kind) if kind.is_symlink() => entry.path().is_file(),
        _ => false,
    }
}

fn ignore_error_path(error: &ignore::Error) -> Option<PathBuf> {
    match error {
        ignore::Error::WithPath { path, .. } => Some(path.clone()),
        ignore::Error::WithDepth { err, .. } | ignore::Error::WithLineNumber { err, .. } => {
            ignore_error_path(err)
        }
        ignore::Error::Loop { child, .. } => Some(child.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, relative: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, b"x").expect("write");
    }

    fn collect(root: &Path, options: &WalkOptions) -> Vec<String> {
        let mut seen = Vec::new();
        let errors = walk_files(root, options, |file| {
            seen.push(file.relative.clone());
            Ok(())
        });
        assert!(errors.is_empty(), "{errors:?}");
        seen
    }

    #[test]
    fn visits_files_in_name_order() {
        let dir = TempDir::new().expect("tempdir");
        touch(dir.path(), "b.md");
        touch(dir.path(), "a/z.md");
        touch(dir.path(), "a/c.md");

        assert_eq!(
            collect(dir.path(), &WalkOptions::all()),
            vec!["a/c.md", "a/z.md", "b.md"]
        );
    }

    #[test]
    fn skips_hidden_and_reserved_dirs() {
        let dir = TempDir::new().expect("tempdir");
        touch(dir.path(), "page.md");
        touch(dir.path(), ".hidden.md");
        touch(dir.path(), ".git/config");
        touch(dir.path(), "tags/page");
        touch(dir.path(), "nested/tags/other");

        let options = WalkOptions::visible().skipping_dirs(&["tags".to_string()]);
        assert_eq!(collect(dir.path(), &options), vec!["page.md"]);
    }

    #[test]
    fn missing_root_is_empty() {
        let dir = TempDir::new().expect("tempdir");
        assert!(collect(&dir.path().join("absent"), &WalkOptions::all()).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_files_are_visited_but_linked_dirs_are_not_descended() {
        use std::os::unix::fs::symlink;

        let dir = TempDir::new().expect("tempdir");
        let outside = TempDir::new().expect("tempdir");
        touch(outside.path(), "real.md");
        touch(outside.path(), "folder/inner.md");
        touch(dir.path(), "page.md");
        symlink(outside.path().join("real.md"), dir.path().join("link.md")).expect("symlink");
        symlink(outside.path().join("folder"), dir.path().join("linked")).expect("symlink");
        symlink(outside.path().join("gone.md"), dir.path().join("dangling.md")).expect("symlink");

        assert_eq!(
            collect(dir.path(), &WalkOptions::all()),
            vec!["link.md", "page.md"]
        );
    }

    #[test]
    fn visitor_errors_are_collected_and_walk_continues() {
        let dir = TempDir::new().expect("tempdir");
        touch(dir.path(), "a");
        touch(dir.path(), "b");
        touch(dir.path(), "c");

        let mut visited = 0;
        let errors = walk_files(dir.path(), &WalkOptions::all(), |file| {
            visited += 1;
            if file.name == "b" {
                return Err(WalkError::new(file.path, "corrupt"));
            }
            Ok(())
        });

        assert_eq!(visited, 3);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "corrupt");
    }
}
