//! Mapping from page titles to their on-disk files.
//!
//! A page `docs/intro` lives at `<wiki>/docs/intro.md`, its tags at
//! `<tags>/docs/intro` and its publish marker at `<pub>/docs/intro`.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;

use crate::config::StorageConfig;
use crate::error::{Result, StorageError};

pub const MARKDOWN_SUFFIX: &str = ".md";
pub const TEXT_SUFFIX: &str = ".txt";
pub const RAW_SUFFIX: &str = ".pdf";

/// A validated, path-safe page identifier. `/` separates folders.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PageTitle(String);

impl PageTitle {
    /// Validates an untrusted title. Titles are never rewritten, only
    /// accepted or rejected.
    pub fn parse(raw: &str, reserved: &[String]) -> Result<Self> {
        if raw.is_empty() {
            return Err(invalid_title(raw, "title is empty"));
        }
        if raw.starts_with('/') {
            return Err(invalid_title(raw, "title is absolute"));
        }
        if raw.contains('\\') || raw.contains('\0') {
            return Err(invalid_title(raw, "title contains a forbidden character"));
        }
        for segment in raw.split('/') {
            match segment {
                "" => return Err(invalid_title(raw, "title has an empty segment")),
                "." | ".." => return Err(invalid_title(raw, "title escapes its root")),
                name if reserved.iter().any(|reserved| reserved == name) => {
                    return Err(invalid_title(raw, "title uses a reserved directory name"))
                }
                _ => {}
            }
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }
}

impl fmt::Display for PageTitle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn invalid_title(raw: &str, reason: &str) -> StorageError {
    StorageError::InvalidInput(format!("invalid page title {raw:?}: {reason}"))
}

fn title_path(root: &Path, title: &PageTitle, suffix: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    for segment in title.segments() {
        path.push(segment);
    }
    if suffix.is_empty() {
        return path;
    }
    let mut os = path.into_os_string();
    os.push(suffix);
    PathBuf::from(os)
}

/// `<root>/<title>.md`
pub fn content_path(root: &Path, title: &PageTitle) -> PathBuf {
    title_path(root, title, MARKDOWN_SUFFIX)
}

/// `<root>/<title>.pdf`
pub fn raw_file_path(root: &Path, title: &PageTitle) -> PathBuf {
    title_path(root, title, RAW_SUFFIX)
}

/// `<tag_root>/<title>`
pub fn tag_sidecar_path(tag_root: &Path, title: &PageTitle) -> PathBuf {
    title_path(tag_root, title, "")
}

/// `<pub_root>/<title>`
pub fn publish_marker_path(pub_root: &Path, title: &PageTitle) -> PathBuf {
    title_path(pub_root, title, "")
}

/// `<root>/<title>` with no suffix, for titles naming a folder.
pub fn folder_path(root: &Path, title: &PageTitle) -> PathBuf {
    title_path(root, title, "")
}

/// Returns true if `path` is lexically inside `root` and has no `..`
/// components that could climb back out.
pub fn is_within(root: &Path, path: &Path) -> bool {
    let escapes = path
        .components()
        .any(|component| matches!(component, Component::ParentDir));
    !escapes && path.starts_with(root)
}

/// Root-relative identifier for `path` using `/` separators, or `None` when
/// `path` is not below `root`.
pub fn relative_id(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// Roots for one wiki, resolved from configuration.
#[derive(Debug, Clone)]
pub struct PathConventions {
    pub wiki_dir: PathBuf,
    pub tag_dir: PathBuf,
    pub pub_dir: PathBuf,
    reserved: Vec<String>,
}

impl PathConventions {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            wiki_dir: config.wiki_dir.clone(),
            tag_dir: config.tag_dir(),
            pub_dir: config.pub_dir(),
            reserved: config.reserved_dirs(),
        }
    }

    pub fn reserved(&self) -> &[String] {
        &self.reserved
    }

    pub fn title(&self, raw: &str) -> Result<PageTitle> {
        PageTitle::parse(raw, &self.reserved)
    }

    pub fn content_path(&self, title: &PageTitle) -> PathBuf {
        content_path(&self.wiki_dir, title)
    }

    pub fn raw_file_path(&self, title: &PageTitle) -> PathBuf {
        raw_file_path(&self.wiki_dir, title)
    }

    pub fn tag_sidecar_path(&self, title: &PageTitle) -> PathBuf {
        tag_sidecar_path(&self.tag_dir, title)
    }

    pub fn publish_marker_path(&self, title: &PageTitle) -> PathBuf {
        publish_marker_path(&self.pub_dir, title)
    }

    /// Rejects paths outside every configured root.
    pub fn check_managed(&self, path: &Path) -> Result<()> {
        let managed = [&self.wiki_dir, &self.tag_dir, &self.pub_dir]
            .iter()
            .any(|root| is_within(root, path));
        if managed {
            Ok(())
        } else {
            Err(StorageError::InvalidInput(format!(
                "path {} is outside the wiki roots",
                path.display()
            )))
        }
    }
}
