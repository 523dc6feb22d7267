//! Navigation tree of the content directory, newest first.
//!
//! Each level is read with `read_dir`, children are recursed in parallel,
//! and siblings are ordered by modification time (descending). A directory
//! takes the time of its most recently modified descendant, so recent edits
//! surface through nested folders.

use std::fs::{self, DirEntry, Metadata};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Local};
use rayon::prelude::*;
use serde::Serialize;

use crate::paths::{MARKDOWN_SUFFIX, RAW_SUFFIX, TEXT_SUFFIX};
use crate::walk::{Indexed, WalkError};

pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NavEntry {
    pub name: String,
    pub url: String,
    /// Anchor token: the url's segments joined with `-`.
    pub id: String,
    pub is_dir: bool,
    pub children: Vec<NavEntry>,
    /// For directories, the newest descendant's time (epoch when empty).
    pub modified: SystemTime,
    pub modified_label: String,
    pub summary: Option<String>,
}

impl NavEntry {
    fn leaf(base: &str, name: &str, kind: LeafKind, metadata: &Metadata) -> Self {
        let modified = metadata.modified().unwrap_or(UNIX_EPOCH);
        let url = format!("{base}/{name}");
        Self {
            name: name.to_string(),
            id: anchor_id(&url),
            url,
            is_dir: false,
            children: Vec::new(),
            modified,
            modified_label: format_time(modified),
            summary: Some(format!("{}, {} bytes", kind.label(), metadata.len())),
        }
    }

    fn directory(url: String, name: &str, children: Vec<NavEntry>) -> Self {
        let modified = children.first().map_or(UNIX_EPOCH, |child| child.modified);
        let modified_label = if children.is_empty() {
            String::new()
        } else {
            format_time(modified)
        };
        Self {
            name: name.to_string(),
            id: anchor_id(&url),
            url,
            is_dir: true,
            children,
            modified,
            modified_label,
            summary: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum LeafKind {
    Markdown,
    Text,
    Raw,
}

impl LeafKind {
    fn classify(file_name: &str) -> Option<(LeafKind, &str)> {
        [
            (LeafKind::Markdown, MARKDOWN_SUFFIX),
            (LeafKind::Text, TEXT_SUFFIX),
            (LeafKind::Raw, RAW_SUFFIX),
        ]
        .into_iter()
        .find_map(|(kind, suffix)| {
            file_name
                .strip_suffix(suffix)
                .filter(|stem| !stem.is_empty())
                .map(|stem| (kind, stem))
        })
    }

    fn label(self) -> &'static str {
        match self {
            Self::Markdown => "markdown page",
            Self::Text => "text file",
            Self::Raw => "document",
        }
    }
}

fn anchor_id(url: &str) -> String {
    url.trim_start_matches('/').replace('/', "-")
}

pub fn format_time(time: SystemTime) -> String {
    DateTime::<Local>::from(time).format(TIME_FORMAT).to_string()
}

/// Lists the navigation entries below `path`, prefixing urls with `base`.
///
/// Hidden entries and directories named in `reserved` are skipped without
/// being descended into. A missing `path` is an empty tree.
pub fn build_nav(base: &str, path: &Path, reserved: &[String]) -> Indexed<Vec<NavEntry>> {
    let mut errors = Vec::new();
    if !path.exists() {
        log::debug!("wiki nav skipped missing root={}", path.display());
        return Indexed::new(Vec::new(), errors);
    }
    let entries = index_dir(base, path, reserved, &mut errors);
    Indexed::new(entries, errors)
}

fn index_dir(
    base: &str,
    path: &Path,
    reserved: &[String],
    errors: &mut Vec<WalkError>,
) -> Vec<NavEntry> {
    let read_dir = match fs::read_dir(path) {
        Ok(iter) => iter,
        Err(error) => {
            errors.push(skipped(path, format!("unreadable directory: {error}")));
            return Vec::new();
        }
    };

    let mut dir_entries = Vec::new();
    for result in read_dir {
        match result {
            Ok(entry) => dir_entries.push(entry),
            Err(error) => errors.push(skipped(path, format!("unreadable entry: {error}"))),
        }
    }
    // Name order first, so equal timestamps keep a stable order.
    dir_entries.sort_by_key(DirEntry::file_name);

    let outcomes: Vec<(Option<NavEntry>, Vec<WalkError>)> = dir_entries
        .into_par_iter()
        .map(|entry| index_entry(base, &entry, reserved))
        .collect();

    let mut names = Vec::with_capacity(outcomes.len());
    for (entry, entry_errors) in outcomes {
        errors.extend(entry_errors);
        names.extend(entry);
    }

    names.sort_by(|left, right| right.modified.cmp(&left.modified));
    names
}

fn index_entry(
    base: &str,
    entry: &DirEntry,
    reserved: &[String],
) -> (Option<NavEntry>, Vec<WalkError>) {
    let mut errors = Vec::new();
    let file_name = entry.file_name().to_string_lossy().into_owned();
    if file_name.starts_with('.') {
        return (None, errors);
    }

    let file_type = match entry.file_type() {
        Ok(file_type) => file_type,
        Err(error) => {
            errors.push(skipped(&entry.path(), format!("unknown file type: {error}")));
            return (None, errors);
        }
    };

    if file_type.is_dir() {
        if reserved.iter().any(|name| *name == file_name) {
            return (None, errors);
        }
        let url = format!("{base}/{file_name}");
        let children = index_dir(&url, &entry.path(), reserved, &mut errors);
        return (Some(NavEntry::directory(url, &file_name, children)), errors);
    }

    let Some((kind, stem)) = LeafKind::classify(&file_name) else {
        return (None, errors);
    };
    match entry.metadata() {
        Ok(metadata) => (Some(NavEntry::leaf(base, stem, kind, &metadata)), errors),
        Err(error) => {
            errors.push(skipped(&entry.path(), format!("unreadable metadata: {error}")));
            (None, errors)
        }
    }
}

fn skipped(path: &Path, message: String) -> WalkError {
    let error = WalkError::new(path, message);
    log::warn!("wiki nav skipped entry: {error}");
    error
}

/// Flattens a navigation tree to its leaves, newest first. Directories are
/// dropped and their descendants promoted.
pub fn recent_pages(entries: &[NavEntry], limit: usize) -> Vec<NavEntry> {
    fn collect(entries: &[NavEntry], leaves: &mut Vec<NavEntry>) {
        for entry in entries {
            if entry.is_dir {
                collect(&entry.children, leaves);
            } else {
                leaves.push(entry.clone());
            }
        }
    }

    let mut leaves = Vec::new();
    collect(entries, &mut leaves);
    leaves.sort_by(|left, right| right.modified.cmp(&left.modified));
    leaves.truncate(limit);
    leaves
}
