//! Inverted tag index built from per-page sidecar files.

use std::collections::btree_map::{self, BTreeMap};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::walk::{walk_files, Indexed, WalkError, WalkOptions};

/// A tag and the pages associated with it, in association order.
/// A page listed twice in one sidecar appears twice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub pages: Vec<String>,
}

impl Tag {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pages: Vec::new(),
        }
    }

    pub fn add_page(&mut self, page: impl Into<String>) {
        self.pages.push(page.into());
    }
}

/// Tag name to [`Tag`]. Keys iterate in sorted order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagIndex(BTreeMap<String, Tag>);

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associates `page` with `tag`. The tag name is trimmed; a blank name
    /// is ignored.
    pub fn associate(&mut self, page: &str, tag: &str) {
        let tag = tag.trim();
        if tag.is_empty() {
            return;
        }
        self.0
            .entry(tag.to_string())
            .or_insert_with(|| Tag::new(tag))
            .add_page(page);
    }

    pub fn get(&self, tag: &str) -> Option<&Tag> {
        self.0.get(tag)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.contains_key(tag)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Tag> {
        self.0.iter()
    }
}

impl<'a> IntoIterator for &'a TagIndex {
    type Item = (&'a String, &'a Tag);
    type IntoIter = btree_map::Iter<'a, String, Tag>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Splits a sidecar's comma-separated contents into trimmed tag names.
pub fn tags_from_str(contents: &str) -> Vec<String> {
    contents
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

/// Builds the tag index from every visible sidecar under `tag_root`.
///
/// The sidecar's root-relative path is the page identifier. Unreadable or
/// non-UTF-8 sidecars are skipped and reported.
pub fn build_tag_index(tag_root: &Path) -> Indexed<TagIndex> {
    let mut index = TagIndex::new();
    let errors = walk_files(tag_root, &WalkOptions::visible(), |file| {
        let bytes = fs::read(file.path)
            .map_err(|error| WalkError::new(file.path, format!("unreadable sidecar: {error}")))?;
        let contents = String::from_utf8(bytes)
            .map_err(|_| WalkError::new(file.path, "sidecar is not valid UTF-8"))?;
        for tag in tags_from_str(&contents) {
            index.associate(&file.relative, &tag);
        }
        Ok(())
    });
    Indexed::new(index, errors)
}

/// Adds a synthetic tag named `extension` holding every file under
/// `content_root` whose name ends with it (case-insensitive).
///
/// Page identifiers are root-relative paths including the file extension.
pub fn extend_with_extension_tag(
    mut index: TagIndex,
    content_root: &Path,
    extension: &str,
    skip_dirs: &[String],
) -> Indexed<TagIndex> {
    let suffix = extension.to_lowercase();
    let options = WalkOptions::visible().skipping_dirs(skip_dirs);
    let errors = walk_files(content_root, &options, |file| {
        if file.name.to_lowercase().ends_with(&suffix) {
            index.associate(&file.relative, extension);
        }
        Ok(())
    });
    Indexed::new(index, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, contents).expect("write");
    }

    #[test]
    fn sidecar_tags_are_indexed_per_page() {
        let dir = TempDir::new().expect("tempdir");
        write(dir.path(), "fred", "go,web");

        let indexed = build_tag_index(dir.path());

        assert!(indexed.errors.is_empty());
        let index = indexed.value;
        assert_eq!(index.names().collect::<Vec<_>>(), vec!["go", "web"]);
        assert_eq!(index.get("go").expect("go").pages, vec!["fred"]);
        assert_eq!(index.get("web").expect("web").pages, vec!["fred"]);
    }

    #[test]
    fn duplicate_tags_in_one_sidecar_are_kept() {
        let mut index = TagIndex::new();
        index.associate("page", "rust");
        index.associate("page", "rust");

        assert_eq!(index.get("rust").expect("rust").pages, vec!["page", "page"]);
    }

    #[test]
    fn sidecar_repeating_a_tag_lists_the_page_twice() {
        let dir = TempDir::new().expect("tempdir");
        write(dir.path(), "page", "rust, rust");

        let indexed = build_tag_index(dir.path());

        assert!(indexed.errors.is_empty());
        assert_eq!(indexed.value.len(), 1);
        assert_eq!(
            indexed.value.get("rust").expect("rust").pages,
            vec!["page", "page"]
        );
    }

    #[test]
    fn whitespace_is_trimmed_and_blank_tags_dropped() {
        assert_eq!(tags_from_str(" go , web ,,\n"), vec!["go", "web"]);
        assert!(tags_from_str("").is_empty());
    }

    #[test]
    fn empty_tag_root_yields_empty_index() {
        let dir = TempDir::new().expect("tempdir");
        let indexed = build_tag_index(dir.path());
        assert!(indexed.value.is_empty());
        assert!(indexed.errors.is_empty());

        let missing = build_tag_index(&dir.path().join("missing"));
        assert!(missing.value.is_empty());
    }

    #[test]
    fn nested_sidecars_use_relative_titles_and_hidden_files_are_skipped() {
        let dir = TempDir::new().expect("tempdir");
        write(dir.path(), "docs/intro", "guide");
        write(dir.path(), ".swap", "guide");

        let index = build_tag_index(dir.path()).into_value();
        assert_eq!(index.get("guide").expect("guide").pages, vec!["docs/intro"]);
    }

    #[test]
    fn corrupt_sidecar_is_reported_without_blanking_the_index() {
        let dir = TempDir::new().expect("tempdir");
        write(dir.path(), "good", "ok");
        fs::write(dir.path().join("bad"), [0xff, 0xfe, 0x00]).expect("write");

        let indexed = build_tag_index(dir.path());

        assert_eq!(indexed.errors.len(), 1);
        assert_eq!(indexed.value.get("ok").expect("ok").pages, vec!["good"]);
    }

    #[test]
    fn extension_tag_matches_case_insensitively() {
        let dir = TempDir::new().expect("tempdir");
        write(dir.path(), "manual.pdf", "");
        write(dir.path(), "docs/SCAN.PDF", "");
        write(dir.path(), "notes.md", "");
        write(dir.path(), "tags/other.pdf", "");

        let mut index = TagIndex::new();
        index.associate("notes", "misc");
        let indexed =
            extend_with_extension_tag(index, dir.path(), "PDF", &["tags".to_string()]);

        let index = indexed.value;
        assert_eq!(
            index.get("PDF").expect("PDF").pages,
            vec!["docs/SCAN.PDF", "manual.pdf"]
        );
        assert!(index.contains("misc"));
    }
}
