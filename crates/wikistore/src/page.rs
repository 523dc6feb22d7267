//! Page records read from and written to the content tree.

use std::borrow::Cow;
use std::path::PathBuf;
use std::time::SystemTime;

use serde::Serialize;

use crate::nav::format_time;
use crate::paths::PageTitle;
use crate::tags::tags_from_str;

/// A page as read back from disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page {
    pub title: PageTitle,
    pub content: Vec<u8>,
    pub modified: SystemTime,
    pub modified_label: String,
    /// Sidecar contents verbatim; empty when the page has no sidecar.
    pub raw_tags: String,
    pub tags: Vec<String>,
    pub published: bool,
}

impl Page {
    pub(crate) fn new(
        title: PageTitle,
        content: Vec<u8>,
        modified: SystemTime,
        raw_tags: Option<String>,
        published: bool,
    ) -> Self {
        let raw_tags = raw_tags.unwrap_or_default();
        Self {
            title,
            content,
            modified,
            modified_label: format_time(modified),
            tags: tags_from_str(&raw_tags),
            raw_tags,
            published,
        }
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }
}

/// A raw (PDF-like) file that stands in for a page without markdown content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawFile {
    pub title: PageTitle,
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
}

/// Everything `save_page` writes for one page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageUpdate {
    pub title: String,
    pub content: Vec<u8>,
    /// Empty removes the sidecar.
    pub tags: Vec<String>,
    /// `false` removes the publish marker.
    pub published: bool,
}

impl PageUpdate {
    pub fn new(title: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            tags: Vec::new(),
            published: false,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn published(mut self, published: bool) -> Self {
        self.published = published;
        self
    }

    /// Sidecar contents: trimmed, non-blank tags joined with `,`.
    pub fn tag_line(&self) -> String {
        self.tags
            .iter()
            .map(|tag| tag.trim())
            .filter(|tag| !tag.is_empty())
            .collect::<Vec<_>>()
            .join(",")
    }
}
