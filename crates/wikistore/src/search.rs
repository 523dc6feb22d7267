//! Full-text line search across every file under a root.
//!
//! Fan-out/fan-in: one scan task per file is queued on the bounded worker
//! pool, each task appends its hits to a shared sink, and the caller blocks
//! until the scope has drained. Hit order depends on task completion and is
//! not stable; sort client-side when order matters.

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use memchr::memmem;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::paths::MARKDOWN_SUFFIX;
use crate::pool::WorkerPool;
use crate::walk::{walk_files, WalkOptions};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SearchHit {
    /// Root-relative page identifier (`.md` stripped).
    pub page: String,
    /// 1-based.
    pub line_number: usize,
    pub line_text: String,
}

/// `page\tline\ttext`, the tab-separated form handed to the HTTP layer.
impl fmt::Display for SearchHit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}\t{}", self.page, self.line_number, self.line_text)
    }
}

impl SearchHit {
    /// Parses one line of the tab-separated form produced by `Display`.
    pub fn parse_legacy(raw: &str) -> Result<Self, StorageError> {
        let raw = raw.strip_suffix('\n').unwrap_or(raw);
        let mut parts = raw.splitn(3, '\t');
        let (Some(page), Some(line), Some(text)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(StorageError::InvalidInput(format!(
                "malformed search hit {raw:?}"
            )));
        };
        let line_number = line.parse().map_err(|_| {
            StorageError::InvalidInput(format!("malformed search hit line number {line:?}"))
        })?;
        Ok(Self {
            page: page.to_string(),
            line_number,
            line_text: text.to_string(),
        })
    }
}

impl FromStr for SearchHit {
    type Err = StorageError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::parse_legacy(raw)
    }
}

/// Runs searches on a shared worker pool.
#[derive(Debug, Clone)]
pub struct ConcurrentSearch {
    pool: WorkerPool,
}

impl ConcurrentSearch {
    pub fn new(pool: WorkerPool) -> Self {
        Self { pool }
    }

    /// Returns one hit per line under `root` containing `query` verbatim
    /// (no regex, no case folding). Files that cannot be read contribute no
    /// hits. The empty query is contained in every line.
    pub fn search(&self, root: &Path, query: &str) -> Vec<SearchHit> {
        let mut files: Vec<(PathBuf, String)> = Vec::new();
        let errors = walk_files(root, &WalkOptions::all(), |file| {
            let page = file
                .relative
                .strip_suffix(MARKDOWN_SUFFIX)
                .unwrap_or(&file.relative)
                .to_string();
            files.push((file.path.to_path_buf(), page));
            Ok(())
        });
        if !errors.is_empty() {
            log::debug!(
                "wiki search discovery skipped entries root={} errors={}",
                root.display(),
                errors.len()
            );
        }

        let finder = memmem::Finder::new(query.as_bytes());
        let sink = Mutex::new(Vec::new());
        let file_count = files.len();

        self.pool.scope(|scope| {
            for (path, page) in files {
                let finder = &finder;
                let sink = &sink;
                scope.spawn(move |_| {
                    let hits = scan_file(&path, &page, finder);
                    if !hits.is_empty() {
                        sink.lock().extend(hits);
                    }
                });
            }
        });

        let hits = sink.into_inner();
        log::debug!(
            "wiki search finished root={} files={} hits={}",
            root.display(),
            file_count,
            hits.len()
        );
        hits
    }
}

fn scan_file(path: &Path, page: &str, finder: &memmem::Finder<'_>) -> Vec<SearchHit> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(error) => {
            log::debug!("wiki search skipped file path={} error={error}", path.display());
            return Vec::new();
        }
    };

    let mut reader = BufReader::new(file);
    let mut hits = Vec::new();
    let mut line = Vec::new();
    let mut line_number = 0usize;
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(error) => {
                log::debug!("wiki search stopped reading path={} error={error}", path.display());
                break;
            }
        }
        line_number += 1;

        let text = trim_line_ending(&line);
        if finder.find(text).is_some() {
            hits.push(SearchHit {
                page: page.to_string(),
                line_number,
                line_text: String::from_utf8_lossy(text).into_owned(),
            });
        }
    }
    hits
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
