//! The storage contract consumed by the HTTP layer, and its cached
//! filesystem implementation.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;

use crate::cache::{IndexCache, IndexSnapshot, SnapshotBuilder};
use crate::config::StorageConfig;
use crate::error::{tolerate_not_found, Result, StorageError};
use crate::nav::{build_nav, recent_pages, NavEntry};
use crate::page::{Page, PageUpdate, RawFile};
use crate::paths::{folder_path, relative_id, PageTitle, PathConventions, MARKDOWN_SUFFIX};
use crate::pool::build_worker_pool;
use crate::search::{ConcurrentSearch, SearchHit};
use crate::store::ContentStore;
use crate::tags::{build_tag_index, extend_with_extension_tag, Tag, TagIndex};
use crate::walk::{walk_files, Indexed, WalkOptions};

/// Everything the request handlers need from wiki storage.
///
/// Mutations return once the filesystem change is durable; the derived
/// indexes catch up in the background, so index reads right after a
/// mutation may still reflect the previous state.
pub trait WikiStorage: Send + Sync {
    fn store_file(&self, path: &Path, bytes: &[u8]) -> Result<()>;
    fn delete_file(&self, path: &Path) -> Result<()>;
    fn move_file(&self, from: &Path, to: &Path) -> Result<()>;

    fn get_page(&self, title: &str) -> Result<Page>;
    fn get_raw_file(&self, title: &str) -> Result<RawFile>;
    fn save_page(&self, update: &PageUpdate) -> Result<()>;
    fn delete_page(&self, title: &str) -> Result<()>;
    fn move_page(&self, from: &str, to: &str) -> Result<()>;

    /// Unordered; sort when order matters.
    fn search_pages(&self, root: &Path, query: &str) -> Vec<SearchHit>;

    /// Index reads share the cached value when possible; treat the result
    /// as read-only.
    fn index_tags(&self, tag_root: &Path) -> Arc<TagIndex>;
    fn index_raw_files(&self, content_root: &Path, extension: &str) -> Arc<TagIndex>;
    fn index_nav(&self, base: &str, content_root: &Path) -> Arc<Vec<NavEntry>>;
    fn tag_pages(&self, tag: &str) -> Tag;
    fn recent_pages(&self, limit: usize) -> Vec<NavEntry>;

    fn get_wiki_list(&self, subpath: &str) -> Result<Vec<String>>;
    fn public_pages(&self) -> Vec<String>;
}

pub type SharedStorage = Arc<dyn WikiStorage>;

/// Filesystem storage with a background-refreshed index cache.
#[derive(Debug, Clone)]
pub struct CachedStorage {
    config: StorageConfig,
    paths: PathConventions,
    store: ContentStore,
    cache: IndexCache,
    search: ConcurrentSearch,
}

impl CachedStorage {
    pub fn new(config: StorageConfig) -> Result<Self> {
        config.validate()?;
        let pool = build_worker_pool(config.effective_worker_threads())?;
        let paths = PathConventions::new(&config);
        let cache = IndexCache::new(SnapshotBuilder::new(&config, pool.clone()));
        log::info!(
            "wiki storage opened wiki_dir={} tag_dir={} pub_dir={} workers={}",
            paths.wiki_dir.display(),
            paths.tag_dir.display(),
            paths.pub_dir.display(),
            pool.current_num_threads()
        );
        Ok(Self {
            config,
            paths,
            store: ContentStore::new(),
            cache,
            search: ConcurrentSearch::new(pool),
        })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn paths(&self) -> &PathConventions {
        &self.paths
    }

    pub fn cache(&self) -> &IndexCache {
        &self.cache
    }

    fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.cache.snapshot()
    }

    /// Runs `mutate` and invalidates the cache if anything changed on disk.
    /// `mutate` reports whether it touched the filesystem even on failure.
    fn mutating<T>(&self, mutate: impl FnOnce(&mut bool) -> Result<T>) -> Result<T> {
        let mut changed = false;
        let result = mutate(&mut changed);
        if changed {
            self.cache.invalidate();
        }
        result
    }

    fn read_page(&self, title: PageTitle) -> Result<Page> {
        let path = self.paths.content_path(&title);
        let mut file = File::open(&path).map_err(|error| StorageError::from_io(&path, error))?;
        let mut content = Vec::new();
        file.read_to_end(&mut content)
            .map_err(|error| StorageError::from_io(&path, error))?;
        let modified = file
            .metadata()
            .and_then(|metadata| metadata.modified())
            .map_err(|error| StorageError::from_io(&path, error))?;

        let sidecar = self.paths.tag_sidecar_path(&title);
        let raw_tags = match fs::read_to_string(&sidecar) {
            Ok(raw) => Some(raw),
            Err(error) if error.kind() == io::ErrorKind::NotFound => None,
            Err(error) => {
                log::warn!(
                    "wiki page tags unreadable path={} error={error}",
                    sidecar.display()
                );
                None
            }
        };
        let published = self.paths.publish_marker_path(&title).is_file();

        Ok(Page::new(title, content, modified, raw_tags, published))
    }
}

fn log_skipped<T>(operation: &str, indexed: Indexed<T>) -> T {
    if !indexed.errors.is_empty() {
        log::warn!(
            "wiki {operation} skipped entries errors={}",
            indexed.errors.len()
        );
    }
    indexed.value
}

impl WikiStorage for CachedStorage {
    fn store_file(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        self.paths.check_managed(path)?;
        self.store.write(path, bytes)?;
        self.cache.invalidate();
        Ok(())
    }

    fn delete_file(&self, path: &Path) -> Result<()> {
        self.paths.check_managed(path)?;
        self.store.delete(path)?;
        self.cache.invalidate();
        Ok(())
    }

    fn move_file(&self, from: &Path, to: &Path) -> Result<()> {
        self.paths.check_managed(from)?;
        self.paths.check_managed(to)?;
        self.store.rename(from, to)?;
        self.cache.invalidate();
        Ok(())
    }

    fn get_page(&self, title: &str) -> Result<Page> {
        let title = self.paths.title(title)?;
        self.read_page(title)
    }

    fn get_raw_file(&self, title: &str) -> Result<RawFile> {
        let title = self.paths.title(title)?;
        let path = self.paths.raw_file_path(&title);
        let metadata = fs::metadata(&path).map_err(|error| StorageError::from_io(&path, error))?;
        if !metadata.is_file() {
            return Err(StorageError::NotFound(path));
        }
        let modified = metadata
            .modified()
            .map_err(|error| StorageError::from_io(&path, error))?;
        Ok(RawFile {
            title,
            path,
            size: metadata.len(),
            modified,
        })
    }

    fn save_page(&self, update: &PageUpdate) -> Result<()> {
        let title = self.paths.title(&update.title)?;
        self.mutating(|changed| {
            self.store
                .write(&self.paths.content_path(&title), &update.content)?;
            *changed = true;

            let sidecar = self.paths.tag_sidecar_path(&title);
            let tag_line = update.tag_line();
            if tag_line.is_empty() {
                tolerate_not_found(self.store.delete(&sidecar))?;
            } else {
                self.store.write(&sidecar, tag_line.as_bytes())?;
            }

            let marker = self.paths.publish_marker_path(&title);
            if update.published {
                self.store.write(&marker, &[])?;
            } else {
                tolerate_not_found(self.store.delete(&marker))?;
            }

            log::debug!(
                "wiki page saved title={} tags={} published={}",
                title,
                tag_line,
                update.published
            );
            Ok(())
        })
    }

    fn delete_page(&self, title: &str) -> Result<()> {
        let title = self.paths.title(title)?;
        self.mutating(|changed| {
            self.store.delete(&self.paths.content_path(&title))?;
            *changed = true;
            tolerate_not_found(self.store.delete(&self.paths.tag_sidecar_path(&title)))?;
            tolerate_not_found(self.store.delete(&self.paths.publish_marker_path(&title)))?;
            log::debug!("wiki page deleted title={title}");
            Ok(())
        })
    }

    fn move_page(&self, from: &str, to: &str) -> Result<()> {
        let from = self.paths.title(from)?;
        let to = self.paths.title(to)?;

        self.mutating(|changed| {
            // Fails with `InvalidInput` rather than replacing an existing page.
            self.store
                .rename_new(&self.paths.content_path(&from), &self.paths.content_path(&to))?;
            *changed = true;
            tolerate_not_found(self.store.rename(
                &self.paths.tag_sidecar_path(&from),
                &self.paths.tag_sidecar_path(&to),
            ))?;
            tolerate_not_found(self.store.rename(
                &self.paths.publish_marker_path(&from),
                &self.paths.publish_marker_path(&to),
            ))?;
            log::debug!("wiki page moved from={from} to={to}");
            Ok(())
        })
    }

    fn search_pages(&self, root: &Path, query: &str) -> Vec<SearchHit> {
        self.search.search(root, query)
    }

    fn index_tags(&self, tag_root: &Path) -> Arc<TagIndex> {
        if tag_root == self.paths.tag_dir {
            return Arc::clone(&self.snapshot().tag_index);
        }
        Arc::new(log_skipped("tag index", build_tag_index(tag_root)))
    }

    fn index_raw_files(&self, content_root: &Path, extension: &str) -> Arc<TagIndex> {
        let snapshot = self.snapshot();
        if content_root == self.paths.wiki_dir
            && extension == self.cache.builder().raw_extension()
        {
            return Arc::clone(&snapshot.raw_file_index);
        }
        Arc::new(log_skipped(
            "raw file index",
            extend_with_extension_tag(
                TagIndex::clone(&snapshot.tag_index),
                content_root,
                extension,
                self.paths.reserved(),
            ),
        ))
    }

    fn index_nav(&self, base: &str, content_root: &Path) -> Arc<Vec<NavEntry>> {
        if base.is_empty() && content_root == self.paths.wiki_dir {
            return Arc::clone(&self.snapshot().nav);
        }
        Arc::new(log_skipped(
            "nav",
            build_nav(base, content_root, self.paths.reserved()),
        ))
    }

    fn tag_pages(&self, tag: &str) -> Tag {
        self.snapshot()
            .raw_file_index
            .get(tag)
            .cloned()
            .unwrap_or_else(|| Tag::new(tag))
    }

    fn recent_pages(&self, limit: usize) -> Vec<NavEntry> {
        recent_pages(&self.snapshot().nav, limit)
    }

    fn get_wiki_list(&self, subpath: &str) -> Result<Vec<String>> {
        let subpath = subpath.trim_matches('/');
        let root = if subpath.is_empty() {
            self.paths.wiki_dir.clone()
        } else {
            folder_path(&self.paths.wiki_dir, &self.paths.title(subpath)?)
        };

        let options = WalkOptions::visible().skipping_dirs(self.paths.reserved());
        let mut pages = Vec::new();
        let errors = walk_files(&root, &options, |file| {
            let id = relative_id(&self.paths.wiki_dir, file.path)
                .unwrap_or_else(|| file.relative.clone());
            let id = id.strip_suffix(MARKDOWN_SUFFIX).map(str::to_string).unwrap_or(id);
            pages.push(id);
            Ok(())
        });
        Ok(log_skipped("list", Indexed::new(pages, errors)))
    }

    fn public_pages(&self) -> Vec<String> {
        let mut pages = Vec::new();
        let errors = walk_files(&self.paths.pub_dir, &WalkOptions::visible(), |file| {
            pages.push(file.relative.clone());
            Ok(())
        });
        log_skipped("public pages", Indexed::new(pages, errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheState;
    use crate::error::ErrorKind;
    use std::time::Duration;
    use tempfile::TempDir;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn open(dir: &TempDir) -> CachedStorage {
        init_logger();
        CachedStorage::new(StorageConfig::new(dir.path()).with_worker_threads(2))
            .expect("storage")
    }

    async fn settle(storage: &CachedStorage) {
        let mut rx = storage.cache().subscribe();
        tokio::time::timeout(
            Duration::from_secs(10),
            rx.wait_for(|status| status.state == CacheState::Valid),
        )
        .await
        .expect("rebuild settled in time")
        .expect("status channel open");
    }

    #[test]
    fn deleting_a_missing_file_is_not_found() {
        let dir = TempDir::new().expect("tempdir");
        let storage = open(&dir);

        let error = storage
            .delete_file(&dir.path().join("absent.md"))
            .expect_err("missing file");

        assert_eq!(error.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn mutations_outside_the_wiki_are_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let other = TempDir::new().expect("tempdir");
        let storage = open(&dir);

        let error = storage
            .store_file(&other.path().join("x.md"), b"x")
            .expect_err("outside");

        assert_eq!(error.kind(), ErrorKind::InvalidInput);
        assert!(!other.path().join("x.md").exists());
    }

    #[test]
    fn saved_page_reads_back_with_tags_and_publish_flag() {
        let dir = TempDir::new().expect("tempdir");
        let storage = open(&dir);

        storage
            .save_page(
                &PageUpdate::new("docs/intro", "# Intro")
                    .with_tags(["go", "web"])
                    .published(true),
            )
            .expect("save");

        let page = storage.get_page("docs/intro").expect("page");
        assert_eq!(page.content, b"# Intro");
        assert_eq!(page.tags, vec!["go", "web"]);
        assert!(page.published);
        assert!(!page.modified_label.is_empty());
        assert!(dir.path().join("tags/docs/intro").is_file());
        assert!(dir.path().join("pub/docs/intro").is_file());

        storage
            .save_page(&PageUpdate::new("docs/intro", "# Intro v2"))
            .expect("resave");
        let page = storage.get_page("docs/intro").expect("page");
        assert!(page.tags.is_empty());
        assert!(!page.published);
        assert!(!dir.path().join("pub/docs/intro").exists());
    }

    #[test]
    fn missing_page_and_bad_titles_are_distinguished() {
        let dir = TempDir::new().expect("tempdir");
        let storage = open(&dir);

        assert_eq!(
            storage.get_page("nope").expect_err("missing").kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            storage.get_page("../etc/passwd").expect_err("traversal").kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(
            storage
                .save_page(&PageUpdate::new("tags", "x"))
                .expect_err("reserved")
                .kind(),
            ErrorKind::InvalidInput
        );
    }

    #[test]
    fn delete_page_tolerates_missing_sidecar_and_marker() {
        let dir = TempDir::new().expect("tempdir");
        let storage = open(&dir);
        storage
            .save_page(&PageUpdate::new("plain", "text"))
            .expect("save");

        storage.delete_page("plain").expect("delete");

        assert!(!dir.path().join("plain.md").exists());
        assert_eq!(
            storage.delete_page("plain").expect_err("gone").kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn move_page_carries_tags_and_marker() {
        let dir = TempDir::new().expect("tempdir");
        let storage = open(&dir);
        storage
            .save_page(
                &PageUpdate::new("old", "body")
                    .with_tags(["keep"])
                    .published(true),
            )
            .expect("save");
        storage
            .save_page(&PageUpdate::new("taken", "body"))
            .expect("save");

        storage.move_page("old", "archive/new").expect("move");

        let page = storage.get_page("archive/new").expect("moved page");
        assert_eq!(page.tags, vec!["keep"]);
        assert!(page.published);
        assert!(storage.get_page("old").is_err());
        assert_eq!(
            storage.move_page("archive/new", "taken").expect_err("exists").kind(),
            ErrorKind::InvalidInput
        );
    }

    #[test]
    fn cached_index_reads_share_the_snapshot() {
        let dir = TempDir::new().expect("tempdir");
        let storage = open(&dir);
        let tag_root = dir.path().join("tags");

        let first = storage.index_tags(&tag_root);
        let second = storage.index_tags(&tag_root);
        assert!(Arc::ptr_eq(&first, &second));

        let nav = storage.index_nav("", dir.path());
        assert!(Arc::ptr_eq(&nav, &storage.index_nav("", dir.path())));
        let raw = storage.index_raw_files(dir.path(), "PDF");
        assert!(Arc::ptr_eq(&raw, &storage.index_raw_files(dir.path(), "PDF")));
    }

    #[test]
    fn raw_file_lookup() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join("manual.pdf"), b"%PDF").expect("write");
        let storage = open(&dir);

        let raw = storage.get_raw_file("manual").expect("raw");
        assert_eq!(raw.size, 4);
        assert_eq!(raw.path, dir.path().join("manual.pdf"));
        assert!(storage.get_raw_file("absent").expect_err("missing").is_not_found());
    }

    #[test]
    fn wiki_list_and_public_pages() {
        let dir = TempDir::new().expect("tempdir");
        let storage = open(&dir);
        for (title, published) in [("a", true), ("docs/b", false), ("docs/deep/c", true)] {
            storage
                .save_page(&PageUpdate::new(title, "x").with_tags(["t"]).published(published))
                .expect("save");
        }

        let mut all = storage.get_wiki_list("").expect("list");
        all.sort();
        assert_eq!(all, vec!["a", "docs/b", "docs/deep/c"]);

        let mut docs = storage.get_wiki_list("/docs/").expect("list");
        docs.sort();
        assert_eq!(docs, vec!["docs/b", "docs/deep/c"]);
        assert!(storage.get_wiki_list("../x").is_err());

        let mut public = storage.public_pages();
        public.sort();
        assert_eq!(public, vec!["a", "docs/deep/c"]);
    }

    #[test]
    fn index_reads_with_foreign_arguments_are_computed_directly() {
        let dir = TempDir::new().expect("tempdir");
        let other = TempDir::new().expect("tempdir");
        fs::write(other.path().join("fred"), "go,web").expect("write");
        fs::write(other.path().join("scan.PDF"), "").expect("write");
        fs::write(other.path().join("page.md"), "").expect("write");
        let storage = open(&dir);

        let tags = storage.index_tags(other.path());
        assert_eq!(tags.get("go").expect("go").pages, vec!["fred"]);
        assert!(storage.index_tags(&dir.path().join("tags")).is_empty());

        let raw = storage.index_raw_files(other.path(), "pdf");
        assert_eq!(raw.get("pdf").expect("pdf").pages, vec!["scan.PDF"]);

        let nav = storage.index_nav("/base", other.path());
        assert_eq!(nav.len(), 1);
        assert_eq!(nav[0].url, "/base/page");
    }

    #[test]
    fn search_bypasses_the_cache() {
        let dir = TempDir::new().expect("tempdir");
        let storage = open(&dir);
        storage.index_nav("", dir.path());

        storage
            .store_file(&dir.path().join("b.md"), b"one\ntwo\nthree\nneedle\n")
            .expect("store");

        let hits = storage.search_pages(dir.path(), "needle");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].page, "b");
        assert_eq!(hits[0].line_number, 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn tag_changes_show_up_after_the_rebuild_settles() {
        let dir = TempDir::new().expect("tempdir");
        let storage = open(&dir);
        let tag_root = dir.path().join("tags");
        storage
            .store_file(&tag_root.join("fred"), b"go")
            .expect("store");
        assert!(storage.index_tags(&tag_root).contains("go"));

        storage
            .store_file(&tag_root.join("fred"), b"go,web")
            .expect("store");
        // Before settling either answer is acceptable.
        let _maybe_stale = storage.index_tags(&tag_root);

        settle(&storage).await;
        let tags = storage.index_tags(&tag_root);
        assert_eq!(tags.get("web").expect("web").pages, vec!["fred"]);
        assert_eq!(storage.tag_pages("go").pages, vec!["fred"]);
        assert!(storage.tag_pages("absent").pages.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn nav_and_recents_follow_saved_pages() {
        let dir = TempDir::new().expect("tempdir");
        let storage = open(&dir);
        storage
            .save_page(&PageUpdate::new("first", "x"))
            .expect("save");
        assert_eq!(storage.index_nav("", dir.path()).len(), 1);

        storage
            .save_page(&PageUpdate::new("folder/second", "x"))
            .expect("save");
        settle(&storage).await;

        let nav = storage.index_nav("", dir.path());
        let mut names: Vec<_> = nav.iter().map(|entry| entry.name.as_str()).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["first", "folder"]);

        let recents = storage.recent_pages(10);
        assert_eq!(recents.len(), 2);
        assert!(recents.iter().all(|entry| !entry.is_dir));
    }

    #[test]
    fn usable_as_a_trait_object() {
        let dir = TempDir::new().expect("tempdir");
        let storage: SharedStorage = Arc::new(open(&dir));
        storage
            .store_file(&dir.path().join("p.md"), b"hello")
            .expect("store");
        assert_eq!(storage.get_page("p").expect("page").text(), "hello");
    }
}
