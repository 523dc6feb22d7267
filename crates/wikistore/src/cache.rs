//! Derived index cache with stale-while-rebuilding reads.
//!
//! The cache owns one immutable [`IndexSnapshot`] behind an `Arc`. The first
//! read builds it synchronously; after that, mutations only mark the cache
//! as invalidating and wake a single background rebuild worker. Readers keep
//! getting the previous snapshot until the worker swaps in a new one, so a
//! read right after a write may be stale.
//!
//! State: `Empty` -> `Valid` -> `Invalidating` -> `Valid` ...

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Instant, SystemTime};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::watch;

use crate::config::StorageConfig;
use crate::nav::{build_nav, NavEntry};
use crate::paths::PathConventions;
use crate::pool::WorkerPool;
use crate::tags::{build_tag_index, extend_with_extension_tag, TagIndex};
use crate::walk::WalkError;

/// Cache state.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
#[repr(u8)]
pub enum CacheState {
    Empty = 0,
    Valid = 1,
    Invalidating = 2,
}

impl CacheState {
    /// Loads the state from an atomic.
    pub fn load(atomic: &AtomicU8) -> Self {
        match atomic.load(Ordering::SeqCst) {
            1 => Self::Valid,
            2 => Self::Invalidating,
            _ => Self::Empty,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Valid => "valid",
            Self::Invalidating => "invalidating",
        }
    }
}

/// One complete, immutable set of derived indexes. The parts are shared so
/// readers can hold on to one without copying it.
#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    /// Sidecar tags only.
    pub tag_index: Arc<TagIndex>,
    /// `tag_index` plus the synthetic extension tag.
    pub raw_file_index: Arc<TagIndex>,
    pub nav: Arc<Vec<NavEntry>>,
    pub errors: Vec<WalkError>,
    pub generation: u64,
    pub built_at: SystemTime,
}

/// Builds snapshots for one wiki on the shared worker pool.
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    wiki_dir: PathBuf,
    tag_dir: PathBuf,
    raw_extension: String,
    reserved: Vec<String>,
    pool: WorkerPool,
}

impl SnapshotBuilder {
    pub fn new(config: &StorageConfig, pool: WorkerPool) -> Self {
        let paths = PathConventions::new(config);
        Self {
            wiki_dir: paths.wiki_dir.clone(),
            tag_dir: paths.tag_dir.clone(),
            raw_extension: config.raw_extension.clone(),
            reserved: paths.reserved().to_vec(),
            pool,
        }
    }

    pub fn raw_extension(&self) -> &str {
        &self.raw_extension
    }

    /// Runs the tag pass and the navigation pass concurrently and bundles
    /// the results. Never fails; skipped entries land in `errors`.
    pub fn build(&self, generation: u64) -> IndexSnapshot {
        let started = Instant::now();
        let ((tags, raw), nav) = self.pool.install(|| {
            rayon::join(
                || {
                    let tags = build_tag_index(&self.tag_dir);
                    let raw = extend_with_extension_tag(
                        tags.value.clone(),
                        &self.wiki_dir,
                        &self.raw_extension,
                        &self.reserved,
                    );
                    (tags, raw)
                },
                || build_nav("", &self.wiki_dir, &self.reserved),
            )
        });

        let mut errors = tags.errors;
        errors.extend(raw.errors);
        errors.extend(nav.errors);

        log::debug!(
            "wiki index build finished generation={} tags={} nav_entries={} errors={} elapsed_ms={}",
            generation,
            tags.value.len(),
            nav.value.len(),
            errors.len(),
            started.elapsed().as_millis()
        );

        IndexSnapshot {
            tag_index: Arc::new(tags.value),
            raw_file_index: Arc::new(raw.value),
            nav: Arc::new(nav.value),
            errors,
            generation,
            built_at: SystemTime::now(),
        }
    }
}

/// Observable cache status, published on every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStatus {
    pub state: CacheState,
    /// Generation of the snapshot currently served (0 before the first).
    pub generation: u64,
    /// Background rebuilds completed so far.
    pub rebuilds: u64,
    pub last_errors: Vec<WalkError>,
    pub last_panic: Option<String>,
}

impl CacheStatus {
    fn empty() -> Self {
        Self {
            state: CacheState::Empty,
            generation: 0,
            rebuilds: 0,
            last_errors: Vec::new(),
            last_panic: None,
        }
    }
}

struct CacheInner {
    builder: SnapshotBuilder,
    state: AtomicU8,
    snapshot: RwLock<Option<Arc<IndexSnapshot>>>,
    /// Serializes every build so an older build can never replace a newer one.
    build_lane: Mutex<()>,
    rebuild_running: AtomicBool,
    rebuild_pending: AtomicBool,
    generation: AtomicU64,
    rebuilds: AtomicU64,
    status: watch::Sender<CacheStatus>,
}

/// Shared handle to the index cache. Cloning is cheap.
#[derive(Clone)]
pub struct IndexCache {
    inner: Arc<CacheInner>,
}

impl std::fmt::Debug for IndexCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexCache")
            .field("state", &self.state())
            .field("generation", &self.inner.generation.load(Ordering::SeqCst))
            .finish()
    }
}

impl IndexCache {
    pub fn new(builder: SnapshotBuilder) -> Self {
        let (status, _) = watch::channel(CacheStatus::empty());
        Self {
            inner: Arc::new(CacheInner {
                builder,
                state: AtomicU8::new(CacheState::Empty as u8),
                snapshot: RwLock::new(None),
                build_lane: Mutex::new(()),
                rebuild_running: AtomicBool::new(false),
                rebuild_pending: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                rebuilds: AtomicU64::new(0),
                status,
            }),
        }
    }

    pub fn builder(&self) -> &SnapshotBuilder {
        &self.inner.builder
    }

    pub fn state(&self) -> CacheState {
        CacheState::load(&self.inner.state)
    }

    pub fn status(&self) -> CacheStatus {
        self.inner.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CacheStatus> {
        self.inner.status.subscribe()
    }

    /// Returns the current snapshot, building it first if none exists.
    ///
    /// Never waits for a background rebuild: while one is in flight the
    /// previous snapshot is returned.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        if let Some(snapshot) = self.current() {
            return snapshot;
        }

        let _lane = self.inner.build_lane.lock();
        if let Some(snapshot) = self.current() {
            return snapshot;
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        log::info!("wiki index first build started generation={generation}");
        let snapshot = Arc::new(self.inner.builder.build(generation));
        *self.inner.snapshot.write() = Some(snapshot.clone());

        // An invalidation that raced this build already moved the state on.
        let _ = self.inner.state.compare_exchange(
            CacheState::Empty as u8,
            CacheState::Valid as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        self.inner.publish(|status| {
            status.generation = snapshot.generation;
            status.last_errors = snapshot.errors.clone();
        });
        snapshot
    }

    fn current(&self) -> Option<Arc<IndexSnapshot>> {
        self.inner.snapshot.read().clone()
    }

    /// Marks the cache stale and schedules a background rebuild. Returns
    /// without waiting for it.
    ///
    /// Invalidations that arrive while a rebuild runs coalesce into exactly
    /// one follow-up rebuild.
    pub fn invalidate(&self) {
        if self.inner.snapshot.read().is_none() {
            // Nothing built and nothing building: the first read will see
            // the change anyway.
            if let Some(_lane) = self.inner.build_lane.try_lock() {
                if self.inner.snapshot.read().is_none() {
                    return;
                }
            }
        }

        self.inner.rebuild_pending.store(true, Ordering::SeqCst);
        self.inner
            .state
            .store(CacheState::Invalidating as u8, Ordering::SeqCst);
        self.inner.publish(|_| {});

        if self.inner.rebuild_running.swap(true, Ordering::SeqCst) {
            log::debug!("wiki index rebuild already running; coalesced");
            return;
        }
        spawn_rebuild_worker(self.inner.clone());
    }
}

impl CacheInner {
    fn publish(&self, update: impl FnOnce(&mut CacheStatus)) {
        self.status.send_modify(|status| {
            update(status);
            status.state = CacheState::load(&self.state);
            status.rebuilds = self.rebuilds.load(Ordering::SeqCst);
        });
    }

    fn rebuild_once(&self) {
        let _lane = self.build_lane.lock();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        log::info!("wiki index rebuild started generation={generation}");

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.builder.build(generation)
        }));

        match result {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                *self.snapshot.write() = Some(snapshot.clone());
                self.rebuilds.fetch_add(1, Ordering::SeqCst);
                self.settle();
                self.publish(|status| {
                    status.generation = snapshot.generation;
                    status.last_errors = snapshot.errors.clone();
                    status.last_panic = None;
                });
            }
            Err(panic_info) => {
                let message = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "rebuild panicked".to_string()
                };
                log::warn!("wiki index rebuild panicked generation={generation} error={message}");
                self.settle();
                self.publish(|status| status.last_panic = Some(message));
            }
        }
    }

    /// Leaves `Invalidating` unless another invalidation is queued.
    fn settle(&self) {
        if self.rebuild_pending.load(Ordering::SeqCst) {
            return;
        }
        let settled = if self.snapshot.read().is_some() {
            CacheState::Valid
        } else {
            CacheState::Empty
        };
        self.state.store(settled as u8, Ordering::SeqCst);
        // A late invalidation may have landed between the check and the store.
        if self.rebuild_pending.load(Ordering::SeqCst) {
            self.state
                .store(CacheState::Invalidating as u8, Ordering::SeqCst);
        }
    }
}

fn spawn_rebuild_worker(inner: Arc<CacheInner>) {
    let worker = inner.clone();
    let spawned = thread::Builder::new()
        .name("wiki-index-rebuild".to_string())
        .spawn(move || run_rebuild_worker(&worker));

    if let Err(error) = spawned {
        log::warn!("wiki index rebuild worker failed to start error={error}");
        inner.rebuild_running.store(false, Ordering::SeqCst);
    }
}

fn run_rebuild_worker(inner: &CacheInner) {
    loop {
        while inner.rebuild_pending.swap(false, Ordering::SeqCst) {
            inner.rebuild_once();
        }
        inner.rebuild_running.store(false, Ordering::SeqCst);

        // Re-check after releasing the flag so a late invalidation is never
        // left without a worker.
        if !inner.rebuild_pending.load(Ordering::SeqCst) {
            break;
        }
        if inner.rebuild_running.swap(true, Ordering::SeqCst) {
            break;
        }
    }
}
