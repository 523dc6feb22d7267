//! File-backed wiki storage core.
//!
//! This crate provides the storage layer behind a personal wiki:
//! - Atomic page, tag sidecar and publish marker writes
//! - Tag and navigation indexes with a background-refreshed cache
//! - Concurrent full-text search on a bounded worker pool

pub mod cache;
pub mod config;
pub mod error;
pub mod nav;
pub mod page;
pub mod paths;
pub mod pool;
pub mod search;
pub mod storage;
pub mod store;
pub mod tags;
pub mod walk;

// Re-export main types
pub use cache::{CacheState, CacheStatus, IndexCache, IndexSnapshot, SnapshotBuilder};
pub use config::StorageConfig;
pub use error::{ErrorKind, Result, StorageError};
pub use nav::NavEntry;
pub use page::{Page, PageUpdate, RawFile};
pub use paths::{PageTitle, PathConventions};
pub use search::{ConcurrentSearch, SearchHit};
pub use storage::{CachedStorage, SharedStorage, WikiStorage};
pub use store::ContentStore;
pub use tags::{Tag, TagIndex};
pub use walk::{Indexed, WalkError};
