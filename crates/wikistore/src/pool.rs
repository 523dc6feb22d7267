//! Bounded worker pool shared by search scans and index rebuilds.

use std::sync::Arc;

use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::{Result, StorageError};

pub type WorkerPool = Arc<ThreadPool>;

/// Builds a pool of exactly `threads` workers.
pub fn build_worker_pool(threads: usize) -> Result<WorkerPool> {
    let pool = ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .thread_name(|index| format!("wiki-worker-{index}"))
        .build()
        .map_err(|error| StorageError::Internal(format!("worker pool: {error}")))?;
    log::debug!("wiki worker pool started threads={}", pool.current_num_threads());
    Ok(Arc::new(pool))
}
