// world_map_core/server/src/concurrent/thread_pools.rs
use crate::core::config::ThreadPoolConfig;
use crate::core::error::{WorldError, WorldResult};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, info, warn};

/// One unit of map update work.
pub type UpdateJob<'a> = Box<dyn FnOnce() + Send + 'a>;

/// Runs a batch of independent jobs and returns only once all of them finished.
///
/// Serial and pooled execution share this interface so the scheduler's
/// ordering does not depend on which one is configured.
pub enum UpdateExecutor {
    Serial,
    Pooled(Arc<ThreadPool>),
}

impl UpdateExecutor {
    pub fn from_config(config: &ThreadPoolConfig) -> WorldResult<Self> {
        if config.map_update_threads == 0 {
            info!("Map updates run serially on the driver thread");
            return Ok(UpdateExecutor::Serial);
        }
        let available = num_cpus::get();
        if config.map_update_threads > available {
            warn!(
                "Requested {} map update threads, but only {} cores are available. Performance may be impacted.",
                config.map_update_threads, available
            );
        }
        let pool = Self::create_pool("map-update", config.map_update_threads)?;
        info!("Map update pool started with {} threads", config.map_update_threads);
        Ok(UpdateExecutor::Pooled(Arc::new(pool)))
    }

    fn create_pool(name_str: &str, num_threads: usize) -> WorldResult<ThreadPool> {
        let name_for_thread_name = name_str.to_string();
        ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(move |i| format!("{}-{}", name_for_thread_name, i))
            .build()
            .map_err(|e| WorldError::ThreadingError(format!("Failed to build {} pool: {}", name_str, e)))
    }

    pub fn is_pooled(&self) -> bool {
        matches!(self, UpdateExecutor::Pooled(_))
    }

    /// Runs every job to completion. A panicking job is logged and does not
    /// stop the others in the batch. Returns the number of jobs that panicked.
    pub fn run_batch<'a>(&self, jobs: Vec<UpdateJob<'a>>) -> usize {
        match self {
            UpdateExecutor::Serial => jobs.into_iter().map(run_isolated).filter(|ok| !ok).count(),
            UpdateExecutor::Pooled(pool) => {
                let failures = std::sync::atomic::AtomicUsize::new(0);
                let failures_ref = &failures;
                pool.scope(|scope| {
                    for job in jobs {
                        scope.spawn(move |_| {
                            if !run_isolated(job) {
                                failures_ref.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                            }
                        });
                    }
                });
                failures.into_inner()
            }
        }
    }
}

fn run_isolated(job: UpdateJob<'_>) -> bool {
    match catch_unwind(AssertUnwindSafe(job)) {
        Ok(()) => true,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!("Map update job panicked: {}", message);
            false
        }
    }
}
