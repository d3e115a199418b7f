//! Scheduler configuration.

/// Fallback worker count when hardware parallelism cannot be queried.
pub const FALLBACK_WORKER_THREADS: usize = 4;

/// Configuration for the scheduling engine.
///
/// The engine is constructible per editing session; there is no process-wide
/// state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Number of worker threads in the updater pool. This is also the number
    /// of job slots: at most this many jobs run concurrently.
    pub worker_threads: usize,
}

impl SchedulerConfig {
    /// Creates a config with an explicit worker count.
    ///
    /// A count of zero is clamped to one.
    pub fn with_worker_threads(worker_threads: usize) -> Self {
        Self {
            worker_threads: worker_threads.max(1),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let worker_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(FALLBACK_WORKER_THREADS);
        Self { worker_threads }
    }
}
