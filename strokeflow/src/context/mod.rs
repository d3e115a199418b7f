//! The updater context: a fixed-capacity worker pool with spatial conflict
//! detection.
//!
//! The context owns one slot per worker thread. A slot holds the
//! admission-time snapshot of a running job's access/change rects, so the
//! conflict check never races the job's own execution. Admission plus
//! dispatch is made atomic by [`UpdaterContext::lock`], which returns an RAII
//! guard exposing every operation a dispatch decision needs.
//!
//! ```text
//! StrokeQueue::process_queue          external merge dispatch
//!          │                                   │
//!          ▼                                   ▼
//!    ┌───────────────── UpdaterContextGuard ─────────────────┐
//!    │ has_spare_worker / is_job_allowed / jobs_snapshot /   │
//!    │ current_level_of_detail / add_*_job                   │
//!    └──────────────────────┬───────────────────────────────┘
//!                           ▼
//!                 rayon worker pool (N threads, N slots)
//!                           │ on completion
//!                           ▼
//!        ContinueUpdate(rect) → free slot → JobFinished
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use crate::config::SchedulerConfig;
use crate::error::StrokeError;
use crate::events::{self, EventReceiver, EventSender, UpdateEvent};
use crate::geometry::Rect;
use crate::stroke::JobUnit;
use crate::walker::{RegionWalker, TileMerger};

/// Classification of the jobs currently occupying worker slots.
///
/// Consumed by the queue's admission checks: exclusive strokes must not run
/// beside merge jobs, and barrier jobs need both counts at zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct JobsSnapshot {
    /// Running jobs sourced from the external dirty-region tracker.
    pub merge_jobs: usize,
    /// Running jobs sourced from strokes.
    pub stroke_jobs: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum JobKind {
    Merge,
    Stroke,
}

/// Admission-time snapshot of one running job.
struct SlotSnapshot {
    access: Rect,
    change: Rect,
    kind: JobKind,
    lod: i32,
}

struct SlotTable {
    slots: Vec<Option<SlotSnapshot>>,
}

impl SlotTable {
    fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
        }
    }

    fn free_index(&self) -> Option<usize> {
        self.slots.iter().position(|s| s.is_none())
    }

    fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    fn running(&self) -> impl Iterator<Item = &SlotSnapshot> {
        self.slots.iter().flatten()
    }
}

struct ContextShared {
    table: Mutex<SlotTable>,
    all_done: Condvar,
}

/// Fixed-capacity execution context for stroke and merge jobs.
pub struct UpdaterContext {
    shared: Arc<ContextShared>,
    pool: rayon::ThreadPool,
    events: EventSender,
    capacity: usize,
}

impl UpdaterContext {
    /// Builds the context and its worker pool.
    ///
    /// Returns the receiving half of the notification channel along with the
    /// context; the dispatch loop listens on it for [`UpdateEvent::JobFinished`].
    pub fn new(config: &SchedulerConfig) -> Result<(Self, EventReceiver), StrokeError> {
        let capacity = config.worker_threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(capacity)
            .thread_name(|i| format!("updater-{i}"))
            .build()?;
        let (events, receiver) = events::channel();
        debug!(workers = capacity, "updater context created");

        let context = Self {
            shared: Arc::new(ContextShared {
                table: Mutex::new(SlotTable::new(capacity)),
                all_done: Condvar::new(),
            }),
            pool,
            events,
            capacity,
        };
        Ok((context, receiver))
    }

    /// Number of worker threads (and job slots).
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Locks the slot table so a sequence of admission checks and dispatches
    /// is atomic with respect to job completions and other dispatchers.
    pub fn lock(&self) -> UpdaterContextGuard<'_> {
        UpdaterContextGuard {
            table: self.shared.table.lock(),
            ctx: self,
        }
    }

    /// Blocks until every slot is free.
    ///
    /// Teardown and synchronous whole-image operations only; never called on
    /// the normal dispatch path.
    pub fn wait_for_done(&self) {
        let mut table = self.shared.table.lock();
        while table.occupied() > 0 {
            self.shared.all_done.wait(&mut table);
        }
    }
}

/// A job popped from a stroke, ready for a worker slot.
pub(crate) struct StrokeDispatch {
    pub unit: Box<dyn JobUnit>,
    pub lod: i32,
    pub running: Arc<AtomicUsize>,
    pub serial: u64,
    pub exclusive: bool,
    pub sequential: bool,
    pub barrier: bool,
}

/// RAII view over the locked slot table.
///
/// All admission reads and both dispatch entry points live here, so a caller
/// holding the guard observes a consistent "spare capacity + running jobs"
/// picture for the whole decision.
pub struct UpdaterContextGuard<'a> {
    table: MutexGuard<'a, SlotTable>,
    ctx: &'a UpdaterContext,
}

impl UpdaterContextGuard<'_> {
    /// Returns true if at least one worker slot is free.
    pub fn has_spare_worker(&self) -> bool {
        self.table.free_index().is_some()
    }

    /// Returns true if the candidate's regions do not conflict with any
    /// running job.
    ///
    /// The check is symmetric: the candidate's access rect against running
    /// change rects, and its change rect against both running access and
    /// change rects. Two jobs may read the same region concurrently.
    pub fn is_job_allowed(&self, walker: &dyn RegionWalker) -> bool {
        self.is_region_allowed(walker.access_rect(), walker.change_rect())
    }

    pub(crate) fn is_region_allowed(&self, access: Rect, change: Rect) -> bool {
        self.table.running().all(|slot| {
            !access.intersects(&slot.change)
                && !change.intersects(&slot.access)
                && !change.intersects(&slot.change)
        })
    }

    /// Counts running jobs by source.
    pub fn jobs_snapshot(&self) -> JobsSnapshot {
        let mut snapshot = JobsSnapshot::default();
        for slot in self.table.running() {
            match slot.kind {
                JobKind::Merge => snapshot.merge_jobs += 1,
                JobKind::Stroke => snapshot.stroke_jobs += 1,
            }
        }
        snapshot
    }

    /// The level of detail of the running jobs, or `None` when idle.
    ///
    /// All concurrently running jobs share one LOD; mixing levels is refused
    /// at admission.
    pub fn current_level_of_detail(&self) -> Option<i32> {
        self.table.running().next().map(|slot| slot.lod)
    }

    /// Dispatches a merge job sourced from the external dirty-region
    /// tracker.
    ///
    /// Precondition: the caller confirmed `has_spare_worker()` and
    /// `is_job_allowed()` while holding this guard.
    pub fn add_merge_job(&mut self, walker: Arc<dyn RegionWalker>, merger: Box<dyn TileMerger>) {
        debug_assert!(self.has_spare_worker(), "merge job dispatched without a spare worker");
        let Some(index) = self.table.free_index() else {
            warn!("merge job dropped: no free worker slot");
            return;
        };
        let change = walker.change_rect();
        self.table.slots[index] = Some(SlotSnapshot {
            access: walker.access_rect(),
            change,
            kind: JobKind::Merge,
            lod: walker.level_of_detail(),
        });
        trace!(slot = index, ?change, "merge job admitted");

        let shared = Arc::clone(&self.ctx.shared);
        let events = self.ctx.events.clone();
        self.ctx.pool.spawn(move || {
            let mut merger = merger;
            merger.merge(&*walker);
            finish_job(&shared, &events, index, change, None);
        });
    }

    /// Dispatches a job extracted from the head stroke by the queue.
    pub(crate) fn add_stroke_job(&mut self, dispatch: StrokeDispatch) {
        let snapshot = self.jobs_snapshot();
        debug_assert!(
            !dispatch.exclusive || snapshot.merge_jobs == 0,
            "exclusive stroke job admitted while merge jobs are running"
        );
        debug_assert!(
            !dispatch.barrier || self.table.occupied() == 0,
            "barrier job admitted while other work is in flight"
        );
        debug_assert!(
            !dispatch.sequential || dispatch.running.load(Ordering::SeqCst) == 0,
            "second job of a sequential stroke admitted while one is running"
        );
        debug_assert!(self.has_spare_worker(), "stroke job dispatched without a spare worker");
        let Some(index) = self.table.free_index() else {
            warn!(stroke = dispatch.serial, "stroke job dropped: no free worker slot");
            return;
        };

        let mut unit = dispatch.unit;
        let change = unit.change_rect();
        self.table.slots[index] = Some(SlotSnapshot {
            access: unit.access_rect(),
            change,
            kind: JobKind::Stroke,
            lod: dispatch.lod,
        });
        dispatch.running.fetch_add(1, Ordering::SeqCst);
        trace!(
            slot = index,
            stroke = dispatch.serial,
            lod = dispatch.lod,
            ?change,
            "stroke job admitted"
        );

        let shared = Arc::clone(&self.ctx.shared);
        let events = self.ctx.events.clone();
        let running = dispatch.running;
        self.ctx.pool.spawn(move || {
            unit.run();
            finish_job(&shared, &events, index, change, Some(running));
        });
    }
}

/// Completion path shared by merge and stroke execution units: redraw hint,
/// free the slot, wake the dispatch loop.
fn finish_job(
    shared: &ContextShared,
    events: &EventSender,
    index: usize,
    change: Rect,
    running: Option<Arc<AtomicUsize>>,
) {
    let _ = events.send(UpdateEvent::ContinueUpdate(change));
    {
        let mut table = shared.table.lock();
        table.slots[index] = None;
        if let Some(running) = running {
            running.fetch_sub(1, Ordering::SeqCst);
        }
        shared.all_done.notify_all();
    }
    let _ = events.send(UpdateEvent::JobFinished);
}
