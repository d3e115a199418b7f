//! The stroke queue: FIFO admission of stroke jobs into the updater context.
//!
//! All public operations serialize behind one mutex, making every admission
//! decision atomic with respect to concurrent `add_job`/`cancel_stroke`
//! calls from the editing thread.
//!
//! # Admission
//!
//! `process_queue` repeatedly extracts exactly one job from the head stroke
//! while all checks pass:
//!
//! 1. Stroke state — the head has jobs and its LOD matches whatever is
//!    currently executing; finished strokes are transparently dequeued and
//!    the check restarts on the new head.
//! 2. Exclusive access — an exclusive stroke's job never starts while a
//!    merge job is running.
//! 3. Sequential — a sequential job (or the successor of one) waits until
//!    its stroke has nothing in flight.
//! 4. Barrier — a barrier job waits until nothing at all is running or
//!    externally pending.
//! 5. LOD — the candidate's level of detail must equal the running one.
//!
//! A failed check defers dispatch to the next drain; it is never an error.
//!
//! # LOD buddies
//!
//! When a non-zero desired level of detail is configured and a strategy can
//! clone itself for it, `start_stroke` enqueues a downsampled "buddy" stroke
//! ahead of the full-resolution one and mirrors every later mutation onto
//! it. Stale buddy data is refreshed by a synchronization stroke obtained
//! from the [`LodSyncStrategyFactory`].

use std::collections::VecDeque;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::context::{StrokeDispatch, UpdaterContext, UpdaterContextGuard};
use crate::error::StrokeError;
use crate::stroke::{
    LodSyncStrategyFactory, Stroke, StrokeJob, StrokeState, StrokeStrategy, SyncStrokeSpec,
};

/// Opaque weak handle to a stroke.
///
/// The handle never keeps its stroke alive: once the stroke has drained and
/// been reclaimed, operations on the id become no-ops.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StrokeId(u64);

struct QueueState {
    strokes: VecDeque<Stroke>,
    next_serial: u64,
    open_strokes: usize,
    desired_lod: i32,
    lod_needs_sync: bool,
    // Cached head-stroke flags, recomputed whenever the head changes.
    head_exclusive: bool,
    head_wrap_around: bool,
}

impl QueueState {
    fn index_of(&self, serial: u64) -> Option<usize> {
        self.strokes.iter().position(|s| s.serial() == serial)
    }

    fn push_stroke(&mut self, strategy: Box<dyn StrokeStrategy>, level_of_detail: i32) -> u64 {
        let serial = self.next_serial;
        self.next_serial += 1;
        self.strokes
            .push_back(Stroke::new(serial, strategy, level_of_detail));
        self.open_strokes += 1;
        if self.strokes.len() == 1 {
            self.refresh_head_flags();
        }
        serial
    }

    /// Enqueues a pre-ended synchronization stroke refreshing LOD data.
    fn enqueue_sync_stroke(&mut self, spec: SyncStrokeSpec, level: i32) {
        let serial = self.next_serial;
        self.next_serial += 1;
        let mut stroke = Stroke::new(serial, spec.strategy, level);
        for job in spec.jobs {
            // The stroke is still open here; push cannot fail.
            let _ = stroke.add_job(job);
        }
        stroke.end();
        debug!(stroke = serial, lod = level, "synchronization stroke enqueued");
        self.strokes.push_back(stroke);
        if self.strokes.len() == 1 {
            self.refresh_head_flags();
        }
    }

    fn refresh_head_flags(&mut self) {
        let head = self.strokes.front();
        self.head_exclusive = head.map(Stroke::is_exclusive).unwrap_or(false);
        self.head_wrap_around = head.map(Stroke::supports_wrap_around).unwrap_or(false);
    }

    fn end_at(&mut self, index: usize) {
        if self.strokes[index].end() {
            self.open_strokes -= 1;
        }
    }

    fn cancel_at(&mut self, index: usize) -> usize {
        let (discarded, was_open) = self.strokes[index].cancel();
        if was_open {
            self.open_strokes -= 1;
        }
        discarded
    }

    /// The cascading admission loop of the head stroke.
    ///
    /// Dequeues finished strokes as it goes; the `front()?` access is the
    /// explicit empty-queue base case.
    fn pop_next_admissible(
        &mut self,
        ctx: &UpdaterContextGuard<'_>,
        external_jobs_pending: bool,
    ) -> Option<StrokeDispatch> {
        loop {
            let head = self.strokes.front()?;

            // Check 1: stroke state, with cascading drain of finished heads.
            if head.has_jobs() {
                let lod_compatible = match ctx.current_level_of_detail() {
                    None => true,
                    Some(running) => running == head.level_of_detail(),
                };
                if !lod_compatible {
                    trace!(
                        stroke = head.serial(),
                        lod = head.level_of_detail(),
                        "deferred: LOD incompatible with running jobs"
                    );
                    return None;
                }
                if !head.is_initialized() {
                    // First dispatch records the stroke's flags as the
                    // queue's effective flags.
                    self.head_exclusive = head.is_exclusive();
                    self.head_wrap_around = head.supports_wrap_around();
                }
            } else if head.is_reclaimable() {
                let finished = self.strokes.pop_front()?;
                debug!(
                    stroke = finished.serial(),
                    name = finished.name(),
                    "stroke drained, reclaiming"
                );
                self.refresh_head_flags();
                continue;
            } else {
                return None;
            }

            let snapshot = ctx.jobs_snapshot();
            let head = &mut self.strokes[0];

            // Check 2: exclusive strokes never overlap merge jobs.
            if head.is_exclusive() && snapshot.merge_jobs > 0 {
                trace!(stroke = head.serial(), "deferred: exclusive vs running merge jobs");
                return None;
            }

            // Check 3: sequential jobs wait for their stroke to go idle.
            let wants_sequencing = head.prev_job_sequential() || head.next_job_sequential();
            if wants_sequencing && head.running_jobs() > 0 {
                trace!(stroke = head.serial(), "deferred: sequential job, stroke busy");
                return None;
            }

            // Check 4: barrier jobs wait for total isolation.
            if head.next_job_barrier()
                && (snapshot.merge_jobs > 0 || snapshot.stroke_jobs > 0 || external_jobs_pending)
            {
                trace!(stroke = head.serial(), "deferred: barrier job, work in flight");
                return None;
            }

            // Check 5 (LOD) already passed above. Finally, the candidate's
            // regions must not conflict with any running job.
            let (access, change) = head.next_job_rects()?;
            if !ctx.is_region_allowed(access, change) {
                trace!(stroke = head.serial(), "deferred: spatial conflict with running job");
                return None;
            }

            let job = head.pop_one_job()?;
            let dispatch = StrokeDispatch {
                lod: head.level_of_detail(),
                running: head.running_handle(),
                serial: head.serial(),
                exclusive: head.is_exclusive(),
                sequential: job.is_sequential(),
                barrier: job.is_barrier(),
                unit: job.into_unit(),
            };
            trace!(
                stroke = dispatch.serial,
                lod = dispatch.lod,
                "job extracted for dispatch"
            );
            return Some(dispatch);
        }
    }
}

/// FIFO collection of strokes, owning all admission logic.
pub struct StrokeQueue {
    state: Mutex<QueueState>,
    lod_sync_factory: Option<Box<dyn LodSyncStrategyFactory>>,
}

impl StrokeQueue {
    /// Creates an empty queue without LOD preview support.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Creates an empty queue with a factory for LOD synchronization
    /// strokes, enabling buddy strokes for LOD-capable strategies.
    pub fn with_lod_sync_factory(factory: Box<dyn LodSyncStrategyFactory>) -> Self {
        Self::build(Some(factory))
    }

    fn build(lod_sync_factory: Option<Box<dyn LodSyncStrategyFactory>>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                strokes: VecDeque::new(),
                next_serial: 1,
                open_strokes: 0,
                desired_lod: 0,
                lod_needs_sync: false,
                head_exclusive: false,
                head_wrap_around: false,
            }),
            lod_sync_factory,
        }
    }

    /// Starts a new stroke and returns its weak handle.
    ///
    /// With a non-zero desired LOD and an LOD-capable strategy, a buddy
    /// stroke is enqueued ahead of the full-resolution one; stale buddy data
    /// additionally enqueues one synchronization stroke ahead of the pair.
    pub fn start_stroke(&self, strategy: Box<dyn StrokeStrategy>) -> StrokeId {
        let mut q = self.state.lock();
        let level = q.desired_lod;
        let buddy_strategy = if level > 0 {
            strategy.create_lod_clone(level)
        } else {
            None
        };

        if buddy_strategy.is_some() && q.lod_needs_sync {
            if let Some(factory) = &self.lod_sync_factory {
                let spec = factory.create(level);
                q.enqueue_sync_stroke(spec, level);
                q.lod_needs_sync = false;
            }
        }

        let serial = match buddy_strategy {
            Some(buddy_strategy) => {
                let buddy = q.push_stroke(buddy_strategy, level);
                let main = q.push_stroke(strategy, 0);
                // The pair sits at the tail: buddy first, full resolution last.
                let len = q.strokes.len();
                q.strokes[len - 2].set_buddy(main);
                q.strokes[len - 1].set_buddy(buddy);
                debug!(stroke = main, buddy, lod = level, "stroke started with LOD buddy");
                main
            }
            None => {
                let serial = q.push_stroke(strategy, 0);
                debug!(stroke = serial, "stroke started");
                serial
            }
        };
        StrokeId(serial)
    }

    /// Appends a job to the stroke, mirroring an LOD-adjusted clone onto its
    /// buddy. A no-op on an expired id.
    pub fn add_job(&self, id: StrokeId, job: StrokeJob) -> Result<(), StrokeError> {
        let mut q = self.state.lock();
        let Some(index) = q.index_of(id.0) else {
            warn!(stroke = id.0, "add_job on expired stroke handle");
            return Ok(());
        };
        if q.strokes[index].is_ended() {
            return Err(StrokeError::StrokeEnded);
        }

        if let Some(buddy) = q.strokes[index].buddy() {
            if let Some(buddy_index) = q.index_of(buddy) {
                let buddy_lod = q.strokes[buddy_index].level_of_detail();
                if let Some(mirrored) = job.clone_for_lod(buddy_lod) {
                    let _ = q.strokes[buddy_index].add_job(mirrored);
                }
            }
        }

        q.strokes[index].add_job(job)
    }

    /// Marks the stroke (and its buddy) as accepting no further jobs. A
    /// no-op on an expired id.
    pub fn end_stroke(&self, id: StrokeId) {
        let mut q = self.state.lock();
        let Some(index) = q.index_of(id.0) else {
            trace!(stroke = id.0, "end_stroke on expired stroke handle");
            return;
        };
        q.end_at(index);
        if let Some(buddy) = q.strokes[index].buddy() {
            if let Some(buddy_index) = q.index_of(buddy) {
                q.end_at(buddy_index);
            }
        }
        debug!(stroke = id.0, "stroke ended");
    }

    /// Discards the stroke's undispatched jobs and cancels it, mirroring the
    /// cancellation onto its buddy. Running jobs finish normally.
    ///
    /// Idempotent: returns false (and changes nothing) for an expired or
    /// already-cancelled id.
    pub fn cancel_stroke(&self, id: StrokeId) -> bool {
        let mut q = self.state.lock();
        let Some(index) = q.index_of(id.0) else {
            return false;
        };
        if q.strokes[index].is_cancelled() {
            return false;
        }
        let discarded = q.cancel_at(index);
        if let Some(buddy) = q.strokes[index].buddy() {
            if let Some(buddy_index) = q.index_of(buddy) {
                if !q.strokes[buddy_index].is_cancelled() {
                    q.cancel_at(buddy_index);
                }
            }
        }
        debug!(stroke = id.0, discarded, "stroke cancelled");
        true
    }

    /// Best-effort cancellation of the head stroke.
    ///
    /// Only acts on a head that its owner has already ended, so a live
    /// handle can never race the cancellation. On success the buddy is ended
    /// rather than cancelled.
    pub fn try_cancel_current_stroke(&self) -> bool {
        let mut q = self.state.lock();
        let Some(head) = q.strokes.front() else {
            return false;
        };
        if !head.is_ended() || head.is_cancelled() {
            return false;
        }
        let serial = head.serial();
        let buddy = head.buddy();
        q.cancel_at(0);
        if let Some(buddy) = buddy {
            if let Some(buddy_index) = q.index_of(buddy) {
                q.end_at(buddy_index);
            }
        }
        debug!(stroke = serial, "head stroke cancelled asynchronously");
        true
    }

    /// Drains admissible jobs from the head stroke into the context while
    /// spare workers remain.
    ///
    /// Lock order: context before queue, keeping "spare capacity plus
    /// admissible job" decisions consistent across both structures. Never
    /// blocks; with nothing admissible it returns immediately.
    pub fn process_queue(&self, context: &UpdaterContext, external_jobs_pending: bool) {
        let mut ctx = context.lock();
        let mut q = self.state.lock();
        while ctx.has_spare_worker() {
            match q.pop_next_admissible(&ctx, external_jobs_pending) {
                Some(dispatch) => ctx.add_stroke_job(dispatch),
                None => break,
            }
        }
    }

    /// Sets the level of detail for strokes started from now on.
    ///
    /// On change, buddy data for the new level is stale: one synchronization
    /// stroke is enqueued immediately (when a factory is configured), which
    /// clears the staleness again.
    pub fn set_desired_level_of_detail(&self, level: i32) {
        let mut q = self.state.lock();
        if level == q.desired_lod {
            return;
        }
        debug!(from = q.desired_lod, to = level, "desired level of detail changed");
        q.desired_lod = level;
        q.lod_needs_sync = true;
        if level > 0 {
            if let Some(factory) = &self.lod_sync_factory {
                let spec = factory.create(level);
                q.enqueue_sync_stroke(spec, level);
                q.lod_needs_sync = false;
            }
        }
    }

    /// Currently configured level of detail for new strokes.
    pub fn desired_level_of_detail(&self) -> i32 {
        self.state.lock().desired_lod
    }

    /// Marks LOD buddy data as stale, forcing the next LOD stroke start to
    /// enqueue a synchronization stroke. Called when full-resolution data
    /// changed outside the stroke system.
    pub fn invalidate_lod_cache(&self) {
        self.state.lock().lod_needs_sync = true;
    }

    /// Lifecycle state of the stroke, or `None` once it has been reclaimed.
    pub fn stroke_state(&self, id: StrokeId) -> Option<StrokeState> {
        let q = self.state.lock();
        q.index_of(id.0).map(|i| q.strokes[i].state())
    }

    /// Returns true while the stroke still has undispatched jobs.
    pub fn has_pending_jobs(&self, id: StrokeId) -> bool {
        let q = self.state.lock();
        q.index_of(id.0).is_some_and(|i| q.strokes[i].has_jobs())
    }

    /// Number of strokes in the queue, drained or not.
    pub fn len(&self) -> usize {
        self.state.lock().strokes.len()
    }

    /// Returns true if no strokes are queued.
    pub fn is_empty(&self) -> bool {
        self.state.lock().strokes.is_empty()
    }

    /// Number of strokes started but not yet ended.
    pub fn open_stroke_count(&self) -> usize {
        self.state.lock().open_strokes
    }

    /// Cached exclusivity of the current head stroke.
    ///
    /// The external merge dispatcher must consult this before feeding merge
    /// jobs into the context; admission check 2 covers the other direction.
    pub fn current_stroke_exclusive(&self) -> bool {
        self.state.lock().head_exclusive
    }

    /// Cached wrap-around support of the current head stroke.
    pub fn wrap_around_mode_supported(&self) -> bool {
        self.state.lock().head_wrap_around
    }
}

impl Default for StrokeQueue {
    fn default() -> Self {
        Self::new()
    }
}
