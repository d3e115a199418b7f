//! Strokes: logical, possibly multi-job editing operations.
//!
//! A stroke owns a FIFO of jobs plus the mode flags of its strategy. The
//! queue dispatches jobs one at a time from the head stroke; the stroke
//! itself only tracks state, it never runs anything.
//!
//! # State machine
//!
//! ```text
//! Empty ──first dispatch──► Initialized ──end()──► Ended
//!                                                   │ (jobs or running remain)
//!                                                   ▼
//!                                                Draining ──drained──► dequeued
//!
//! cancel() reaches Cancelled from any state; running jobs finish normally.
//! ```

mod job;
mod strategy;

pub use job::{JobUnit, Sequentiality, StrokeJob};
pub use strategy::{LodSyncStrategyFactory, StrokeStrategy, SyncStrokeSpec};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::trace;

use crate::error::StrokeError;

/// Externally observable lifecycle state of a stroke.
///
/// A dequeued (finished) stroke is no longer observable; resolving its id
/// yields nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrokeState {
    /// Created, no job dispatched yet.
    Empty,
    /// At least one job has been dispatched.
    Initialized,
    /// Ended by its owner; nothing queued, nothing running.
    Ended,
    /// Ended, but queued or running jobs remain.
    Draining,
    /// Cancelled; undispatched jobs were discarded.
    Cancelled,
}

pub(crate) struct Stroke {
    serial: u64,
    strategy: Box<dyn StrokeStrategy>,
    jobs: VecDeque<StrokeJob>,
    level_of_detail: i32,
    initialized: bool,
    ended: bool,
    cancelled: bool,
    prev_job_sequential: bool,
    buddy: Option<u64>,
    /// Jobs of this stroke currently executing on workers. Shared with the
    /// execution units, which decrement it on completion.
    running: Arc<AtomicUsize>,
}

impl Stroke {
    pub(crate) fn new(serial: u64, strategy: Box<dyn StrokeStrategy>, level_of_detail: i32) -> Self {
        Self {
            serial,
            strategy,
            jobs: VecDeque::new(),
            level_of_detail,
            initialized: false,
            ended: false,
            cancelled: false,
            prev_job_sequential: false,
            buddy: None,
            running: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn serial(&self) -> u64 {
        self.serial
    }

    pub(crate) fn name(&self) -> &str {
        self.strategy.name()
    }

    pub(crate) fn level_of_detail(&self) -> i32 {
        self.level_of_detail
    }

    pub(crate) fn is_exclusive(&self) -> bool {
        self.strategy.is_exclusive()
    }

    pub(crate) fn supports_wrap_around(&self) -> bool {
        self.strategy.supports_wrap_around()
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub(crate) fn is_ended(&self) -> bool {
        self.ended
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub(crate) fn buddy(&self) -> Option<u64> {
        self.buddy
    }

    pub(crate) fn set_buddy(&mut self, serial: u64) {
        self.buddy = Some(serial);
    }

    pub(crate) fn has_jobs(&self) -> bool {
        !self.jobs.is_empty()
    }

    pub(crate) fn running_jobs(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn running_handle(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.running)
    }

    /// True once the stroke can be dequeued and dropped.
    pub(crate) fn is_reclaimable(&self) -> bool {
        self.ended && self.jobs.is_empty() && self.running_jobs() == 0
    }

    /// The previously dispatched job was sequential, so the next one must
    /// wait for the stroke to go idle.
    pub(crate) fn prev_job_sequential(&self) -> bool {
        self.prev_job_sequential
    }

    pub(crate) fn next_job_sequential(&self) -> bool {
        self.jobs.front().is_some_and(|j| j.is_sequential())
    }

    pub(crate) fn next_job_barrier(&self) -> bool {
        self.jobs.front().is_some_and(|j| j.is_barrier())
    }

    pub(crate) fn next_job_rects(&self) -> Option<(crate::geometry::Rect, crate::geometry::Rect)> {
        self.jobs
            .front()
            .map(|j| (j.access_rect(), j.change_rect()))
    }

    /// Appends a job. Fails once the stroke has been ended.
    pub(crate) fn add_job(&mut self, job: StrokeJob) -> Result<(), StrokeError> {
        if self.ended {
            return Err(StrokeError::StrokeEnded);
        }
        self.jobs.push_back(job);
        Ok(())
    }

    /// Removes and returns the head job, marking the stroke initialized and
    /// recording the job's sequentiality for the next admission check.
    pub(crate) fn pop_one_job(&mut self) -> Option<StrokeJob> {
        let job = self.jobs.pop_front()?;
        self.initialized = true;
        self.prev_job_sequential = job.is_sequential();
        Some(job)
    }

    /// Marks the stroke ended. Returns true if it was still open, so the
    /// queue can maintain its open-stroke counter.
    pub(crate) fn end(&mut self) -> bool {
        let was_open = !self.ended;
        self.ended = true;
        was_open
    }

    /// Discards undispatched jobs and marks the stroke cancelled. Running
    /// jobs are left to finish. Returns the number of discarded jobs and
    /// whether the stroke was still open.
    pub(crate) fn cancel(&mut self) -> (usize, bool) {
        let discarded = self.jobs.len();
        self.jobs.clear();
        self.cancelled = true;
        let was_open = self.end();
        trace!(
            stroke = self.serial,
            discarded,
            "stroke cancelled"
        );
        (discarded, was_open)
    }

    pub(crate) fn state(&self) -> StrokeState {
        if self.cancelled {
            StrokeState::Cancelled
        } else if self.ended {
            if self.has_jobs() || self.running_jobs() > 0 {
                StrokeState::Draining
            } else {
                StrokeState::Ended
            }
        } else if self.initialized {
            StrokeState::Initialized
        } else {
            StrokeState::Empty
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;

    struct NoopUnit;

    impl JobUnit for NoopUnit {
        fn access_rect(&self) -> Rect {
            Rect::new(0, 0, 8, 8)
        }

        fn change_rect(&self) -> Rect {
            Rect::new(0, 0, 8, 8)
        }

        fn run(&mut self) {}
    }

    struct PlainStrategy;

    impl StrokeStrategy for PlainStrategy {}

    fn stroke() -> Stroke {
        Stroke::new(1, Box::new(PlainStrategy), 0)
    }

    fn job() -> StrokeJob {
        StrokeJob::concurrent(Box::new(NoopUnit))
    }

    #[test]
    fn test_new_stroke_is_empty() {
        let s = stroke();
        assert_eq!(s.state(), StrokeState::Empty);
        assert!(!s.has_jobs());
        assert!(!s.is_reclaimable());
    }

    #[test]
    fn test_jobs_pop_in_fifo_order() {
        let mut s = stroke();
        s.add_job(StrokeJob::sequential(Box::new(NoopUnit))).unwrap();
        s.add_job(job()).unwrap();

        let first = s.pop_one_job().unwrap();
        assert!(first.is_sequential());
        assert!(s.prev_job_sequential());
        assert_eq!(s.state(), StrokeState::Initialized);

        let second = s.pop_one_job().unwrap();
        assert!(!second.is_sequential());
        assert!(!s.prev_job_sequential());
        assert!(s.pop_one_job().is_none());
    }

    #[test]
    fn test_add_job_after_end_fails() {
        let mut s = stroke();
        assert!(s.end());
        assert!(matches!(s.add_job(job()), Err(StrokeError::StrokeEnded)));
        // A second end is not "open" any more
        assert!(!s.end());
    }

    #[test]
    fn test_ended_empty_stroke_is_reclaimable() {
        let mut s = stroke();
        s.end();
        assert_eq!(s.state(), StrokeState::Ended);
        assert!(s.is_reclaimable());
    }

    #[test]
    fn test_ended_stroke_with_jobs_is_draining() {
        let mut s = stroke();
        s.add_job(job()).unwrap();
        s.end();
        assert_eq!(s.state(), StrokeState::Draining);
        assert!(!s.is_reclaimable());
    }

    #[test]
    fn test_cancel_discards_queued_jobs() {
        let mut s = stroke();
        s.add_job(job()).unwrap();
        s.add_job(job()).unwrap();

        let (discarded, was_open) = s.cancel();
        assert_eq!(discarded, 2);
        assert!(was_open);
        assert!(!s.has_jobs());
        assert_eq!(s.state(), StrokeState::Cancelled);
        assert!(s.is_reclaimable());
    }

    #[test]
    fn test_cancel_with_running_job_is_not_reclaimable() {
        let mut s = stroke();
        s.add_job(job()).unwrap();
        let _ = s.pop_one_job().unwrap();
        s.running_handle().fetch_add(1, Ordering::SeqCst);

        s.cancel();
        assert!(!s.is_reclaimable());

        s.running_handle().fetch_sub(1, Ordering::SeqCst);
        assert!(s.is_reclaimable());
    }

    #[test]
    fn test_barrier_job_predicates() {
        let mut s = stroke();
        s.add_job(StrokeJob::barrier(Box::new(NoopUnit))).unwrap();
        assert!(s.next_job_barrier());
        assert!(s.next_job_sequential());
    }
}
