//! Stroke jobs and their execution units.
//!
//! A job is one atomic callable unit of work belonging to a stroke. It is
//! never scheduled directly; the queue dispatches it through its owning
//! stroke so per-stroke ordering and the sequential/barrier rules hold.

use std::fmt;

use crate::geometry::Rect;

/// Ordering constraint a job places on its stroke.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Sequentiality {
    /// May overlap with other jobs of the same stroke.
    #[default]
    Concurrent,

    /// Must not overlap with any other job of the same stroke.
    Sequential,

    /// Must run in total isolation: no merge jobs, no stroke jobs, no
    /// externally pending work. Implies sequential.
    Barrier,
}

impl Sequentiality {
    /// Returns true for sequential and barrier jobs.
    pub fn is_sequential(self) -> bool {
        matches!(self, Self::Sequential | Self::Barrier)
    }

    /// Returns true for barrier jobs.
    pub fn is_barrier(self) -> bool {
        matches!(self, Self::Barrier)
    }
}

/// The callable payload of a stroke job.
///
/// Implementations come from the editing front end. The rect accessors feed
/// the spatial conflict check; `run` performs the opaque pixel computation on
/// a worker thread. `clone_for_lod` is the per-job level-of-detail clone
/// factory used to mirror jobs onto a stroke's LOD buddy; units that cannot
/// be downsampled return `None` and are simply not mirrored.
pub trait JobUnit: Send {
    /// The region this job reads.
    fn access_rect(&self) -> Rect;

    /// The region this job writes.
    fn change_rect(&self) -> Rect;

    /// Performs the work. Called exactly once, on a worker thread.
    fn run(&mut self);

    /// Produces a downsampled clone of this unit for the given LOD.
    fn clone_for_lod(&self, _level: i32) -> Option<Box<dyn JobUnit>> {
        None
    }
}

/// One unit of work queued on a stroke.
pub struct StrokeJob {
    sequentiality: Sequentiality,
    unit: Box<dyn JobUnit>,
}

impl StrokeJob {
    /// Creates a job with an explicit sequentiality.
    pub fn new(unit: Box<dyn JobUnit>, sequentiality: Sequentiality) -> Self {
        Self {
            sequentiality,
            unit,
        }
    }

    /// A job that may overlap with its stroke siblings.
    pub fn concurrent(unit: Box<dyn JobUnit>) -> Self {
        Self::new(unit, Sequentiality::Concurrent)
    }

    /// A job that runs alone within its stroke.
    pub fn sequential(unit: Box<dyn JobUnit>) -> Self {
        Self::new(unit, Sequentiality::Sequential)
    }

    /// A job that runs in total isolation from all other work.
    pub fn barrier(unit: Box<dyn JobUnit>) -> Self {
        Self::new(unit, Sequentiality::Barrier)
    }

    /// This job's ordering constraint.
    pub fn sequentiality(&self) -> Sequentiality {
        self.sequentiality
    }

    /// Returns true for sequential and barrier jobs.
    pub fn is_sequential(&self) -> bool {
        self.sequentiality.is_sequential()
    }

    /// Returns true for barrier jobs.
    pub fn is_barrier(&self) -> bool {
        self.sequentiality.is_barrier()
    }

    /// The region this job reads.
    pub fn access_rect(&self) -> Rect {
        self.unit.access_rect()
    }

    /// The region this job writes.
    pub fn change_rect(&self) -> Rect {
        self.unit.change_rect()
    }

    /// Mirrors this job for a LOD buddy stroke, preserving sequentiality.
    pub fn clone_for_lod(&self, level: i32) -> Option<StrokeJob> {
        let unit = self.unit.clone_for_lod(level)?;
        Some(StrokeJob::new(unit, self.sequentiality))
    }

    pub(crate) fn into_unit(self) -> Box<dyn JobUnit> {
        self.unit
    }
}

impl fmt::Debug for StrokeJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrokeJob")
            .field("sequentiality", &self.sequentiality)
            .field("access_rect", &self.unit.access_rect())
            .field("change_rect", &self.unit.change_rect())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopUnit(Rect);

    impl JobUnit for NoopUnit {
        fn access_rect(&self) -> Rect {
            self.0
        }

        fn change_rect(&self) -> Rect {
            self.0
        }

        fn run(&mut self) {}
    }

    #[test]
    fn test_sequentiality_predicates() {
        assert!(!Sequentiality::Concurrent.is_sequential());
        assert!(Sequentiality::Sequential.is_sequential());
        assert!(Sequentiality::Barrier.is_sequential());
        assert!(Sequentiality::Barrier.is_barrier());
        assert!(!Sequentiality::Sequential.is_barrier());
    }

    #[test]
    fn test_job_constructors() {
        let rect = Rect::new(0, 0, 8, 8);
        assert!(!StrokeJob::concurrent(Box::new(NoopUnit(rect))).is_sequential());
        assert!(StrokeJob::sequential(Box::new(NoopUnit(rect))).is_sequential());
        let barrier = StrokeJob::barrier(Box::new(NoopUnit(rect)));
        assert!(barrier.is_barrier());
        assert!(barrier.is_sequential());
        assert_eq!(barrier.access_rect(), rect);
    }

    #[test]
    fn test_default_unit_has_no_lod_clone() {
        let job = StrokeJob::concurrent(Box::new(NoopUnit(Rect::new(0, 0, 8, 8))));
        assert!(job.clone_for_lod(2).is_none());
    }
}
