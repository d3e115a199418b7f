//! Interface traits of the tile-storage and compositing layer.
//!
//! The scheduler treats pixel work as opaque. A [`RegionWalker`] describes
//! the spatial footprint of one recomputation; a [`TileMerger`] performs it.
//! Both are implemented by the tile engine, never by this crate.

use crate::geometry::Rect;

/// Descriptor of the tile region one job will touch.
///
/// The scheduler reads the rects at admission time and snapshots them into
/// the running-job slot, so later mutation of the underlying walker cannot
/// race the conflict check.
pub trait RegionWalker: Send + Sync {
    /// The region this job reads.
    fn access_rect(&self) -> Rect;

    /// The region this job owns and writes.
    fn change_rect(&self) -> Rect;

    /// The level of detail the walker operates at (0 = full resolution).
    fn level_of_detail(&self) -> i32 {
        0
    }
}

/// The opaque pixel computation behind a merge job.
///
/// Invoked exactly once per dispatched job, on a worker thread. Failure
/// reporting is the merger's own concern; the scheduler tracks completion
/// only.
pub trait TileMerger: Send {
    /// Runs the recomputation for the walker's region.
    fn merge(&mut self, walker: &dyn RegionWalker);
}
