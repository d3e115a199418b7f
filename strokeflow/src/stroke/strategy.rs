//! Stroke strategies and the LOD synchronization factory.
//!
//! A strategy is the front end's description of one logical editing
//! operation: its mode flags and, when the operation can be previewed at a
//! lower resolution, a factory for a downsampled clone of itself.

use super::job::StrokeJob;

/// Per-operation behavior consumed by the queue at admission time.
pub trait StrokeStrategy: Send {
    /// Short name for logging.
    fn name(&self) -> &str {
        "stroke"
    }

    /// Exclusive strokes never run concurrently with merge jobs.
    fn is_exclusive(&self) -> bool {
        false
    }

    /// Whether the operation tolerates wrap-around (tiling) canvas mode.
    /// Cached by the queue while this stroke is at the head.
    fn supports_wrap_around(&self) -> bool {
        false
    }

    /// Produces a downsampled clone of this strategy for a LOD buddy stroke.
    ///
    /// Returning `None` (the default) opts the operation out of LOD
    /// previews; no buddy is created.
    fn create_lod_clone(&self, _level: i32) -> Option<Box<dyn StrokeStrategy>> {
        None
    }
}

/// A ready-to-enqueue synchronization stroke: the strategy plus the jobs
/// that refresh LOD tile data from full resolution.
pub struct SyncStrokeSpec {
    /// Strategy for the synchronization stroke.
    pub strategy: Box<dyn StrokeStrategy>,
    /// Jobs performing the downsample refresh, in execution order.
    pub jobs: Vec<StrokeJob>,
}

/// Factory producing synchronization strokes.
///
/// Invoked by the queue whenever LOD buddy data is stale: once immediately
/// when the desired level of detail changes, and again from `start_stroke`
/// after the full-resolution data has been invalidated.
pub trait LodSyncStrategyFactory: Send {
    /// Builds the synchronization stroke for the given level.
    fn create(&self, level: i32) -> SyncStrokeSpec;
}
