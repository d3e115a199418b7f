//! Strokeflow - concurrent stroke scheduling for a tiled raster image
//!
//! This library coordinates background recomputation of a tiled raster image
//! while an interactive editing session keeps enqueuing new strokes. It
//! guarantees:
//!
//! - at most one conflicting spatial update in flight at a time,
//! - strict per-stroke job ordering, with sequential and barrier modes,
//! - level-of-detail (LOD) previews kept synchronized with full resolution,
//! - safe cancellation of in-flight work without corrupting shared state.
//!
//! # Architecture
//!
//! ```text
//! editing thread                 dispatch loop               workers
//!      │                              │                         │
//!      ▼                              ▼                         │
//! StrokeQueue ──process_queue──► UpdaterContext ──spawn──► run job
//!   strokes, admission             slot table,                 │
//!   rules, LOD buddies             conflict check              ▼
//!      ▲                              ▲            ContinueUpdate(rect),
//!      └────── JobFinished wakes ─────┴──────────── JobFinished events
//! ```
//!
//! The engine is constructible per editing session; nothing here is global.
//! Pixel work stays opaque: the tile engine supplies [`RegionWalker`] /
//! [`TileMerger`] implementations for merge jobs and [`JobUnit`]
//! implementations for stroke jobs, and the scheduler only ever looks at
//! their access/change rects.
//!
//! # Example
//!
//! ```ignore
//! use strokeflow::{SchedulerConfig, StrokeQueue, StrokeJob, UpdaterContext};
//!
//! let (context, events) = UpdaterContext::new(&SchedulerConfig::default())?;
//! let queue = StrokeQueue::new();
//!
//! let id = queue.start_stroke(Box::new(BrushStrategy::new()));
//! queue.add_job(id, StrokeJob::sequential(Box::new(dab)))?;
//! queue.end_stroke(id);
//!
//! // Dispatch loop: drain after every enqueue and every completion.
//! queue.process_queue(&context, false);
//! while let Ok(event) = events.recv() {
//!     match event {
//!         UpdateEvent::ContinueUpdate(rect) => redraw(rect),
//!         UpdateEvent::JobFinished => queue.process_queue(&context, false),
//!     }
//! }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod geometry;
pub mod queue;
pub mod stroke;
pub mod walker;

pub use config::SchedulerConfig;
pub use context::{JobsSnapshot, UpdaterContext, UpdaterContextGuard};
pub use error::StrokeError;
pub use events::{EventReceiver, UpdateEvent};
pub use geometry::Rect;
pub use queue::{StrokeId, StrokeQueue};
pub use stroke::{
    JobUnit, LodSyncStrategyFactory, Sequentiality, StrokeJob, StrokeState, StrokeStrategy,
    SyncStrokeSpec,
};
pub use walker::{RegionWalker, TileMerger};
