//! Notifications emitted by running jobs.
//!
//! Workers publish two events: an incremental-redraw hint carrying the
//! changed region, and a completion signal that wakes the dispatch loop so
//! it can drain the next admissible job. The channel is unbounded; events
//! are tiny and a worker must never block on a slow consumer.

use crate::geometry::Rect;

/// A notification from the execution layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateEvent {
    /// A job finished writing the given region; the front end should
    /// refresh it.
    ContinueUpdate(Rect),

    /// A worker slot was freed. The dispatch loop should call
    /// `StrokeQueue::process_queue` again.
    JobFinished,
}

/// Sending half of the event channel, cloned into every execution unit.
pub type EventSender = crossbeam_channel::Sender<UpdateEvent>;

/// Receiving half, handed to the dispatch loop / front end.
pub type EventReceiver = crossbeam_channel::Receiver<UpdateEvent>;

pub(crate) fn channel() -> (EventSender, EventReceiver) {
    crossbeam_channel::unbounded()
}
