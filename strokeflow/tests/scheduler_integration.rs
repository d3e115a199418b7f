//! Integration tests for the stroke scheduling engine.
//!
//! These drive the public surface the way the editing front end and the
//! dispatch loop would: strokes and jobs come in on one side, synthetic
//! merge jobs on the other, and the tests observe dispatch decisions through
//! gated execution units and the notification channel.
//!
//! Run with: `cargo test --test scheduler_integration`

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};

use strokeflow::{
    EventReceiver, JobUnit, Rect, RegionWalker, SchedulerConfig, StrokeJob, StrokeQueue,
    StrokeState, StrokeStrategy, TileMerger, UpdateEvent, UpdaterContext,
};

// ============================================================================
// Helpers
// ============================================================================

struct TestStrategy {
    exclusive: bool,
}

impl TestStrategy {
    fn plain() -> Box<dyn StrokeStrategy> {
        Box::new(Self { exclusive: false })
    }

    fn exclusive() -> Box<dyn StrokeStrategy> {
        Box::new(Self { exclusive: true })
    }
}

impl StrokeStrategy for TestStrategy {
    fn name(&self) -> &str {
        "integration-stroke"
    }

    fn is_exclusive(&self) -> bool {
        self.exclusive
    }
}

/// Stroke job unit recording its label on execution, optionally parking on a
/// gate until the test releases it.
struct TestUnit {
    label: &'static str,
    rect: Rect,
    log: Arc<Mutex<Vec<&'static str>>>,
    gate: Option<Receiver<()>>,
}

impl JobUnit for TestUnit {
    fn access_rect(&self) -> Rect {
        self.rect
    }

    fn change_rect(&self) -> Rect {
        self.rect
    }

    fn run(&mut self) {
        self.log.lock().unwrap().push(self.label);
        if let Some(gate) = &self.gate {
            let _ = gate.recv();
        }
    }
}

struct TestWalker {
    rect: Rect,
}

impl RegionWalker for TestWalker {
    fn access_rect(&self) -> Rect {
        self.rect
    }

    fn change_rect(&self) -> Rect {
        self.rect
    }
}

/// Merger parking on a gate so a merge job stays "running" under test
/// control.
struct GatedMerger {
    log: Arc<Mutex<Vec<&'static str>>>,
    gate: Receiver<()>,
}

impl TileMerger for GatedMerger {
    fn merge(&mut self, _walker: &dyn RegionWalker) {
        self.log.lock().unwrap().push("merge");
        let _ = self.gate.recv();
    }
}

struct Harness {
    queue: StrokeQueue,
    context: UpdaterContext,
    events: EventReceiver,
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl Harness {
    fn new(workers: usize) -> Self {
        let (context, events) =
            UpdaterContext::new(&SchedulerConfig::with_worker_threads(workers)).unwrap();
        Self {
            queue: StrokeQueue::new(),
            context,
            events,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn unit(&self, label: &'static str, rect: Rect) -> Box<dyn JobUnit> {
        Box::new(TestUnit {
            label,
            rect,
            log: Arc::clone(&self.log),
            gate: None,
        })
    }

    fn gated_unit(&self, label: &'static str, rect: Rect) -> (Box<dyn JobUnit>, Sender<()>) {
        let (tx, rx) = bounded(1);
        (
            Box::new(TestUnit {
                label,
                rect,
                log: Arc::clone(&self.log),
                gate: Some(rx),
            }),
            tx,
        )
    }

    /// Dispatches a gated merge job the way the external dirty-region
    /// tracker would, returning its release handle. Panics if the context
    /// refuses it.
    fn start_merge(&self, rect: Rect) -> Sender<()> {
        let (tx, rx) = bounded(1);
        let mut guard = self.context.lock();
        assert!(guard.has_spare_worker(), "no spare worker for merge job");
        let walker = Arc::new(TestWalker { rect });
        assert!(guard.is_job_allowed(walker.as_ref()));
        guard.add_merge_job(
            walker,
            Box::new(GatedMerger {
                log: Arc::clone(&self.log),
                gate: rx,
            }),
        );
        tx
    }

    fn drain(&self) {
        self.queue.process_queue(&self.context, false);
    }

    fn wait_finished(&self, mut n: usize) {
        while n > 0 {
            match self.events.recv_timeout(Duration::from_secs(5)).unwrap() {
                UpdateEvent::JobFinished => n -= 1,
                UpdateEvent::ContinueUpdate(_) => {}
            }
        }
    }

    fn log(&self) -> Vec<&'static str> {
        self.log.lock().unwrap().clone()
    }
}

fn rect(i: i32) -> Rect {
    Rect::new(i * 100, 0, 10, 10)
}

// ============================================================================
// Scenario A: capacity bounds the drain, head stroke goes first
// ============================================================================

/// Empty queue, capacity 2, one non-exclusive stroke with 3 jobs and merge
/// work pending externally: the drain dispatches at most 2 jobs, drawn from
/// the stroke first, in enqueue order.
#[test]
fn scenario_a_drain_respects_capacity_and_fifo() {
    let h = Harness::new(2);
    let s1 = h.queue.start_stroke(TestStrategy::plain());
    let (u0, r0) = h.gated_unit("j0", rect(0));
    let (u1, r1) = h.gated_unit("j1", rect(1));
    h.queue.add_job(s1, StrokeJob::concurrent(u0)).unwrap();
    h.queue.add_job(s1, StrokeJob::concurrent(u1)).unwrap();
    h.queue
        .add_job(s1, StrokeJob::concurrent(h.unit("j2", rect(2))))
        .unwrap();
    h.queue.end_stroke(s1);

    h.queue.process_queue(&h.context, true);

    // Both workers taken by the stroke; the third job and the external merge
    // work must wait.
    assert!(!h.context.lock().has_spare_worker());
    assert!(h.queue.has_pending_jobs(s1));

    r0.send(()).unwrap();
    r1.send(()).unwrap();
    h.wait_finished(2);
    h.drain();
    h.wait_finished(1);

    let log = h.log();
    assert_eq!(log.len(), 3);
    // The first two run concurrently; only their set is deterministic.
    let mut first_two = vec![log[0], log[1]];
    first_two.sort_unstable();
    assert_eq!(first_two, vec!["j0", "j1"]);
    assert_eq!(log[2], "j2");
}

// ============================================================================
// Scenario B: exclusive strokes wait out merge jobs
// ============================================================================

#[test]
fn scenario_b_exclusive_stroke_waits_for_merge_job() {
    let h = Harness::new(2);
    let release_merge = h.start_merge(rect(9));

    let s1 = h.queue.start_stroke(TestStrategy::exclusive());
    h.queue
        .add_job(s1, StrokeJob::concurrent(h.unit("excl", rect(0))))
        .unwrap();
    h.queue.end_stroke(s1);

    // A worker is spare, but the merge job blocks the exclusive stroke.
    h.drain();
    assert!(h.queue.has_pending_jobs(s1));

    release_merge.send(()).unwrap();
    h.wait_finished(1);
    assert_eq!(h.log(), vec!["merge"]);

    h.drain();
    h.wait_finished(1);
    assert_eq!(h.log(), vec!["merge", "excl"]);
}

#[test]
fn non_exclusive_stroke_runs_beside_merge_job() {
    let h = Harness::new(2);
    let release_merge = h.start_merge(rect(9));

    let s1 = h.queue.start_stroke(TestStrategy::plain());
    h.queue
        .add_job(s1, StrokeJob::concurrent(h.unit("paint", rect(0))))
        .unwrap();
    h.queue.end_stroke(s1);

    h.drain();
    h.wait_finished(1); // The stroke job; the merge is still parked.
    assert!(h.log().contains(&"paint"));

    release_merge.send(()).unwrap();
    h.wait_finished(1);
}

// ============================================================================
// Scenario C: cancellation with a running job
// ============================================================================

#[test]
fn scenario_c_cancel_keeps_running_job_but_discards_the_rest() {
    let h = Harness::new(1);
    let s1 = h.queue.start_stroke(TestStrategy::plain());
    let (u0, r0) = h.gated_unit("running", rect(0));
    h.queue.add_job(s1, StrokeJob::concurrent(u0)).unwrap();
    h.queue
        .add_job(s1, StrokeJob::concurrent(h.unit("queued-1", rect(1))))
        .unwrap();
    h.queue
        .add_job(s1, StrokeJob::concurrent(h.unit("queued-2", rect(2))))
        .unwrap();

    h.drain();
    assert_eq!(h.queue.stroke_state(s1), Some(StrokeState::Initialized));

    assert!(h.queue.cancel_stroke(s1));
    assert!(!h.queue.has_pending_jobs(s1));
    // Draining, not gone: one job is still on a worker.
    assert_eq!(h.queue.stroke_state(s1), Some(StrokeState::Cancelled));
    h.drain();
    assert!(!h.queue.is_empty());

    // The running job completes normally.
    r0.send(()).unwrap();
    h.wait_finished(1);
    assert_eq!(h.log(), vec!["running"]);

    // The next drain dequeues the cancelled stroke.
    h.drain();
    assert!(h.queue.is_empty());
    assert!(h.queue.stroke_state(s1).is_none());
}

// ============================================================================
// Barrier jobs
// ============================================================================

#[test]
fn barrier_job_waits_for_total_isolation() {
    let h = Harness::new(2);
    let s1 = h.queue.start_stroke(TestStrategy::plain());
    let (u0, r0) = h.gated_unit("before", rect(0));
    h.queue.add_job(s1, StrokeJob::concurrent(u0)).unwrap();
    h.queue
        .add_job(s1, StrokeJob::barrier(h.unit("barrier", rect(1))))
        .unwrap();
    h.queue
        .add_job(s1, StrokeJob::concurrent(h.unit("after", rect(2))))
        .unwrap();
    h.queue.end_stroke(s1);

    h.drain();
    // A sibling job is running: the barrier must wait.
    h.drain();
    assert!(h.queue.has_pending_jobs(s1));
    assert_eq!(h.log(), vec!["before"]);

    r0.send(()).unwrap();
    h.wait_finished(1);

    // Externally pending work also blocks a barrier.
    h.queue.process_queue(&h.context, true);
    assert!(h.queue.has_pending_jobs(s1));

    h.drain();
    h.wait_finished(1);
    h.drain();
    h.wait_finished(1);
    assert_eq!(h.log(), vec!["before", "barrier", "after"]);
}

#[test]
fn barrier_job_waits_for_merge_jobs() {
    let h = Harness::new(2);
    let release_merge = h.start_merge(rect(9));

    let s1 = h.queue.start_stroke(TestStrategy::plain());
    h.queue
        .add_job(s1, StrokeJob::barrier(h.unit("barrier", rect(0))))
        .unwrap();
    h.queue.end_stroke(s1);

    h.drain();
    assert!(h.queue.has_pending_jobs(s1));

    release_merge.send(()).unwrap();
    h.wait_finished(1);
    h.drain();
    h.wait_finished(1);
    assert_eq!(h.log(), vec!["merge", "barrier"]);
}

// ============================================================================
// Teardown
// ============================================================================

#[test]
fn wait_for_done_flushes_all_slots() {
    let h = Harness::new(4);
    let s1 = h.queue.start_stroke(TestStrategy::plain());
    for i in 0..4 {
        let label: &'static str = ["a", "b", "c", "d"][i as usize];
        h.queue
            .add_job(s1, StrokeJob::concurrent(h.unit(label, rect(i))))
            .unwrap();
    }
    h.queue.end_stroke(s1);
    h.drain();

    h.context.wait_for_done();
    assert_eq!(h.log().len(), 4);
    h.drain();
    assert!(h.queue.is_empty());
}
