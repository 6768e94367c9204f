//! Task abstraction, handles and cooperative cancellation.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender};

/// Sequential task identifier, assigned at submission.
pub type TaskId = u64;

/// A unit of work runnable on a [`super::TaskExecutor`].
///
/// Bodies that run for long should poll `token` at their own checkpoints;
/// the executor never preempts a running task.
pub trait Task: Send + Sync {
    /// Human-readable kind name, used as the statistics key.
    fn kind(&self) -> &'static str;

    /// Executes the task body.
    fn run(&self, token: &CancellationToken);
}

/// Task that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTask;

impl Task for NoopTask {
    fn kind(&self) -> &'static str {
        "noop"
    }

    fn run(&self, _token: &CancellationToken) {}
}

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// True once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Lifecycle phase of a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskPhase {
    /// Built but not yet queued.
    Created,
    /// Waiting in the pending structure.
    Enqueued,
    /// Picked up by a worker.
    Running,
    /// Finished, failed, or dropped at shutdown.
    Done,
}

impl TaskPhase {
    const fn to_u8(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Enqueued => 1,
            Self::Running => 2,
            Self::Done => 3,
        }
    }

    const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Created,
            1 => Self::Enqueued,
            2 => Self::Running,
            _ => Self::Done,
        }
    }
}

/// How a wait on a task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitOutcome {
    /// The task body ran to completion (possibly after observing cancellation).
    Completed,
    /// The task body panicked.
    Failed,
    /// The executor terminated before the task finished.
    Abandoned,
}

#[derive(Debug, Default, Clone, Copy)]
struct TaskTimes {
    enqueued: Option<DateTime<Utc>>,
    started: Option<DateTime<Utc>>,
    finished: Option<DateTime<Utc>>,
}

struct TaskShared {
    id: TaskId,
    kind: &'static str,
    body: Arc<dyn Task>,
    token: CancellationToken,
    phase: AtomicU8,
    failed: AtomicBool,
    abandoned: AtomicBool,
    times: Mutex<TaskTimes>,
    // Dropping the sender disconnects every receiver, waking all waiters.
    done_tx: Mutex<Option<Sender<()>>>,
    done_rx: Receiver<()>,
}

/// Handle to a submitted task.
#[derive(Clone)]
pub struct TaskHandle {
    shared: Arc<TaskShared>,
}

impl TaskHandle {
    pub(crate) fn new(id: TaskId, body: Arc<dyn Task>) -> Self {
        let (tx, rx) = bounded::<()>(1);
        Self {
            shared: Arc::new(TaskShared {
                id,
                kind: body.kind(),
                body,
                token: CancellationToken::new(),
                phase: AtomicU8::new(TaskPhase::Created.to_u8()),
                failed: AtomicBool::new(false),
                abandoned: AtomicBool::new(false),
                times: Mutex::new(TaskTimes::default()),
                done_tx: Mutex::new(Some(tx)),
                done_rx: rx,
            }),
        }
    }

    /// Identifier assigned at submission.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.shared.id
    }

    /// Kind name of the task body.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.shared.kind
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> TaskPhase {
        TaskPhase::from_u8(self.shared.phase.load(Ordering::Acquire))
    }

    /// True once the task reached [`TaskPhase::Done`].
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.phase() == TaskPhase::Done
    }

    /// True if the body panicked.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.shared.failed.load(Ordering::Acquire)
    }

    /// True if the task was dropped from the queue at shutdown.
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.shared.abandoned.load(Ordering::Acquire)
    }

    /// Requests cooperative cancellation.
    pub fn cancel(&self) {
        self.shared.token.cancel();
    }

    /// True once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shared.token.is_cancelled()
    }

    /// The token handed to the task body.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.shared.token
    }

    /// Time the task entered the pending structure.
    #[must_use]
    pub fn enqueued_at(&self) -> Option<DateTime<Utc>> {
        self.times().enqueued
    }

    /// Time a worker picked the task up.
    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.times().started
    }

    /// Time the task finished.
    #[must_use]
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.times().finished
    }

    fn times(&self) -> TaskTimes {
        *self.shared.times.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, phase: TaskPhase) {
        self.shared.phase.store(phase.to_u8(), Ordering::Release);
    }

    pub(crate) fn body(&self) -> &Arc<dyn Task> {
        &self.shared.body
    }

    pub(crate) fn mark_enqueued(&self) {
        self.shared
            .times
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .enqueued = Some(Utc::now());
        self.set_phase(TaskPhase::Enqueued);
    }

    /// Marks the task running and returns how long it waited.
    pub(crate) fn mark_started(&self) -> Duration {
        let now = Utc::now();
        let waited = {
            let mut times = self.shared.times.lock().unwrap_or_else(PoisonError::into_inner);
            times.started = Some(now);
            times.enqueued.map_or(Duration::ZERO, |at| elapsed(at, now))
        };
        self.set_phase(TaskPhase::Running);
        waited
    }

    /// Marks the task done and returns how long it ran.
    pub(crate) fn mark_finished(&self, failed: bool) -> Duration {
        let now = Utc::now();
        let ran = {
            let mut times = self.shared.times.lock().unwrap_or_else(PoisonError::into_inner);
            times.finished = Some(now);
            times.started.map_or(Duration::ZERO, |at| elapsed(at, now))
        };
        self.shared.failed.store(failed, Ordering::Release);
        self.set_phase(TaskPhase::Done);
        self.signal_done();
        ran
    }

    pub(crate) fn mark_abandoned(&self) {
        self.shared.abandoned.store(true, Ordering::Release);
        self.set_phase(TaskPhase::Done);
        self.signal_done();
    }

    fn signal_done(&self) {
        self.shared
            .done_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Blocks for at most `timeout`, returning early once the task is done.
    pub(crate) fn wait_done(&self, timeout: Duration) {
        // Nothing is ever sent: the channel only disconnects when the task is done.
        let _ = self.shared.done_rx.recv_timeout(timeout);
    }

    /// Outcome for a task that reached [`TaskPhase::Done`].
    pub(crate) fn outcome(&self) -> WaitOutcome {
        if self.is_abandoned() {
            WaitOutcome::Abandoned
        } else if self.is_failed() {
            WaitOutcome::Failed
        } else {
            WaitOutcome::Completed
        }
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("phase", &self.phase())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

fn elapsed(from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
    to.signed_duration_since(from).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_cancel_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_handle_lifecycle() {
        let handle = TaskHandle::new(1, Arc::new(NoopTask));
        assert_eq!(handle.phase(), TaskPhase::Created);
        handle.mark_enqueued();
        assert_eq!(handle.phase(), TaskPhase::Enqueued);
        assert!(handle.enqueued_at().is_some());
        handle.mark_started();
        assert_eq!(handle.phase(), TaskPhase::Running);
        handle.mark_finished(false);
        assert!(handle.is_done());
        assert_eq!(handle.outcome(), WaitOutcome::Completed);
        assert!(handle.finished_at() >= handle.started_at());
    }

    #[test]
    fn test_wait_done_returns_immediately_after_finish() {
        let handle = TaskHandle::new(2, Arc::new(NoopTask));
        handle.mark_enqueued();
        handle.mark_started();
        handle.mark_finished(true);
        let started = std::time::Instant::now();
        handle.wait_done(Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(handle.outcome(), WaitOutcome::Failed);
    }

    #[test]
    fn test_abandoned_outcome() {
        let handle = TaskHandle::new(3, Arc::new(NoopTask));
        handle.mark_enqueued();
        handle.mark_abandoned();
        assert_eq!(handle.outcome(), WaitOutcome::Abandoned);
    }
}
