//! Fixed-size worker pool with last-in-first-out dispatch.
//!
//! Workers are plain OS threads sharing one pending structure. Submission
//! pushes onto the front and workers pop from the front, so the most
//! recently submitted task is the next one a free worker receives. Callers
//! must not assume FIFO fairness.
//!
//! Waits are bounded and retried so that a caller blocked on a task always
//! observes a concurrent shutdown.

mod task;

use std::cell::Cell;
use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{AlphaResult, ExecutionError, ValidationError};

pub use task::{CancellationToken, NoopTask, Task, TaskHandle, TaskId, TaskPhase, WaitOutcome};

thread_local! {
    static ON_WORKER: Cell<bool> = const { Cell::new(false) };
}

/// True when called from an executor worker thread.
///
/// Code that fans work out to the pool checks this to avoid waiting on
/// sub-tasks from inside a worker, which could starve the pool.
#[must_use]
pub fn on_worker_thread() -> bool {
    ON_WORKER.with(Cell::get)
}

/// Executor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Number of workers started by [`TaskExecutor::new`].
    pub workers: usize,
    /// Upper bound on a single wait inside [`TaskExecutor::wait_for`].
    pub wait_poll_interval: Duration,
    /// Per-worker join deadline during [`TaskExecutor::shutdown`].
    pub join_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get),
            wait_poll_interval: Duration::from_millis(50),
            join_timeout: Duration::from_secs(2),
        }
    }
}

/// Accumulated statistics for one task kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskKindStats {
    /// Completed executions.
    pub executions: u64,
    /// Total time spent enqueued.
    pub total_wait: Duration,
    /// Total time spent running.
    pub total_execution: Duration,
}

enum Pending {
    Run(TaskHandle),
    Stop,
}

struct PoolShared {
    pending: Mutex<VecDeque<Pending>>,
    available: Condvar,
    terminating: AtomicBool,
    stats: Mutex<HashMap<&'static str, TaskKindStats>>,
    live_workers: AtomicUsize,
}

impl PoolShared {
    fn pending(&self) -> MutexGuard<'_, VecDeque<Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next(&self) -> Pending {
        let mut pending = self.pending();
        loop {
            if let Some(next) = pending.pop_front() {
                return next;
            }
            pending = self
                .available
                .wait(pending)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn record(&self, kind: &'static str, waited: Duration, ran: Duration) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = stats.entry(kind).or_default();
        entry.executions += 1;
        entry.total_wait += waited;
        entry.total_execution += ran;
    }
}

fn worker_loop(index: usize, shared: &PoolShared) {
    ON_WORKER.with(|flag| flag.set(true));
    debug!(worker = index, "worker started");
    loop {
        let handle = match shared.next() {
            Pending::Run(handle) => handle,
            Pending::Stop => break,
        };

        let waited = handle.mark_started();
        let body = Arc::clone(handle.body());
        let token = handle.token().clone();
        let result = panic::catch_unwind(AssertUnwindSafe(|| body.run(&token)));
        let failed = result.is_err();
        let ran = handle.mark_finished(failed);
        shared.record(handle.kind(), waited, ran);

        if failed {
            // The pool is not replenished: a crashed worker is lost capacity.
            error!(
                worker = index,
                task_id = handle.id(),
                kind = handle.kind(),
                "task panicked; worker exiting"
            );
            break;
        }
    }
    shared.live_workers.fetch_sub(1, Ordering::AcqRel);
    debug!(worker = index, "worker stopped");
}

/// A pool of worker threads executing [`Task`]s.
pub struct TaskExecutor {
    config: ExecutorConfig,
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    next_id: AtomicU64,
    next_worker: AtomicUsize,
    exit_tx: Sender<usize>,
    exit_rx: Receiver<usize>,
}

impl std::fmt::Debug for TaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TaskExecutor {
    /// Starts an executor with `config.workers` workers.
    pub fn new(config: ExecutorConfig) -> AlphaResult<Self> {
        if config.workers == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "executor needs at least one worker".to_string(),
            }
            .into());
        }
        if config.wait_poll_interval.is_zero() {
            return Err(ValidationError::InvalidConfig {
                reason: "wait_poll_interval must be non-zero".to_string(),
            }
            .into());
        }

        let (exit_tx, exit_rx) = unbounded::<usize>();
        let executor = Self {
            shared: Arc::new(PoolShared {
                pending: Mutex::new(VecDeque::new()),
                available: Condvar::new(),
                terminating: AtomicBool::new(false),
                stats: Mutex::new(HashMap::new()),
                live_workers: AtomicUsize::new(0),
            }),
            workers: Mutex::new(Vec::with_capacity(config.workers)),
            next_id: AtomicU64::new(1),
            next_worker: AtomicUsize::new(0),
            exit_tx,
            exit_rx,
            config,
        };
        for _ in 0..executor.config.workers {
            executor.add_worker()?;
        }
        info!(workers = executor.config.workers, "task executor started");
        Ok(executor)
    }

    /// Registers one more worker thread and returns its index.
    ///
    /// This is the same entry point used for the initial workers, so extra
    /// (for example remote-backed) workers obey the same dispatch order and
    /// shutdown contract.
    pub fn add_worker(&self) -> AlphaResult<usize> {
        if self.is_terminating() {
            return Err(ExecutionError::ExecutorShutdown {
                kind: "worker".to_string(),
            }
            .into());
        }
        let index = self.next_worker.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::clone(&self.shared);
        let exit_tx = self.exit_tx.clone();
        shared.live_workers.fetch_add(1, Ordering::AcqRel);
        let spawned = thread::Builder::new()
            .name(format!("alphaplan-worker-{index}"))
            .spawn(move || {
                worker_loop(index, &shared);
                let _ = exit_tx.send(index);
            });
        match spawned {
            Ok(handle) => {
                self.workers
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(handle);
                Ok(index)
            }
            Err(e) => {
                self.shared.live_workers.fetch_sub(1, Ordering::AcqRel);
                Err(ExecutionError::WorkerSpawn {
                    message: e.to_string(),
                }
                .into())
            }
        }
    }

    /// Queues a task and returns its handle.
    ///
    /// The task goes to the front of the pending structure: it is the next
    /// one dispatched to a free worker.
    pub fn submit<T: Task + 'static>(&self, task: Arc<T>) -> AlphaResult<TaskHandle> {
        let body: Arc<dyn Task> = task;
        self.submit_dyn(body)
    }

    /// Queues an already type-erased task.
    pub fn submit_dyn(&self, body: Arc<dyn Task>) -> AlphaResult<TaskHandle> {
        let kind = body.kind();
        if self.is_terminating() {
            return Err(ExecutionError::ExecutorShutdown {
                kind: kind.to_string(),
            }
            .into());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = TaskHandle::new(id, body);
        self.shared
            .stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default();

        {
            let mut pending = self.shared.pending();
            // Re-check under the lock so shutdown never leaves a task behind.
            if self.is_terminating() {
                return Err(ExecutionError::ExecutorShutdown {
                    kind: kind.to_string(),
                }
                .into());
            }
            handle.mark_enqueued();
            pending.push_front(Pending::Run(handle.clone()));
        }
        self.shared.available.notify_one();
        debug!(task_id = id, kind, "task submitted");
        Ok(handle)
    }

    /// Blocks until the task is done or the executor terminates.
    pub fn wait_for(&self, handle: &TaskHandle) -> WaitOutcome {
        loop {
            if handle.is_done() {
                return handle.outcome();
            }
            if self.is_terminating() {
                return WaitOutcome::Abandoned;
            }
            handle.wait_done(self.config.wait_poll_interval);
        }
    }

    /// Requests cooperative cancellation of a task.
    pub fn terminate(&self, handle: &TaskHandle) {
        debug!(task_id = handle.id(), kind = handle.kind(), "cancellation requested");
        handle.cancel();
    }

    /// Stops the pool: queued tasks are dropped, running tasks finish, and
    /// each worker is joined within `join_timeout`. Idempotent.
    pub fn shutdown(&self) {
        if self.shared.terminating.swap(true, Ordering::AcqRel) {
            return;
        }

        let workers =
            std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        let dropped = {
            let mut pending = self.shared.pending();
            let dropped: Vec<TaskHandle> = pending
                .drain(..)
                .filter_map(|p| match p {
                    Pending::Run(handle) => Some(handle),
                    Pending::Stop => None,
                })
                .collect();
            for _ in 0..workers.len() {
                pending.push_front(Pending::Stop);
            }
            dropped
        };
        self.shared.available.notify_all();
        for handle in &dropped {
            handle.mark_abandoned();
        }

        let mut detached = 0usize;
        for worker in workers {
            let deadline = Instant::now() + self.config.join_timeout;
            while !worker.is_finished() {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                let _ = self.exit_rx.recv_timeout(deadline - now);
            }
            if worker.is_finished() {
                if worker.join().is_err() {
                    warn!("worker thread panicked outside a task");
                }
            } else {
                detached += 1;
                let timeout_ms =
                    u64::try_from(self.config.join_timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(timeout_ms, "worker did not stop in time; detaching");
            }
        }

        if detached == 0 {
            self.shared.pending().clear();
        }
        info!(
            abandoned = dropped.len(),
            detached,
            "task executor shut down"
        );
    }

    /// True once [`Self::shutdown`] has started.
    #[must_use]
    pub fn is_terminating(&self) -> bool {
        self.shared.terminating.load(Ordering::Acquire)
    }

    /// Workers still able to take tasks.
    #[must_use]
    pub fn live_workers(&self) -> usize {
        self.shared.live_workers.load(Ordering::Acquire)
    }

    /// Tasks waiting for a worker.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.shared
            .pending()
            .iter()
            .filter(|p| matches!(p, Pending::Run(_)))
            .count()
    }

    /// Snapshot of per-kind statistics.
    #[must_use]
    pub fn stats(&self) -> HashMap<String, TaskKindStats> {
        self.shared
            .stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| ((*k).to_string(), *v))
            .collect()
    }

    /// The configuration the executor was started with.
    #[must_use]
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }
}

impl Drop for TaskExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
