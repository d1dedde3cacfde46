//! Bounded worker pool.
//!
//! Tasks go through a bounded queue (submitters wait when it is full) and
//! run on at most `max_workers` tokio tasks. Workers are spawned on demand
//! and retire after [`IDLE_TIMEOUT`] without work. Every task runs behind a
//! panic barrier: a panicking task is logged and the worker keeps going.

use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, warn};

use crate::error::PoolError;

/// How long a worker waits for work before it exits.
pub const IDLE_TIMEOUT: Duration = Duration::from_millis(100);

type Job = BoxFuture<'static, ()>;

// ---------------------------------------------------------------------------
// WaitGroup
// ---------------------------------------------------------------------------

/// Counting barrier: `wait` resolves once every `add` is matched by `done`.
#[derive(Clone, Default)]
struct WaitGroup {
    inner: Arc<WaitGroupInner>,
}

#[derive(Default)]
struct WaitGroupInner {
    count: AtomicUsize,
    notify: Notify,
}

impl WaitGroup {
    fn add(&self) {
        self.inner.count.fetch_add(1, Ordering::SeqCst);
    }

    fn done(&self) {
        if self.inner.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.notify.notify_waiters();
        }
    }

    fn guard(&self) -> WaitGroupGuard {
        WaitGroupGuard(self.clone())
    }

    async fn wait(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Calls `done` on drop, so a unit is released even if its task unwinds.
struct WaitGroupGuard(WaitGroup);

impl Drop for WaitGroupGuard {
    fn drop(&mut self) {
        self.0.done();
    }
}

// ---------------------------------------------------------------------------
// WorkerPool
// ---------------------------------------------------------------------------

struct PoolInner {
    max_workers: usize,
    max_capacity: usize,
    idle_timeout: Duration,
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<Job>>,
    workers: AtomicUsize,
    idle: AtomicUsize,
    waiting: AtomicUsize,
    pending: WaitGroup,
}

/// Cheap to clone; clones share the same workers and queue.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("max_workers", &self.inner.max_workers)
            .field("max_capacity", &self.inner.max_capacity)
            .field("running_workers", &self.running_workers())
            .field("waiting_tasks", &self.waiting_tasks())
            .finish()
    }
}

impl WorkerPool {
    /// Pool with at most `max_workers` concurrent tasks and a queue of
    /// `max_capacity` (at least one) tasks.
    pub fn new(max_workers: usize, max_capacity: usize) -> Self {
        Self::with_idle_timeout(max_workers, max_capacity, IDLE_TIMEOUT)
    }

    pub fn with_idle_timeout(max_workers: usize, max_capacity: usize, idle_timeout: Duration) -> Self {
        let (tx, rx) = mpsc::channel(max_capacity.max(1));
        Self {
            inner: Arc::new(PoolInner {
                max_workers: max_workers.max(1),
                max_capacity,
                idle_timeout,
                sender: Mutex::new(Some(tx)),
                receiver: tokio::sync::Mutex::new(rx),
                workers: AtomicUsize::new(0),
                idle: AtomicUsize::new(0),
                waiting: AtomicUsize::new(0),
                pending: WaitGroup::default(),
            }),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.inner.max_workers
    }

    pub fn max_capacity(&self) -> usize {
        self.inner.max_capacity
    }

    pub fn running_workers(&self) -> usize {
        self.inner.workers.load(Ordering::SeqCst)
    }

    /// Tasks submitted but not yet picked up by a worker.
    pub fn waiting_tasks(&self) -> usize {
        self.inner.waiting.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.sender().is_none()
    }

    /// Queue `task`. Waits while the queue is full. Fails only once the
    /// pool has been stopped. Cancel-safe.
    pub async fn submit<F>(&self, task: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Some(sender) = self.sender() else {
            return Err(PoolError::Stopped);
        };
        // Reserving first keeps the counters untouched if this future is
        // dropped while waiting for room.
        let permit = sender.reserve().await.map_err(|_| PoolError::Stopped)?;
        self.inner.pending.add();
        self.inner.waiting.fetch_add(1, Ordering::SeqCst);
        permit.send(task.boxed());
        self.ensure_worker();
        Ok(())
    }

    /// A fresh batch scope on this pool.
    pub fn group(&self) -> Group {
        Group {
            pool: self.clone(),
            wg: WaitGroup::default(),
            counts: Arc::new(GroupCounts::default()),
        }
    }

    /// Refuse new work, then wait for queued and running tasks to finish.
    pub async fn stop_and_wait(&self) {
        let sender = self
            .inner
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(sender);
        self.inner.pending.wait().await;
        debug!(max_workers = self.inner.max_workers, "worker pool stopped");
    }

    fn sender(&self) -> Option<mpsc::Sender<Job>> {
        self.inner
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn ensure_worker(&self) {
        let inner = &self.inner;
        let needed = inner.workers.load(Ordering::SeqCst) == 0
            || inner.idle.load(Ordering::SeqCst) < inner.waiting.load(Ordering::SeqCst);
        if needed && claim_worker_slot(inner) {
            tokio::spawn(worker_loop(Arc::clone(inner)));
        }
    }
}

fn claim_worker_slot(inner: &PoolInner) -> bool {
    inner
        .workers
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
            (n < inner.max_workers).then_some(n + 1)
        })
        .is_ok()
}

async fn worker_loop(inner: Arc<PoolInner>) {
    loop {
        inner.idle.fetch_add(1, Ordering::SeqCst);
        let next = tokio::time::timeout(inner.idle_timeout, async {
            inner.receiver.lock().await.recv().await
        })
        .await;
        inner.idle.fetch_sub(1, Ordering::SeqCst);

        let job = match next {
            Ok(Some(job)) => job,
            Ok(None) => break,
            Err(_) => {
                inner.workers.fetch_sub(1, Ordering::SeqCst);
                // A submit may have counted on this worker just before it retired.
                if inner.waiting.load(Ordering::SeqCst) > 0 && claim_worker_slot(&inner) {
                    continue;
                }
                return;
            }
        };

        inner.waiting.fetch_sub(1, Ordering::SeqCst);
        if let Err(panic) = AssertUnwindSafe(job).catch_unwind().await {
            error!(panic = %panic_message(panic.as_ref()), "worker task panicked");
        }
        inner.pending.done();
    }
    inner.workers.fetch_sub(1, Ordering::SeqCst);
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

#[derive(Default)]
struct GroupCounts {
    submitted: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    panicked: AtomicUsize,
}

/// Outcome tally of one [`Group`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupReport {
    pub submitted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub panicked: usize,
}

impl std::ops::AddAssign for GroupReport {
    fn add_assign(&mut self, other: Self) {
        self.submitted += other.submitted;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.panicked += other.panicked;
    }
}

/// Batch of tasks on a shared pool. Waiting on a group does not stop the
/// pool.
pub struct Group {
    pool: WorkerPool,
    wg: WaitGroup,
    counts: Arc<GroupCounts>,
}

impl Group {
    /// Queue a fallible task. Errors and panics are logged and counted,
    /// never propagated.
    pub async fn submit<F, T, E>(&self, task: F) -> Result<(), PoolError>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
    {
        self.wg.add();
        let guard = self.wg.guard();
        let counts = Arc::clone(&self.counts);
        let wrapped = async move {
            let _guard = guard;
            match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(_)) => {
                    counts.succeeded.fetch_add(1, Ordering::SeqCst);
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "task failed");
                    counts.failed.fetch_add(1, Ordering::SeqCst);
                }
                Err(panic) => {
                    error!(panic = %panic_message(panic.as_ref()), "task panicked");
                    counts.panicked.fetch_add(1, Ordering::SeqCst);
                }
            }
        };
        self.pool.submit(wrapped).await?;
        self.counts.submitted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Block until every submitted task has finished.
    pub async fn wait(self) -> GroupReport {
        self.wg.wait().await;
        GroupReport {
            submitted: self.counts.submitted.load(Ordering::SeqCst),
            succeeded: self.counts.succeeded.load(Ordering::SeqCst),
            failed: self.counts.failed.load(Ordering::SeqCst),
            panicked: self.counts.panicked.load(Ordering::SeqCst),
        }
    }
}
