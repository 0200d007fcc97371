//! Bounded fan-out for one cycle.
//!
//! At most `capacity` tasks run at once. The slot is released when the
//! spawned future finishes (or unwinds), which makes the "exactly one
//! done() per task" rule impossible to break. Cancellation is cooperative:
//! tasks read the group token at their own await points.
//!
//! The group is shared (`&self` everywhere) so running tasks can submit
//! follow-up work into the same bound.

use crate::error::{ExporterError, Result};
use std::future::Future;
use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Ceiling on simultaneous outbound calls per cycle.
pub const MAX_CONCURRENCY: usize = 50;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinReport {
    pub completed: usize,
    pub panicked: usize,
}

/// Held by a running task; dropping it is the task's `done()`.
struct TaskSlot {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
}

impl Drop for TaskSlot {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct TaskGroup {
    token: CancellationToken,
    semaphore: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    spawned: AtomicUsize,
    tasks: Mutex<JoinSet<()>>,
}

impl TaskGroup {
    pub fn new(parent: &CancellationToken, capacity: usize) -> Self {
        Self {
            token: parent.child_token(),
            semaphore: Arc::new(Semaphore::new(capacity.max(1))),
            in_flight: Arc::new(AtomicUsize::new(0)),
            spawned: AtomicUsize::new(0),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    pub fn with_default_capacity(parent: &CancellationToken) -> Self {
        Self::new(parent, MAX_CONCURRENCY)
    }

    /// Token shared by every task of the group.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    /// Blocks until a slot is free, then spawns `task`.
    ///
    /// A cancelled group still spawns; the task is expected to notice the
    /// token at its first remote call.
    pub async fn add<F>(&self, task: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ExporterError::Cancelled)?;
        let slot = self.occupy(permit);

        self.spawn(async move {
            let _slot = slot;
            task.await;
        });
        Ok(())
    }

    /// Spawns `task` right away; it waits for a slot before running.
    ///
    /// For tasks submitting follow-up work: a task holding a slot must
    /// not block on `add`, or a full group would wait on itself.
    pub fn submit<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let semaphore = self.semaphore.clone();
        let in_flight = self.in_flight.clone();

        self.spawn(async move {
            // The semaphore is never closed.
            let Ok(permit) = semaphore.acquire_owned().await else {
                return;
            };
            in_flight.fetch_add(1, Ordering::SeqCst);
            let _slot = TaskSlot {
                _permit: permit,
                in_flight,
            };
            task.await;
        });
    }

    /// Joins every task added so far, including tasks submitted while
    /// waiting.
    pub async fn wait(&self) -> JoinReport {
        let mut report = JoinReport::default();

        loop {
            let mut tasks = mem::take(&mut *self.lock_tasks());
            if tasks.is_empty() {
                break;
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(()) => report.completed += 1,
                    Err(e) if e.is_panic() => {
                        error!("Fan-out task panicked: {}", e);
                        report.panicked += 1;
                    }
                    Err(e) => {
                        debug!("Fan-out task aborted: {}", e);
                        report.completed += 1;
                    }
                }
            }
        }

        debug!(
            "Joined {} tasks ({} panicked)",
            report.completed + report.panicked,
            report.panicked
        );

        report
    }

    fn occupy(&self, permit: OwnedSemaphorePermit) -> TaskSlot {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        TaskSlot {
            _permit: permit,
            in_flight: self.in_flight.clone(),
        }
    }

    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.lock_tasks().spawn(task);
        self.spawned.fetch_add(1, Ordering::SeqCst);
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, JoinSet<()>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
