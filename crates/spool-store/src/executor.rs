//! Single-threaded persistence worker.
//!
//! Every disk write of every feature runs on one dedicated thread fed by a
//! [`BackPressuredQueue`]. Serializing the work is what keeps writes to a
//! batch file totally ordered without per-file locks.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use spool_common::{InternalLogger, LogLevel, LogTarget};
use spool_config::ShutdownPolicy;

use crate::queue::{BackPressureStrategy, BackPressuredQueue};

const WORKER_POLL_INTERVAL: Duration = Duration::from_millis(50);
const MAX_IDLE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A unit of persistence work.
pub struct PersistenceTask {
    label: String,
    work: Box<dyn FnOnce() + Send + 'static>,
}

impl PersistenceTask {
    pub fn new(label: impl Into<String>, work: impl FnOnce() + Send + 'static) -> Self {
        Self {
            label: label.into(),
            work: Box::new(work),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl std::fmt::Debug for PersistenceTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceTask")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Outcome of [`PersistenceExecutor::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShutdownReport {
    /// Whether the queue emptied within the wait timeout.
    pub reached_idle: bool,
    /// Leftover tasks run on the stopping thread.
    pub drained: usize,
    /// Leftover tasks discarded.
    pub dropped: usize,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Run one task, containing any panic it raises.
fn execute(task: PersistenceTask, logger: &dyn InternalLogger) {
    let PersistenceTask { label, work } = task;
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(work)) {
        logger.log(
            LogLevel::Error,
            LogTarget::Maintainer,
            &format!(
                "persistence task '{}' panicked: {}",
                label,
                panic_message(payload.as_ref())
            ),
        );
    }
}

/// Serialized executor for persistence tasks.
pub struct PersistenceExecutor {
    queue: Arc<BackPressuredQueue<PersistenceTask>>,
    pending: Arc<AtomicUsize>,
    busy: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    /// Open for submissions. Enqueues hold the read side so shutdown cannot
    /// close the executor between the check and the enqueue.
    accepting: RwLock<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    logger: Arc<dyn InternalLogger>,
}

impl PersistenceExecutor {
    pub fn new(
        name: &str,
        strategy: BackPressureStrategy<PersistenceTask>,
        logger: Arc<dyn InternalLogger>,
    ) -> Self {
        let pending = Arc::new(AtomicUsize::new(0));

        // Dropped tasks never run; keep the pending count honest.
        let user_dropped = strategy.item_dropped_callback();
        let dropped_pending = pending.clone();
        let strategy = strategy.with_on_item_dropped(move |task: &PersistenceTask| {
            dropped_pending.fetch_sub(1, Ordering::SeqCst);
            user_dropped(task);
        });

        let queue = Arc::new(BackPressuredQueue::new(strategy, logger.clone()));
        let busy = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(true));

        let worker = {
            let queue = queue.clone();
            let pending = pending.clone();
            let busy = busy.clone();
            let running = running.clone();
            let logger = logger.clone();
            thread::Builder::new()
                .name(name.to_string())
                .spawn(move || {
                    while running.load(Ordering::SeqCst) || !queue.is_empty() {
                        if let Some(task) = queue.take_timeout(WORKER_POLL_INTERVAL) {
                            busy.store(true, Ordering::SeqCst);
                            execute(task, logger.as_ref());
                            busy.store(false, Ordering::SeqCst);
                            pending.fetch_sub(1, Ordering::SeqCst);
                        }
                    }
                })
        };
        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                logger.log(
                    LogLevel::Error,
                    LogTarget::Maintainer,
                    &format!("unable to start persistence worker, running inline: {}", e),
                );
                None
            }
        };

        Self {
            queue,
            pending,
            busy,
            running,
            accepting: RwLock::new(true),
            worker: Mutex::new(worker),
            logger,
        }
    }

    fn has_worker(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Queue `work` for the worker. Never blocks on the worker and never fails.
    ///
    /// Back-pressure callbacks run during the enqueue and must not submit.
    pub fn submit(&self, label: impl Into<String>, work: impl FnOnce() + Send + 'static) {
        let task = PersistenceTask::new(label, work);
        let accepting = self.accepting.read().unwrap_or_else(PoisonError::into_inner);
        if !*accepting {
            drop(accepting);
            self.logger.log(
                LogLevel::Warn,
                LogTarget::Maintainer,
                &format!("executor is shut down, task '{}' rejected", task.label()),
            );
            return;
        }
        if !self.has_worker() {
            drop(accepting);
            execute(task, self.logger.as_ref());
            return;
        }
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.queue.offer(task);
    }

    /// Tasks queued or executing.
    pub fn pending_task_count(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Wait until no task is pending, polling at most every 10 ms.
    pub fn wait_to_idle(&self, timeout: Duration) -> bool {
        let interval = (timeout / 10).clamp(Duration::from_millis(1), MAX_IDLE_POLL_INTERVAL);
        let start = Instant::now();
        loop {
            if self.pending_task_count() == 0 {
                return true;
            }
            if start.elapsed() >= timeout {
                return false;
            }
            thread::sleep(interval);
        }
    }

    /// Remove every queued task without running it.
    pub fn drain(&self) -> Vec<PersistenceTask> {
        let drained = self.queue.drain();
        self.pending.fetch_sub(drained.len(), Ordering::SeqCst);
        drained
    }

    /// Stop accepting work, wait for the queue to empty, then settle leftovers by `policy`.
    pub fn shutdown(&self, timeout: Duration, policy: ShutdownPolicy) -> ShutdownReport {
        *self.accepting.write().unwrap_or_else(PoisonError::into_inner) = false;
        let reached_idle = self.wait_to_idle(timeout);
        let leftovers = self.drain();
        self.running.store(false, Ordering::SeqCst);

        let mut report = ShutdownReport {
            reached_idle,
            ..ShutdownReport::default()
        };
        if !leftovers.is_empty() {
            // A task still running on the worker may be writing the same batch.
            let worker_quiet = self.wait_until_not_busy(timeout);
            match policy {
                ShutdownPolicy::DrainToStorage if worker_quiet => {
                    report.drained = leftovers.len();
                    self.logger.log(
                        LogLevel::Info,
                        LogTarget::Maintainer,
                        &format!("draining {} persistence tasks on shutdown", report.drained),
                    );
                    for task in leftovers {
                        execute(task, self.logger.as_ref());
                    }
                }
                _ => {
                    report.dropped = leftovers.len();
                    self.logger.log(
                        LogLevel::Warn,
                        LogTarget::Maintainer,
                        &format!("dropping {} persistence tasks on shutdown", report.dropped),
                    );
                }
            }
        }

        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if self.busy.load(Ordering::SeqCst) {
                self.logger.log(
                    LogLevel::Warn,
                    LogTarget::Maintainer,
                    "persistence worker still busy, detaching it",
                );
            } else if handle.join().is_err() {
                self.logger.log(
                    LogLevel::Error,
                    LogTarget::Maintainer,
                    "persistence worker terminated abnormally",
                );
            }
        }
        report
    }

    fn wait_until_not_busy(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        while self.busy.load(Ordering::SeqCst) {
            if start.elapsed() >= timeout {
                return false;
            }
            thread::sleep(MAX_IDLE_POLL_INTERVAL);
        }
        true
    }

    pub fn is_shut_down(&self) -> bool {
        !*self.accepting.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for PersistenceExecutor {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
