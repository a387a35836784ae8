//! Task scheduling
//!
//! Runs background work immediately on the tokio worker pool or after a
//! delay. Delayed tasks sit in a timer queue owned by one scheduler
//! *generation*; a single timer task per generation hands due tasks to the
//! pool and never runs a task body itself.
//!
//! `stop()` ends the generation: pending tasks are dropped, the timer task
//! exits, and every `SchedulerHandle` cloned from it turns into a no-op.
//! The next `start()` creates a fresh generation, so nothing submitted
//! before a stop can fire after the following start. Work already handed
//! to the pool keeps running; only its follow-up submissions are ignored.

mod queue;

use crate::error::{Error, Result};
use queue::TimerQueue;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace};

/// A unit of background work
pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Identifies a pending delayed task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskHandle {
    generation: u64,
    id: u64,
}

/// Owns the current scheduler generation
#[derive(Default)]
pub struct Scheduler {
    current: Option<SchedulerHandle>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fresh generation. No-op if already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self) -> Result<SchedulerHandle> {
        if let Some(handle) = &self.current {
            return Ok(handle.clone());
        }
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;
        let handle = SchedulerHandle::spawn(runtime);
        debug!(generation = handle.generation(), "Scheduler started");
        self.current = Some(handle.clone());
        Ok(handle)
    }

    /// Stop the current generation. Safe to call repeatedly or before start.
    pub fn stop(&mut self) {
        if let Some(handle) = self.current.take() {
            handle.shutdown();
            debug!(generation = handle.generation(), "Scheduler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.current.is_some()
    }

    /// Handle to the running generation, if any
    pub fn handle(&self) -> Option<SchedulerHandle> {
        self.current.clone()
    }

    /// Hand `task` to the worker pool. Returns false when stopped.
    pub fn submit_now<F>(&self, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match &self.current {
            Some(handle) => handle.submit_now(task),
            None => false,
        }
    }

    /// Hand `task` to the worker pool after `delay`. Returns None when stopped.
    pub fn submit_after<F>(&self, task: F, delay: Duration) -> Option<TaskHandle>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.current
            .as_ref()
            .and_then(|handle| handle.submit_after(task, delay))
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Cloneable handle to one scheduler generation
#[derive(Clone)]
pub struct SchedulerHandle {
    inner: Arc<Generation>,
}

struct Generation {
    id: u64,
    runtime: Handle,
    stopped: AtomicBool,
    queue: Mutex<TimerQueue>,
    wakeup: Notify,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl SchedulerHandle {
    fn spawn(runtime: Handle) -> Self {
        let inner = Arc::new(Generation {
            id: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
            runtime: runtime.clone(),
            stopped: AtomicBool::new(false),
            queue: Mutex::new(TimerQueue::default()),
            wakeup: Notify::new(),
            timer: Mutex::new(None),
        });

        let timer = runtime.spawn(run_timer(Arc::clone(&inner)));
        *lock(&inner.timer) = Some(timer);

        Self { inner }
    }

    pub fn generation(&self) -> u64 {
        self.inner.id
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Hand `task` to the worker pool. Returns false when this generation is stopped.
    pub fn submit_now<F>(&self, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_stopped() {
            trace!(generation = self.inner.id, "Dropping task for stopped scheduler");
            return false;
        }
        self.inner.runtime.spawn(task);
        true
    }

    /// Queue `task` to be handed to the worker pool no earlier than `delay` from now
    pub fn submit_after<F>(&self, task: F, delay: Duration) -> Option<TaskHandle>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_stopped() {
            trace!(generation = self.inner.id, "Dropping delayed task for stopped scheduler");
            return None;
        }

        let at = Instant::now() + delay;
        let id = {
            let mut queue = lock(&self.inner.queue);
            // Re-check under the queue lock so shutdown's clear() cannot miss us
            if self.is_stopped() {
                return None;
            }
            queue.insert(at, Box::pin(task))
        };
        self.inner.wakeup.notify_one();

        Some(TaskHandle {
            generation: self.inner.id,
            id,
        })
    }

    /// Cancel a pending delayed task. Returns false if it already fired.
    pub fn cancel(&self, handle: TaskHandle) -> bool {
        if handle.generation != self.inner.id {
            return false;
        }
        lock(&self.inner.queue).cancel(handle.id)
    }

    /// Number of delayed tasks not yet handed to the pool
    pub fn pending(&self) -> usize {
        lock(&self.inner.queue).len()
    }

    /// Fire time of the next pending delayed task
    pub fn next_deadline(&self) -> Option<Instant> {
        lock(&self.inner.queue).next_deadline()
    }

    fn shutdown(&self) {
        {
            let mut queue = lock(&self.inner.queue);
            self.inner.stopped.store(true, Ordering::SeqCst);
            queue.clear();
        }
        self.inner.wakeup.notify_one();
        if let Some(timer) = lock(&self.inner.timer).as_ref() {
            timer.abort();
        }
    }

    /// True once the generation's timer task has exited
    pub fn timer_finished(&self) -> bool {
        lock(&self.inner.timer)
            .as_ref()
            .map_or(true, JoinHandle::is_finished)
    }
}

/// Hands due tasks from the queue to the worker pool until stopped
async fn run_timer(generation: Arc<Generation>) {
    loop {
        if generation.stopped.load(Ordering::SeqCst) {
            break;
        }

        let deadline = lock(&generation.queue).next_deadline();
        let sleep = async {
            match deadline {
                Some(at) => sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            () = generation.wakeup.notified() => continue,
            () = sleep => {},
        }

        let due = lock(&generation.queue).pop_due(Instant::now());
        for task in due {
            if generation.stopped.load(Ordering::SeqCst) {
                break;
            }
            generation.runtime.spawn(task);
        }
    }
    trace!(generation = generation.id, "Timer task exiting");
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_submit_now_runs_on_pool() {
        let mut scheduler = Scheduler::new();
        scheduler.start().unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(scheduler.submit_now(async move {
            tx.send(42).unwrap();
        }));
        assert_eq!(rx.recv().await, Some(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_after_waits_for_delay() {
        let mut scheduler = Scheduler::new();
        scheduler.start().unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let submitted = Instant::now();
        scheduler
            .submit_after(
                async move {
                    tx.send(Instant::now()).unwrap();
                },
                Duration::from_secs(60),
            )
            .unwrap();

        let fired = rx.recv().await.unwrap();
        assert!(fired - submitted >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_tasks_fire_in_deadline_order() {
        let mut scheduler = Scheduler::new();
        scheduler.start().unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        for (name, secs) in [("slow", 30), ("fast", 10), ("medium", 20)] {
            let tx = tx.clone();
            scheduler.submit_after(
                async move {
                    tx.send(name).unwrap();
                },
                Duration::from_secs(secs),
            );
        }

        assert_eq!(rx.recv().await, Some("fast"));
        assert_eq!(rx.recv().await, Some("medium"));
        assert_eq!(rx.recv().await, Some("slow"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_task_does_not_block_timer() {
        let mut scheduler = Scheduler::new();
        scheduler.start().unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let slow_tx = tx.clone();
        scheduler.submit_after(
            async move {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                slow_tx.send("slow").unwrap();
            },
            Duration::from_secs(1),
        );
        scheduler.submit_after(
            async move {
                tx.send("quick").unwrap();
            },
            Duration::from_secs(2),
        );

        assert_eq!(rx.recv().await, Some("quick"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_drops_pending_tasks() {
        let mut scheduler = Scheduler::new();
        let handle = scheduler.start().unwrap();

        let marker = Arc::new(());
        let held = Arc::clone(&marker);
        scheduler.submit_after(
            async move {
                drop(held);
            },
            Duration::from_secs(60),
        );
        assert_eq!(Arc::strong_count(&marker), 2);
        assert_eq!(handle.pending(), 1);

        scheduler.stop();
        assert_eq!(Arc::strong_count(&marker), 1);
        assert!(handle.is_stopped());

        for _ in 0..10 {
            if handle.timer_finished() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(handle.timer_finished());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let mut scheduler = Scheduler::new();
        scheduler.stop();
        scheduler.stop();

        scheduler.start().unwrap();
        scheduler.stop();
        scheduler.stop();
        assert!(!scheduler.is_running());
        assert!(!scheduler.submit_now(async {}));
        assert!(scheduler.submit_after(async {}, Duration::ZERO).is_none());
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let mut scheduler = Scheduler::new();
        let first = scheduler.start().unwrap();
        let second = scheduler.start().unwrap();
        assert_eq!(first.generation(), second.generation());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_does_not_fire_old_tasks() {
        let mut scheduler = Scheduler::new();
        let old = scheduler.start().unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        scheduler.submit_after(
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            Duration::from_secs(5),
        );

        scheduler.stop();
        let new = scheduler.start().unwrap();
        assert_ne!(old.generation(), new.generation());

        // An old handle cannot reach the new generation
        assert!(old.submit_after(async {}, Duration::ZERO).is_none());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_pending_task() {
        let mut scheduler = Scheduler::new();
        let handle = scheduler.start().unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let task = handle
            .submit_after(
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                },
                Duration::from_secs(5),
            )
            .unwrap();

        assert!(handle.cancel(task));
        assert!(!handle.cancel(task));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let mut scheduler = Scheduler::new();
        assert!(matches!(scheduler.start(), Err(Error::NoRuntime)));
    }
}
