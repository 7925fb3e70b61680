//! Deterministic executor for engine tests.

use courier_core::scheduler::Scheduler;
use futures::future::BoxFuture;
use futures::task::{ArcWake, SpawnError, waker_ref};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::task::Context;

/// Upper bound on ticks [`ManualScheduler::run_until_idle`] will run.
const MAX_TICKS: usize = 10_000;

struct ReadyQueue {
    tasks: Mutex<VecDeque<Arc<Task>>>,
}

impl ReadyQueue {
    fn push(&self, task: Arc<Task>) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(task);
    }

    fn drain(&self) -> Vec<Arc<Task>> {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }

    fn len(&self) -> usize {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

struct Task {
    future: Mutex<Option<BoxFuture<'static, ()>>>,
    queue: Weak<ReadyQueue>,
}

impl ArcWake for Task {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        if let Some(queue) = arc_self.queue.upgrade() {
            queue.push(Arc::clone(arc_self));
        }
    }
}

impl Task {
    fn poll(self: &Arc<Self>) {
        let waker = waker_ref(self);
        let mut cx = Context::from_waker(&waker);
        let mut slot = self.future.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(mut future) = slot.take() {
            if future.as_mut().poll(&mut cx).is_pending() {
                *slot = Some(future);
            }
        }
    }
}

/// A [`Scheduler`] that runs nothing until the test asks it to.
///
/// Every spawned task and every woken task goes to the back of one ready
/// queue. [`tick`](Self::tick) polls the tasks that were ready when it was
/// called; anything they spawn or wake runs on the next tick. This makes the
/// "one tick later" deferrals of the engine observable step by step.
///
/// # Example
///
/// ```
/// use courier_core::scheduler::Scheduler;
/// use courier_testing::ManualScheduler;
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicBool, Ordering};
///
/// let scheduler = ManualScheduler::new();
/// let ran = Arc::new(AtomicBool::new(false));
/// let flag = Arc::clone(&ran);
///
/// scheduler.defer(Box::new(move || flag.store(true, Ordering::SeqCst))).unwrap();
/// assert!(!ran.load(Ordering::SeqCst));
///
/// scheduler.tick();
/// assert!(ran.load(Ordering::SeqCst));
/// ```
#[derive(Clone)]
pub struct ManualScheduler {
    queue: Arc<ReadyQueue>,
}

impl ManualScheduler {
    /// Empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: Arc::new(ReadyQueue {
                tasks: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// Poll every task that is ready now. Returns how many were polled.
    pub fn tick(&self) -> usize {
        let ready = self.queue.drain();
        for task in &ready {
            task.poll();
        }
        ready.len()
    }

    /// Tick until no task is ready. Returns the number of ticks run.
    pub fn run_until_idle(&self) -> usize {
        let mut ticks = 0;
        while ticks < MAX_TICKS && self.tick() > 0 {
            ticks += 1;
        }
        if ticks == MAX_TICKS {
            tracing::warn!(ticks, "Manual scheduler did not go idle");
        }
        ticks
    }

    /// Number of tasks waiting for the next tick.
    #[must_use]
    pub fn ready(&self) -> usize {
        self.queue.len()
    }
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("ready", &self.ready())
            .finish()
    }
}

impl Scheduler for ManualScheduler {
    fn spawn(&self, task: BoxFuture<'static, ()>) -> Result<(), SpawnError> {
        self.queue.push(Arc::new(Task {
            future: Mutex::new(Some(task)),
            queue: Arc::downgrade(&self.queue),
        }));
        Ok(())
    }
}
