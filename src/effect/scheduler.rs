//! Cooperative scheduling.
//!
//! Drivers never run themselves: every evaluation is handed to a
//! [`Scheduler`] as a [`Task`]. The default scheduler, [`RunQueue`], keeps
//! two FIFO queues and runs tasks only when someone drains it, one task at a
//! time, so fibers sharing a queue interleave only between tasks.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use effect_fiber::effect::{RunQueue, Scheduler};
//!
//! let queue = RunQueue::new();
//! let order = Arc::new(AtomicUsize::new(0));
//!
//! let later = Arc::clone(&order);
//! queue.dispatch_later(Box::new(move || assert_eq!(later.fetch_add(1, Ordering::SeqCst), 1)));
//! let now = Arc::clone(&order);
//! queue.dispatch(Box::new(move || assert_eq!(now.fetch_add(1, Ordering::SeqCst), 0)));
//!
//! assert_eq!(queue.run_until_idle(), 2);
//! assert_eq!(order.load(Ordering::SeqCst), 2);
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::Waker;

use parking_lot::Mutex;
use tracing::trace;

/// A unit of work handed to a scheduler.
pub type Task = Box<dyn FnOnce() + Send>;

/// Dispatcher the drivers use to yield control.
pub trait Scheduler: Send + Sync {
    /// Runs `task` on an upcoming turn, before work dispatched with
    /// [`dispatch_later`](Self::dispatch_later).
    fn dispatch(&self, task: Task);

    /// Runs `task` on a later turn.
    fn dispatch_later(&self, task: Task);
}

#[derive(Default)]
struct Queues {
    now: VecDeque<Task>,
    later: VecDeque<Task>,
    wakers: Vec<Waker>,
}

/// The default [`Scheduler`]: two FIFO queues drained on demand.
///
/// Draining is non-reentrant. A task that drains the queue it runs on, or a
/// second thread draining concurrently, returns immediately and leaves the
/// work to the drain already in progress.
#[derive(Default)]
pub struct RunQueue {
    queues: Mutex<Queues>,
    draining: AtomicBool,
}

struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl RunQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs queued tasks until both queues are empty.
    ///
    /// Returns the number of tasks executed; `0` when another drain is
    /// already in progress.
    pub fn run_until_idle(&self) -> usize {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return 0;
        }
        let _guard = DrainGuard(&self.draining);
        let mut executed = 0;
        while let Some(task) = self.pop() {
            task();
            executed += 1;
        }
        if executed > 0 {
            trace!(executed, "run queue idle");
        }
        executed
    }

    /// Returns `true` when tasks are waiting to run.
    pub fn has_pending(&self) -> bool {
        let queues = self.queues.lock();
        !queues.now.is_empty() || !queues.later.is_empty()
    }

    /// Returns `true` while some thread drains this queue.
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Registers `waker` to be woken by the next dispatch.
    pub fn register_waker(&self, waker: &Waker) {
        let mut queues = self.queues.lock();
        if !queues.wakers.iter().any(|known| known.will_wake(waker)) {
            queues.wakers.push(waker.clone());
        }
    }

    fn pop(&self) -> Option<Task> {
        let mut queues = self.queues.lock();
        queues.now.pop_front().or_else(|| queues.later.pop_front())
    }

    fn enqueue(&self, task: Task, later: bool) {
        let wakers = {
            let mut queues = self.queues.lock();
            if later {
                queues.later.push_back(task);
            } else {
                queues.now.push_back(task);
            }
            std::mem::take(&mut queues.wakers)
        };
        for waker in wakers {
            waker.wake();
        }
    }
}

impl Scheduler for RunQueue {
    fn dispatch(&self, task: Task) {
        self.enqueue(task, false);
    }

    fn dispatch_later(&self, task: Task) {
        self.enqueue(task, true);
    }
}
