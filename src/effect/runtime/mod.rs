//! Running effects.
//!
//! A [`Runtime`] owns a [`RunQueue`] and turns an [`Async`] into a root
//! fiber. Every entry point only schedules the root fiber; nothing runs
//! until the queue is drained, either explicitly with
//! [`Runtime::run_until_idle`] or by polling an [`ExitFuture`].
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use parking_lot::Mutex;
//! use effect_fiber::effect::{Async, Exit, Runtime};
//!
//! let runtime = Runtime::default();
//! let seen = Arc::new(Mutex::new(None));
//! let sink = Arc::clone(&seen);
//!
//! let effect: Async<(), String, i32> = Async::total(|| 40).fmap(|n| n + 2);
//! let _canceler = runtime.run(effect, move |exit| *sink.lock() = Some(exit));
//!
//! assert_eq!(*seen.lock(), None);
//! runtime.run_until_idle();
//! assert_eq!(*seen.lock(), Some(Exit::Success(42)));
//! ```

mod config;
#[cfg(feature = "host")]
pub mod host;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::channel::oneshot;
use tracing::{debug, warn};

pub use self::config::{RuntimeConfig, YIELD_OP_COUNT_VAR};

use super::driver::Driver;
use super::instruction::{Seal, typed_exit};
use super::scheduler::RunQueue;
#[cfg(feature = "host")]
use super::BlockingError;
use super::{Async, Defect, Exit, FiberId, RuntimeError};

/// Schedules root fibers on a shared [`RunQueue`].
///
/// Fibers started by the same runtime, and every fiber they fork, share its
/// queue and interleave cooperatively.
pub struct Runtime {
    queue: Arc<RunQueue>,
    config: RuntimeConfig,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Runtime")
            .field("config", &self.config)
            .field("pending", &self.queue.has_pending())
            .finish()
    }
}

impl Runtime {
    /// Creates a runtime with its own empty queue.
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            queue: Arc::new(RunQueue::new()),
            config,
        }
    }

    /// The configuration the runtime was built with.
    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Drains the queue on the calling thread. See
    /// [`RunQueue::run_until_idle`].
    pub fn run_until_idle(&self) -> usize {
        self.queue.run_until_idle()
    }

    fn root<E, A>(&self) -> Arc<Driver>
    where
        E: Send + Sync + 'static,
        A: Send + Sync + 'static,
    {
        Driver::new(
            Arc::new(()),
            Arc::clone(&self.queue) as _,
            self.config.yield_op_count,
            Seal::of::<E, A>(),
        )
    }

    /// Schedules `task` and hands its exit to `callback` once it finishes.
    ///
    /// The callback runs on whichever thread drains the queue at that point.
    pub fn run<E, A, F>(&self, task: Async<(), E, A>, callback: F) -> Canceler
    where
        E: Clone + Send + Sync + 'static,
        A: Clone + Send + Sync + 'static,
        F: FnOnce(Exit<E, A>) + Send + 'static,
    {
        let driver = self.root::<E, A>();
        let observed = driver.observe(Box::new(move |exit| callback(typed_exit(&exit))));
        debug_assert!(observed.is_none(), "a new root fiber cannot be done");
        debug!(fiber = %driver.id(), "root fiber scheduled");
        driver.evaluate_later(task.into_instruction());
        Canceler { driver }
    }

    /// Schedules `task` and returns a future of its exit.
    ///
    /// Polling the future drains the runtime's queue. The future never
    /// rejects: if the root fiber is dropped without an exit, which happens
    /// when it waits on something that can no longer resume it, the future
    /// resolves to a `Die` carrying [`RuntimeError::Abandoned`].
    pub fn run_promise_exit<E, A>(&self, task: Async<(), E, A>) -> ExitFuture<E, A>
    where
        E: Clone + Send + Sync + 'static,
        A: Clone + Send + Sync + 'static,
    {
        self.run_promise_exit_interrupt(task).0
    }

    /// Like [`run_promise_exit`](Self::run_promise_exit), also returning a
    /// [`Canceler`] for the root fiber.
    pub fn run_promise_exit_interrupt<E, A>(
        &self,
        task: Async<(), E, A>,
    ) -> (ExitFuture<E, A>, Canceler)
    where
        E: Clone + Send + Sync + 'static,
        A: Clone + Send + Sync + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let canceler = self.run(task, move |exit| {
            if sender.send(exit).is_err() {
                debug!("exit future dropped before the root fiber finished");
            }
        });
        let future = ExitFuture {
            queue: Arc::clone(&self.queue),
            receiver,
            fiber: canceler.fiber_id(),
        };
        (future, canceler)
    }

    /// Runs `task` to completion, blocking the calling thread on the host
    /// runtime.
    ///
    /// # Errors
    ///
    /// Returns a [`BlockingError`] when the calling thread cannot block, such
    /// as inside a current-thread tokio runtime.
    #[cfg(feature = "host")]
    pub fn run_blocking_exit<E, A>(&self, task: Async<(), E, A>) -> Result<Exit<E, A>, BlockingError>
    where
        E: Clone + Send + Sync + 'static,
        A: Clone + Send + Sync + 'static,
    {
        host::try_run_blocking(self.run_promise_exit(task))
    }
}

/// Interrupts a root fiber.
#[derive(Clone)]
pub struct Canceler {
    driver: Arc<Driver>,
}

impl Canceler {
    /// Requests interruption of the root fiber on behalf of
    /// [`FiberId::NONE`]. Calling it again, or after the fiber finished,
    /// has no further effect on the outcome.
    pub fn cancel(&self) {
        debug!(fiber = %self.driver.id(), "root fiber cancelled");
        self.driver.interrupt_as(FiberId::NONE);
    }

    /// Identity of the root fiber.
    pub fn fiber_id(&self) -> FiberId {
        self.driver.id()
    }
}

impl fmt::Debug for Canceler {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Canceler")
            .field("fiber", &self.driver.id())
            .finish()
    }
}

/// The exit of a root fiber, as a future.
///
/// Each poll drains the owning runtime's queue before checking for the exit,
/// so awaiting the future is enough to make the fiber progress.
#[must_use = "futures do nothing unless polled"]
pub struct ExitFuture<E, A> {
    queue: Arc<RunQueue>,
    receiver: oneshot::Receiver<Exit<E, A>>,
    fiber: FiberId,
}

impl<E, A> ExitFuture<E, A> {
    /// Identity of the root fiber.
    pub const fn fiber_id(&self) -> FiberId {
        self.fiber
    }
}

impl<E, A> fmt::Debug for ExitFuture<E, A> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ExitFuture")
            .field("fiber", &self.fiber)
            .finish_non_exhaustive()
    }
}

impl<E, A> Future for ExitFuture<E, A> {
    type Output = Exit<E, A>;

    fn poll(mut self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        loop {
            this.queue.run_until_idle();
            match this.receiver.poll_unpin(context) {
                Poll::Ready(Ok(exit)) => return Poll::Ready(exit),
                Poll::Ready(Err(oneshot::Canceled)) => {
                    warn!(fiber = %this.fiber, "root fiber abandoned without an exit");
                    return Poll::Ready(Exit::die(Defect::new(RuntimeError::Abandoned)));
                }
                Poll::Pending => {}
            }
            this.queue.register_waker(context.waker());
            if !this.queue.has_pending() {
                return Poll::Pending;
            }
            if this.queue.is_draining() {
                context.waker().wake_by_ref();
                return Poll::Pending;
            }
        }
    }
}

/// Runs `task` on a fresh [`Runtime`] and returns a future of its exit.
pub fn run_promise_exit<E, A>(task: Async<(), E, A>) -> ExitFuture<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
{
    Runtime::default().run_promise_exit(task)
}

/// Runs `task` on a fresh [`Runtime`] and returns a future of its exit
/// together with a [`Canceler`].
pub fn run_promise_exit_interrupt<E, A>(task: Async<(), E, A>) -> (ExitFuture<E, A>, Canceler)
where
    E: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
{
    Runtime::default().run_promise_exit_interrupt(task)
}

/// Runs `task` in the background on the host runtime and passes its exit to
/// `callback`.
///
/// # Examples
///
/// ```rust
/// use effect_fiber::effect::{Async, Exit, run};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let (sender, receiver) = tokio::sync::oneshot::channel();
/// let effect: Async<(), String, i32> = Async::succeed(7);
/// let _canceler = run(effect, move |exit| {
///     let _ = sender.send(exit);
/// });
/// assert_eq!(receiver.await.ok(), Some(Exit::Success(7)));
/// # }
/// ```
#[cfg(feature = "host")]
pub fn run<E, A, F>(task: Async<(), E, A>, callback: F) -> Canceler
where
    E: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
    F: FnOnce(Exit<E, A>) + Send + 'static,
{
    let (future, canceler) = run_promise_exit_interrupt(task);
    drop(host::handle().spawn(async move { callback(future.await) }));
    canceler
}
