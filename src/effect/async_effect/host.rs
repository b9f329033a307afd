//! Combinators backed by the tokio host runtime.
//!
//! Foreign futures are spawned on [`runtime::host::handle`]; their completion
//! resumes the waiting fiber through its scheduler. Interrupting the fiber
//! aborts the spawned task.
//!
//! [`runtime::host::handle`]: crate::effect::runtime::host::handle

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;

use super::Async;
use crate::control::Either;
use crate::effect::runtime::host;
use crate::effect::{Cause, Defect};

impl<R, E, A> Async<R, E, A>
where
    R: Send + Sync + 'static,
    E: Send + 'static,
    A: Send + 'static,
{
    /// Lifts a future into an effect.
    ///
    /// The future is spawned when the effect runs, not when it is built. `Ok`
    /// and `Err` become success and typed failure; a panic inside the future
    /// becomes a `Die`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use effect_fiber::effect::{Async, Exit, Runtime};
    ///
    /// let effect: Async<(), String, i32> = Async::from_future(async { Ok(6 * 7) });
    /// let exit = Runtime::default().run_blocking_exit(effect);
    /// assert_eq!(exit, Ok(Exit::Success(42)));
    /// ```
    pub fn from_future<F>(future: F) -> Self
    where
        F: Future<Output = Result<A, E>> + Send + 'static,
    {
        Self::effect_async_interrupt(move |resolve| {
            let task = host::handle().spawn(async move {
                match AssertUnwindSafe(future).catch_unwind().await {
                    Ok(Ok(value)) => resolve.succeed(value),
                    Ok(Err(error)) => resolve.fail(error),
                    Err(payload) => resolve.halt(Cause::die(Defect::from_panic(payload))),
                }
            });
            Either::Left(Async::total(move || task.abort()))
        })
    }
}

impl<R, E> Async<R, E, ()>
where
    R: Send + Sync + 'static,
    E: Send + 'static,
{
    /// Suspends the fiber for `duration` on the host timer.
    pub fn sleep(duration: Duration) -> Self {
        Self::from_future(async move {
            tokio::time::sleep(duration).await;
            Ok(())
        })
    }
}

impl<R, E, A> Async<R, E, A>
where
    R: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
{
    /// Returns `None` if the effect does not finish within `duration`; the
    /// effect is interrupted in that case.
    ///
    /// An effect that finishes in time keeps its exit, failures included,
    /// and the timer is interrupted.
    pub fn timeout(self, duration: Duration) -> Async<R, E, Option<A>> {
        self.race_with(
            Async::<R, E, ()>::sleep(duration),
            |exit, timer| timer.interrupt::<R, E>().then(Async::done(exit.map(Some))),
            |_, effect| effect.interrupt::<R, E>().as_value(None),
        )
    }
}
