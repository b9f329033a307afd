//! Interrupt-status regions and interruption-aware resource handling.

use super::Async;
use crate::effect::fiber::{InterruptStatus, RestoreInterruptStatus};
use crate::effect::instruction::Instruction;

impl<R, E, A> Async<R, E, A>
where
    R: Send + Sync + 'static,
    E: Send + 'static,
    A: Send + 'static,
{
    /// Runs the effect in an interruptible region.
    pub fn interruptible(self) -> Self {
        Self::from_instruction(
            self.into_instruction()
                .with_status(InterruptStatus::Interruptible),
        )
    }

    /// Runs the effect in an uninterruptible region.
    ///
    /// Interruption requests that arrive meanwhile are recorded and delivered
    /// once the region is left.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use effect_fiber::effect::{Async, Exit, Runtime};
    ///
    /// let runtime = Runtime::default();
    /// let effect: Async<(), String, i32> = Async::total(|| 42).uninterruptible();
    /// let (exit, canceler) = runtime.run_promise_exit_interrupt(effect);
    /// canceler.cancel();
    /// assert_eq!(futures::executor::block_on(exit), Exit::Success(42));
    /// ```
    pub fn uninterruptible(self) -> Self {
        Self::from_instruction(
            self.into_instruction()
                .with_status(InterruptStatus::Uninterruptible),
        )
    }

    /// Runs the effect built by `function` uninterruptibly; the
    /// [`RestoreInterruptStatus`] re-applies the status in force before.
    pub fn uninterruptible_mask<F>(function: F) -> Self
    where
        F: FnOnce(RestoreInterruptStatus) -> Self + Send + 'static,
    {
        Self::from_instruction(Instruction::uninterruptible_mask(move |restore| {
            function(restore).into_instruction()
        }))
    }

    /// Runs the effect built by `function` interruptibly; the
    /// [`RestoreInterruptStatus`] re-applies the status in force before.
    pub fn interruptible_mask<F>(function: F) -> Self
    where
        F: FnOnce(RestoreInterruptStatus) -> Self + Send + 'static,
    {
        Self::check_interruptible(move |status| {
            function(RestoreInterruptStatus::new(status)).interruptible()
        })
    }

    /// Builds an effect from the interrupt status of the current region.
    pub fn check_interruptible<F>(function: F) -> Self
    where
        F: FnOnce(InterruptStatus) -> Self + Send + 'static,
    {
        Self::from_instruction(Instruction::CheckInterruptible(Box::new(move |status| {
            function(status).into_instruction()
        })))
    }

    /// Runs `cleanup` if the effect ends because of an interruption.
    ///
    /// The effect itself keeps the ambient interrupt status; `cleanup` runs
    /// uninterruptibly, exactly once. A failing cleanup is appended to the
    /// interruption cause with [`Cause::then`](crate::effect::Cause::then).
    pub fn on_interrupt<B>(self, cleanup: Async<R, E, B>) -> Self
    where
        B: Send + 'static,
    {
        Self::from_instruction(Instruction::OnInterrupt {
            effect: Box::new(self.into_instruction()),
            cleanup: Box::new(cleanup.into_instruction()),
        })
    }

    /// Runs `finalizer` uninterruptibly after the effect, whatever its
    /// outcome. A failing finalizer is appended to the outcome with
    /// [`Cause::then`](crate::effect::Cause::then).
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::sync::Arc;
    /// use std::sync::atomic::{AtomicBool, Ordering};
    /// use effect_fiber::effect::{Async, Exit, Runtime};
    ///
    /// let released = Arc::new(AtomicBool::new(false));
    /// let flag = Arc::clone(&released);
    /// let effect: Async<(), String, i32> = Async::fail("boom".to_string())
    ///     .ensuring(Async::total(move || flag.store(true, Ordering::SeqCst)));
    ///
    /// let exit = futures::executor::block_on(Runtime::default().run_promise_exit(effect));
    /// assert_eq!(exit, Exit::fail("boom".to_string()));
    /// assert!(released.load(Ordering::SeqCst));
    /// ```
    pub fn ensuring<B>(self, finalizer: Async<R, E, B>) -> Self
    where
        B: Send + 'static,
    {
        Self::from_instruction(Instruction::ensuring(
            self.into_instruction(),
            finalizer.into_instruction(),
        ))
    }
}

impl<R, E, A> Async<R, E, A>
where
    R: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
{
    /// Runs the effect in a child fiber so that interrupting the current
    /// fiber does not wait for the effect's cleanup.
    ///
    /// The interruption is still forwarded to the child, but in the
    /// background.
    pub fn disconnect(self) -> Self {
        Self::uninterruptible_mask(move |restore| {
            Async::fiber_id().flat_map(move |id| {
                restore.restore(self).fork().flat_map(move |fiber| {
                    let child = fiber.clone();
                    restore.restore(fiber.join()).on_interrupt(
                        child
                            .interrupt_as::<R, E>(id)
                            .fork::<E>()
                            .unit_value(),
                    )
                })
            })
        })
    }
}
