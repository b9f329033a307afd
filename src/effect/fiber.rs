//! Fiber handles and interrupt status.

use std::collections::BTreeSet;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use super::driver::{AsyncStatus, Driver};
use super::instruction::{Instruction, erase, typed_exit};
use super::{Async, Exit, FiberId};

/// Whether the current region of a fiber may be interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterruptStatus {
    /// Interruption requests are delivered.
    Interruptible,
    /// Interruption requests are recorded and delivered on leaving the region.
    Uninterruptible,
}

impl InterruptStatus {
    /// Returns `true` for [`InterruptStatus::Interruptible`].
    #[inline]
    pub const fn is_interruptible(self) -> bool {
        matches!(self, Self::Interruptible)
    }

    pub(crate) const fn from_interruptible(interruptible: bool) -> Self {
        if interruptible {
            Self::Interruptible
        } else {
            Self::Uninterruptible
        }
    }
}

/// Re-applies the interrupt status that was in force when a mask began.
///
/// Handed out by [`Async::uninterruptible_mask`] and
/// [`Async::interruptible_mask`].
///
/// # Examples
///
/// ```rust
/// use effect_fiber::effect::{Async, InterruptStatus};
///
/// let effect: Async<(), String, bool> = Async::uninterruptible_mask(|restore| {
///     restore.restore(Async::check_interruptible(|status| {
///         Async::succeed(status == InterruptStatus::Interruptible)
///     }))
/// });
/// # let _ = effect;
/// ```
#[derive(Debug, Clone, Copy)]
pub struct RestoreInterruptStatus {
    status: InterruptStatus,
}

impl RestoreInterruptStatus {
    pub(crate) const fn new(status: InterruptStatus) -> Self {
        Self { status }
    }

    /// The status captured when the mask began.
    pub const fn status(self) -> InterruptStatus {
        self.status
    }

    /// Runs `effect` under the captured status.
    pub fn restore<R, E, A>(self, effect: Async<R, E, A>) -> Async<R, E, A> {
        Async::from_instruction(self.apply(effect.into_instruction()))
    }

    pub(crate) fn apply(self, instruction: Instruction) -> Instruction {
        instruction.with_status(self.status)
    }
}

/// A snapshot of the fiber running an effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiberDescriptor {
    /// Identity of the fiber.
    pub id: FiberId,
    /// Interrupt status of the current region.
    pub interrupt_status: InterruptStatus,
    /// Fibers that have requested interruption so far.
    pub interruptors: BTreeSet<FiberId>,
}

/// Handle to a forked fiber producing `Exit<E, A>`.
///
/// Handles are cheap to clone; every clone refers to the same fiber.
///
/// # Examples
///
/// ```rust
/// use effect_fiber::effect::{Async, Exit, Runtime};
///
/// let runtime = Runtime::default();
/// let effect: Async<(), String, i32> = Async::succeed(20)
///     .fork()
///     .flat_map(|fiber| fiber.join())
///     .fmap(|n| n + 1);
///
/// let exit = futures::executor::block_on(runtime.run_promise_exit(effect));
/// assert_eq!(exit, Exit::Success(21));
/// ```
pub struct Fiber<E, A> {
    driver: Arc<Driver>,
    _marker: PhantomData<fn() -> (E, A)>,
}

impl<E, A> Clone for Fiber<E, A> {
    fn clone(&self) -> Self {
        Self {
            driver: Arc::clone(&self.driver),
            _marker: PhantomData,
        }
    }
}

impl<E, A> fmt::Debug for Fiber<E, A> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Fiber")
            .field("id", &self.driver.id())
            .field("status", &self.driver.status())
            .finish()
    }
}

impl<E, A> Fiber<E, A> {
    pub(crate) const fn new(driver: Arc<Driver>) -> Self {
        Self {
            driver,
            _marker: PhantomData,
        }
    }

    /// Identity of the fiber.
    pub fn id(&self) -> FiberId {
        self.driver.id()
    }

    /// Current status of the fiber.
    pub fn status(&self) -> AsyncStatus {
        self.driver.status()
    }
}

impl<E, A> Fiber<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
{
    /// The exit of the fiber, if it is done.
    pub fn poll(&self) -> Option<Exit<E, A>> {
        self.driver.poll().map(|exit| typed_exit(&exit))
    }

    /// Waits for the fiber and returns its exit. Never fails.
    pub fn await_exit<R, E2>(&self) -> Async<R, E2, Exit<E, A>> {
        let driver = Arc::clone(&self.driver);
        Async::from_instruction(Instruction::Async(Box::new(move |resume| {
            let observer_resume = resume.downgrade();
            driver
                .observe_for(
                    &resume,
                    Box::new(move |exit| {
                        observer_resume
                            .resume(Instruction::Succeed(erase(typed_exit::<E, A>(&exit))));
                    }),
                )
                .map(|exit| Instruction::Succeed(erase(typed_exit::<E, A>(&exit))))
        })))
    }

    /// Waits for the fiber and re-raises its exit in the current fiber.
    pub fn join<R>(&self) -> Async<R, E, A>
    where
        R: Send + Sync + 'static,
    {
        self.await_exit().flat_map(Async::done)
    }

    /// Interrupts the fiber on behalf of the current fiber and waits for it
    /// to finish.
    pub fn interrupt<R, E2>(&self) -> Async<R, E2, Exit<E, A>>
    where
        R: Send + Sync + 'static,
        E2: Send + 'static,
    {
        let fiber = self.clone();
        Async::fiber_id().flat_map(move |id| fiber.interrupt_as(id))
    }

    /// Interrupts the fiber on behalf of `interruptor` and waits for it to
    /// finish.
    pub fn interrupt_as<R, E2>(&self, interruptor: FiberId) -> Async<R, E2, Exit<E, A>>
    where
        R: Send + Sync + 'static,
        E2: Send + 'static,
    {
        let driver = Arc::clone(&self.driver);
        Async::total(move || driver.interrupt_as(interruptor)).then(self.await_exit())
    }
}
