//! The `Async` effect.
//!
//! [`Async<R, E, A>`] describes a computation that needs an environment `R`,
//! may fail with `E` and succeeds with `A`. Building an `Async` performs no
//! work: thunks and callbacks run only when a [`Runtime`](super::Runtime)
//! interprets the description, so a value can be composed and reused freely.
//!
//! # Examples
//!
//! ```rust
//! use effect_fiber::effect::{Async, Exit, Runtime};
//!
//! let effect: Async<(), String, i32> = Async::<(), String, i32>::succeed(1)
//!     .flat_map(|n| Async::succeed(n + 1))
//!     .fold_m(|_| Async::succeed(0), Async::succeed);
//!
//! let exit = futures::executor::block_on(Runtime::default().run_promise_exit(effect));
//! assert_eq!(exit, Exit::Success(2));
//! ```
//!
//! ## Errors
//!
//! ```rust
//! use effect_fiber::effect::{Async, Cause, Exit, Runtime};
//!
//! let failing: Async<(), String, i32> = Async::fail("boom".to_string());
//! let exit = futures::executor::block_on(Runtime::default().run_promise_exit(failing));
//! assert_eq!(exit, Exit::Failure(Cause::fail("boom".to_string())));
//! ```

mod concurrency;
#[cfg(feature = "host")]
mod host;
mod interruption;

use std::any::Any;
use std::convert::Infallible;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::control::Either;

use super::driver::Resume;
use super::fiber::FiberDescriptor;
use super::instruction::{ErasedExit, Instruction, erase, unerase};
use super::{Cause, Defect, Exit, FiberId};

/// A lazily evaluated effect with environment `R`, error `E` and value `A`.
#[must_use = "effects do nothing unless they are run"]
pub struct Async<R, E, A> {
    instruction: Instruction,
    _marker: PhantomData<fn(R) -> (E, A)>,
}

/// An effect that needs no environment.
pub type IO<E, A> = Async<(), E, A>;

/// An effect that needs no environment and cannot fail.
pub type UIO<A> = Async<(), Infallible, A>;

impl<R, E, A> Async<R, E, A> {
    pub(crate) const fn from_instruction(instruction: Instruction) -> Self {
        Self {
            instruction,
            _marker: PhantomData,
        }
    }

    pub(crate) fn into_instruction(self) -> Instruction {
        self.instruction
    }
}

pub(crate) fn lift_cause<E: Send + 'static>(cause: Cause<E>) -> Cause<Box<dyn Any + Send>> {
    cause.map(|error| erase(error))
}

pub(crate) fn lower_cause<E: 'static>(cause: Cause<Box<dyn Any + Send>>) -> Cause<E> {
    cause.map(|error| unerase::<E>(error, "typed failure"))
}

fn lower_exit<E: 'static, A: 'static>(exit: ErasedExit) -> Exit<E, A> {
    match exit {
        Exit::Success(value) => Exit::Success(unerase(value, "exit value")),
        Exit::Failure(cause) => Exit::Failure(lower_cause(cause)),
    }
}

// =============================================================================
// Resolve
// =============================================================================

/// Callback handed to the registration function of
/// [`Async::effect_async`] and its variants.
///
/// Only the first resolution of a suspension takes effect; later calls, and
/// calls after the waiting fiber was interrupted, are ignored. A `Resolve`
/// may be cloned and sent to other threads.
pub struct Resolve<R, E, A> {
    resume: Resume,
    _marker: PhantomData<fn(R) -> (E, A)>,
}

impl<R, E, A> Clone for Resolve<R, E, A> {
    fn clone(&self) -> Self {
        Self {
            resume: self.resume.clone(),
            _marker: PhantomData,
        }
    }
}

impl<R, E, A> Resolve<R, E, A>
where
    R: Send + Sync + 'static,
    E: Send + 'static,
    A: Send + 'static,
{
    const fn new(resume: Resume) -> Self {
        Self {
            resume,
            _marker: PhantomData,
        }
    }

    /// Resumes the waiting fiber with `effect`.
    pub fn resolve(&self, effect: Async<R, E, A>) {
        self.resume.resume(effect.instruction);
    }

    /// Resumes the waiting fiber with a value.
    pub fn succeed(&self, value: A) {
        self.resolve(Async::succeed(value));
    }

    /// Resumes the waiting fiber with a failure.
    pub fn fail(&self, error: E) {
        self.resolve(Async::fail(error));
    }

    /// Resumes the waiting fiber with a cause.
    pub fn halt(&self, cause: Cause<E>) {
        self.resolve(Async::halt(cause));
    }

    /// Resumes the waiting fiber with an exit.
    pub fn done(&self, exit: Exit<E, A>) {
        self.resolve(Async::done(exit));
    }

    /// Identity of the waiting fiber.
    pub fn fiber_id(&self) -> FiberId {
        self.resume.fiber_id()
    }
}

// =============================================================================
// Constructors
// =============================================================================

impl<R, E, A> Async<R, E, A>
where
    R: Send + Sync + 'static,
    E: Send + 'static,
    A: Send + 'static,
{
    /// An effect that succeeds with `value`.
    pub fn succeed(value: A) -> Self {
        Self::from_instruction(Instruction::Succeed(erase(value)))
    }

    /// An effect that fails with `error`.
    pub fn fail(error: E) -> Self {
        Self::halt(Cause::fail(error))
    }

    /// An effect that fails with `cause`.
    pub fn halt(cause: Cause<E>) -> Self {
        Self::from_instruction(Instruction::Fail(lift_cause(cause)))
    }

    /// An effect that dies with `defect`.
    pub fn die(defect: Defect) -> Self {
        Self::halt(Cause::die(defect))
    }

    /// An effect that ends with `exit`.
    pub fn done(exit: Exit<E, A>) -> Self {
        match exit {
            Exit::Success(value) => Self::succeed(value),
            Exit::Failure(cause) => Self::halt(cause),
        }
    }

    /// Runs a side effect that cannot fail.
    ///
    /// A panic inside `thunk` becomes a `Die` defect.
    pub fn total<F>(thunk: F) -> Self
    where
        F: FnOnce() -> A + Send + 'static,
    {
        Self::from_instruction(Instruction::Total(Box::new(move || erase(thunk()))))
    }

    /// Runs a side effect whose panic is mapped into a typed failure by
    /// `on_throw`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use effect_fiber::effect::{Async, Exit, Runtime};
    ///
    /// let effect: Async<(), String, i32> =
    ///     Async::partial(|| panic!("parse error"), |defect| defect.message());
    /// let exit = futures::executor::block_on(Runtime::default().run_promise_exit(effect));
    /// assert_eq!(exit, Exit::fail("parse error".to_string()));
    /// ```
    pub fn partial<F, G>(thunk: F, on_throw: G) -> Self
    where
        F: FnOnce() -> A + Send + 'static,
        G: FnOnce(Defect) -> E + Send + 'static,
    {
        Self::from_instruction(Instruction::PartialSync {
            thunk: Box::new(move || erase(thunk())),
            on_throw: Box::new(move |defect| erase(on_throw(defect))),
        })
    }

    /// Runs a side effect that reports failure through `Result`.
    pub fn attempt<F>(thunk: F) -> Self
    where
        F: FnOnce() -> Result<A, E> + Send + 'static,
    {
        Self::suspend(move || match thunk() {
            Ok(value) => Self::succeed(value),
            Err(error) => Self::fail(error),
        })
    }

    /// Defers building the effect until it is interpreted.
    ///
    /// Allows recursive definitions without eager construction.
    pub fn suspend<F>(factory: F) -> Self
    where
        F: FnOnce() -> Self + Send + 'static,
    {
        Self::from_instruction(Instruction::Suspend(Box::new(move || factory().instruction)))
    }

    /// Suspends the fiber until `register` resolves it.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use effect_fiber::effect::{Async, Exit, Runtime};
    ///
    /// let effect: Async<(), String, i32> = Async::effect_async(|resolve| {
    ///     std::thread::spawn(move || resolve.succeed(7));
    /// });
    /// let exit = futures::executor::block_on(Runtime::default().run_promise_exit(effect));
    /// assert_eq!(exit, Exit::Success(7));
    /// ```
    pub fn effect_async<F>(register: F) -> Self
    where
        F: FnOnce(Resolve<R, E, A>) + Send + 'static,
    {
        Self::effect_async_option(move |resolve| {
            register(resolve);
            None
        })
    }

    /// Like [`effect_async`](Self::effect_async), but `register` may return
    /// an effect that is already available, avoiding the suspension.
    pub fn effect_async_option<F>(register: F) -> Self
    where
        F: FnOnce(Resolve<R, E, A>) -> Option<Self> + Send + 'static,
    {
        Self::from_instruction(Instruction::Async(Box::new(move |resume| {
            register(Resolve::new(resume)).map(Self::into_instruction)
        })))
    }

    /// Like [`effect_async`](Self::effect_async), but `register` returns
    /// either a canceler, run if the waiting fiber is interrupted, or an
    /// effect that is already available.
    pub fn effect_async_interrupt<F>(register: F) -> Self
    where
        F: FnOnce(Resolve<R, E, A>) -> Either<Async<R, E, ()>, Self> + Send + 'static,
    {
        let canceler = Arc::new(parking_lot::Mutex::new(None::<Instruction>));
        let slot = Arc::clone(&canceler);
        let wait = Self::effect_async_option(move |resolve| match register(resolve) {
            Either::Left(cancel) => {
                *slot.lock() = Some(cancel.instruction);
                None
            }
            Either::Right(effect) => Some(effect),
        });
        let cleanup = Async::<R, E, ()>::suspend(move || match canceler.lock().take() {
            Some(cancel) => Async::from_instruction(cancel),
            None => Async::unit(),
        });
        wait.on_interrupt(cleanup)
    }

    /// An effect that never completes unless interrupted.
    pub fn never() -> Self {
        Self::effect_async_option(|_| None)
    }

    /// Interrupts the current fiber on its own behalf.
    pub fn interrupt() -> Self {
        Self::from_instruction(Instruction::Descriptor(Box::new(|descriptor| {
            Instruction::Fail(Cause::interrupt(descriptor.id))
        })))
    }

    /// Interrupts the current fiber on behalf of `fiber_id`.
    pub fn interrupt_as(fiber_id: FiberId) -> Self {
        Self::halt(Cause::interrupt(fiber_id))
    }

    /// Passes a snapshot of the running fiber to `function`.
    pub fn descriptor_with<F>(function: F) -> Self
    where
        F: FnOnce(FiberDescriptor) -> Self + Send + 'static,
    {
        Self::from_instruction(Instruction::Descriptor(Box::new(move |descriptor| {
            function(descriptor).instruction
        })))
    }
}

impl<R, E> Async<R, E, ()>
where
    R: Send + Sync + 'static,
    E: Send + 'static,
{
    /// An effect that succeeds with `()`.
    pub fn unit() -> Self {
        Self::succeed(())
    }

    /// Hands control back to the scheduler, resuming on a later turn.
    pub fn yield_now() -> Self {
        Self::from_instruction(Instruction::Yield)
    }
}

impl<R, E> Async<R, E, FiberId>
where
    R: Send + Sync + 'static,
    E: Send + 'static,
{
    /// The identity of the running fiber.
    pub fn fiber_id() -> Self {
        Async::descriptor().fmap(|descriptor| descriptor.id)
    }
}

impl<R, E> Async<R, E, FiberDescriptor>
where
    R: Send + Sync + 'static,
    E: Send + 'static,
{
    /// A snapshot of the running fiber.
    pub fn descriptor() -> Self {
        Self::descriptor_with(Self::succeed)
    }
}

// =============================================================================
// Sequencing
// =============================================================================

impl<R, E, A> Async<R, E, A>
where
    R: Send + Sync + 'static,
    E: Send + 'static,
    A: Send + 'static,
{
    /// Transforms the success value.
    pub fn fmap<B, F>(self, function: F) -> Async<R, E, B>
    where
        B: Send + 'static,
        F: FnOnce(A) -> B + Send + 'static,
    {
        Async::from_instruction(self.instruction.chain(move |value| {
            Instruction::Succeed(erase(function(unerase::<A>(value, "fmap input"))))
        }))
    }

    /// Sequences a dependent effect.
    pub fn flat_map<B, F>(self, function: F) -> Async<R, E, B>
    where
        B: Send + 'static,
        F: FnOnce(A) -> Async<R, E, B> + Send + 'static,
    {
        Async::from_instruction(self.instruction.chain(move |value| {
            function(unerase::<A>(value, "flat_map input")).instruction
        }))
    }

    /// Alias for [`flat_map`](Self::flat_map).
    pub fn and_then<B, F>(self, function: F) -> Async<R, E, B>
    where
        B: Send + 'static,
        F: FnOnce(A) -> Async<R, E, B> + Send + 'static,
    {
        self.flat_map(function)
    }

    /// Runs `next` after `self`, keeping the value of `next`.
    pub fn then<B>(self, next: Async<R, E, B>) -> Async<R, E, B>
    where
        B: Send + 'static,
    {
        self.flat_map(move |_| next)
    }

    /// Runs an effect built from the value, keeping the original value.
    pub fn tap<B, F>(self, function: F) -> Self
    where
        B: Send + 'static,
        F: FnOnce(&A) -> Async<R, E, B> + Send + 'static,
    {
        self.flat_map(move |value| {
            let effect = function(&value);
            effect.as_value(value)
        })
    }

    /// Replaces the success value.
    pub fn as_value<B>(self, value: B) -> Async<R, E, B>
    where
        B: Send + 'static,
    {
        self.fmap(move |_| value)
    }

    /// Discards the success value.
    pub fn unit_value(self) -> Async<R, E, ()> {
        self.as_value(())
    }

    /// Runs `self` then `other`, combining their values.
    pub fn zip_with<B, C, F>(self, other: Async<R, E, B>, function: F) -> Async<R, E, C>
    where
        B: Send + 'static,
        C: Send + 'static,
        F: FnOnce(A, B) -> C + Send + 'static,
    {
        self.flat_map(move |left| other.fmap(move |right| function(left, right)))
    }

    /// Alias for [`zip_with`](Self::zip_with).
    pub fn map2<B, C, F>(self, other: Async<R, E, B>, function: F) -> Async<R, E, C>
    where
        B: Send + 'static,
        C: Send + 'static,
        F: FnOnce(A, B) -> C + Send + 'static,
    {
        self.zip_with(other, function)
    }

    /// Runs `self` then `other`, pairing their values.
    pub fn product<B>(self, other: Async<R, E, B>) -> Async<R, E, (A, B)>
    where
        B: Send + 'static,
    {
        self.zip_with(other, |left, right| (left, right))
    }

    /// Runs the effects one after another, collecting their values in order.
    pub fn collect_all<I>(effects: I) -> Async<R, E, Vec<A>>
    where
        I: IntoIterator<Item = Self>,
    {
        effects
            .into_iter()
            .fold(Async::succeed(Vec::new()), |collected, effect| {
                collected.flat_map(move |mut values| {
                    effect.fmap(move |value| {
                        values.push(value);
                        values
                    })
                })
            })
    }
}

// =============================================================================
// Error handling
// =============================================================================

impl<R, E, A> Async<R, E, A>
where
    R: Send + Sync + 'static,
    E: Send + 'static,
    A: Send + 'static,
{
    /// Handles the whole cause of a failure or the success value.
    pub fn fold_cause_m<E2, B, F, S>(self, on_failure: F, on_success: S) -> Async<R, E2, B>
    where
        E2: Send + 'static,
        B: Send + 'static,
        F: FnOnce(Cause<E>) -> Async<R, E2, B> + Send + 'static,
        S: FnOnce(A) -> Async<R, E2, B> + Send + 'static,
    {
        Async::from_instruction(self.instruction.fold_cause(
            move |cause| on_failure(lower_cause(cause)).instruction,
            move |value| on_success(unerase::<A>(value, "fold input")).instruction,
        ))
    }

    /// Handles a typed failure or the success value; defects and
    /// interruptions propagate.
    pub fn fold_m<E2, B, F, S>(self, on_failure: F, on_success: S) -> Async<R, E2, B>
    where
        E2: Send + 'static,
        B: Send + 'static,
        F: FnOnce(E) -> Async<R, E2, B> + Send + 'static,
        S: FnOnce(A) -> Async<R, E2, B> + Send + 'static,
    {
        self.fold_cause_m(
            move |cause| match cause.failure_or_cause() {
                Ok(error) => on_failure(error),
                Err(cause) => Async::halt(cause.without_failures()),
            },
            on_success,
        )
    }

    /// Collapses a typed failure or the success value into a value.
    pub fn fold<E2, B, F, S>(self, on_failure: F, on_success: S) -> Async<R, E2, B>
    where
        E2: Send + 'static,
        B: Send + 'static,
        F: FnOnce(E) -> B + Send + 'static,
        S: FnOnce(A) -> B + Send + 'static,
    {
        self.fold_m(
            move |error| Async::succeed(on_failure(error)),
            move |value| Async::succeed(on_success(value)),
        )
    }

    /// Recovers from a typed failure.
    pub fn catch_all<E2, F>(self, handler: F) -> Async<R, E2, A>
    where
        E2: Send + 'static,
        F: FnOnce(E) -> Async<R, E2, A> + Send + 'static,
    {
        self.fold_m(handler, Async::succeed)
    }

    /// Recovers from any failure cause.
    pub fn catch_all_cause<E2, F>(self, handler: F) -> Async<R, E2, A>
    where
        E2: Send + 'static,
        F: FnOnce(Cause<E>) -> Async<R, E2, A> + Send + 'static,
    {
        self.fold_cause_m(handler, Async::succeed)
    }

    /// Transforms typed failures.
    pub fn map_error<E2, F>(self, function: F) -> Async<R, E2, A>
    where
        E2: Send + 'static,
        F: FnMut(E) -> E2 + Send + 'static,
    {
        self.map_error_cause(move |cause| cause.map(function))
    }

    /// Transforms the failure cause.
    pub fn map_error_cause<E2, F>(self, function: F) -> Async<R, E2, A>
    where
        E2: Send + 'static,
        F: FnOnce(Cause<E>) -> Cause<E2> + Send + 'static,
    {
        self.fold_cause_m(move |cause| Async::halt(function(cause)), Async::succeed)
    }

    /// Exposes the outcome as an [`Exit`]. Never fails.
    pub fn result<E2>(self) -> Async<R, E2, Exit<E, A>>
    where
        E2: Send + 'static,
    {
        Async::from_instruction(self.instruction.into_exit().chain(|exit| {
            Instruction::Succeed(erase(lower_exit::<E, A>(unerase(exit, "result exit"))))
        }))
    }

    /// Exposes a typed failure as `Err`; defects and interruptions propagate.
    pub fn either<E2>(self) -> Async<R, E2, Result<A, E>>
    where
        E2: Send + 'static,
    {
        self.fold(Err, Ok)
    }
}

// =============================================================================
// Environment
// =============================================================================

fn environment_as<R: Any>(environment: &(dyn Any + Send + Sync)) -> &R {
    match environment.downcast_ref::<R>() {
        Some(environment) => environment,
        None => std::panic::panic_any(super::RuntimeError::TypeMismatch {
            context: "environment",
        }),
    }
}

impl<R, E, A> Async<R, E, A>
where
    R: Send + Sync + 'static,
    E: Send + 'static,
    A: Send + 'static,
{
    /// Reads a value from the environment.
    pub fn access<F>(function: F) -> Self
    where
        F: FnOnce(&R) -> A + Send + 'static,
    {
        Self::from_instruction(Instruction::Read(Box::new(move |environment| {
            Instruction::Succeed(erase(function(environment_as::<R>(&*environment))))
        })))
    }

    /// Builds an effect from the environment.
    pub fn access_m<F>(function: F) -> Self
    where
        F: FnOnce(&R) -> Self + Send + 'static,
    {
        Self::from_instruction(Instruction::Read(Box::new(move |environment| {
            function(environment_as::<R>(&*environment)).instruction
        })))
    }

    /// Provides the whole environment, removing the requirement.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use effect_fiber::effect::{Async, Exit, Runtime};
    ///
    /// let effect: Async<(), String, usize> =
    ///     Async::<String, String, usize>::access(|name: &String| name.len())
    ///         .give_all("fiber".to_string());
    /// let exit = futures::executor::block_on(Runtime::default().run_promise_exit(effect));
    /// assert_eq!(exit, Exit::Success(5));
    /// ```
    pub fn give_all<R0>(self, environment: R) -> Async<R0, E, A> {
        Async::from_instruction(Instruction::Give {
            effect: Box::new(self.instruction),
            environment: Arc::new(environment),
        })
    }
}

impl<R, E> Async<R, E, R>
where
    R: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    /// The whole environment.
    pub fn environment() -> Self {
        Self::access(R::clone)
    }
}
