//! Forking, racing and parallel composition.
//!
//! Every combinator here runs its operands in child fibers that share the
//! parent's scheduler and environment. Child exits are sealed so that they
//! can be read by several observers, which is why the value and error types
//! must be `Clone + Sync`.

use std::sync::Arc;

use parking_lot::Mutex;

use super::Async;
use crate::control::Either;
use crate::effect::driver::Driver;
use crate::effect::fiber::Fiber;
use crate::effect::instruction::{AnyValue, Instruction, Seal, erase, typed_exit, unseal};
use crate::effect::{Cause, Exit};

fn wrap_fiber<E, A>(driver: Arc<Driver>) -> AnyValue
where
    E: Send + 'static,
    A: Send + 'static,
{
    erase(Fiber::<E, A>::new(driver))
}

impl<R, E, A> Async<R, E, A>
where
    R: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
{
    /// Starts the effect in a new child fiber and returns its handle at once.
    ///
    /// The child inherits the current environment. Forking never fails.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use effect_fiber::effect::{Async, Exit, Runtime};
    ///
    /// let effect: Async<(), String, i32> = Async::<(), String, i32>::never()
    ///     .fork()
    ///     .flat_map(|fiber| fiber.interrupt())
    ///     .fmap(|exit| i32::from(exit.is_interrupted()));
    ///
    /// let exit = futures::executor::block_on(Runtime::default().run_promise_exit(effect));
    /// assert_eq!(exit, Exit::Success(1));
    /// ```
    pub fn fork<E2>(self) -> Async<R, E2, Fiber<E, A>>
    where
        E2: Send + 'static,
    {
        Async::from_instruction(Instruction::Fork {
            effect: Box::new(self.into_instruction()),
            seal: Seal::of::<E, A>(),
            wrap: wrap_fiber::<E, A>,
        })
    }

    /// Runs `self` and `that` concurrently and continues with whichever
    /// finishes first.
    ///
    /// The winning side's exit is passed to `left_done` or `right_done`
    /// together with the still running loser, which is left for the
    /// continuation to join or interrupt. When both sides are already done at
    /// registration time, the left side wins. Interrupting the waiting fiber
    /// interrupts both sides.
    pub fn race_with<E1, B, E2, C, L, Rt>(
        self,
        that: Async<R, E1, B>,
        left_done: L,
        right_done: Rt,
    ) -> Async<R, E2, C>
    where
        E1: Clone + Send + Sync + 'static,
        B: Clone + Send + Sync + 'static,
        E2: Send + 'static,
        C: Send + 'static,
        L: FnOnce(Exit<E, A>, Fiber<E1, B>) -> Async<R, E2, C> + Send + 'static,
        Rt: FnOnce(Exit<E1, B>, Fiber<E, A>) -> Async<R, E2, C> + Send + 'static,
    {
        Async::from_instruction(Instruction::Race {
            left: Box::new(self.into_instruction()),
            right: Box::new(that.into_instruction()),
            left_seal: Seal::of::<E, A>(),
            right_seal: Seal::of::<E1, B>(),
            left_wins: Box::new(move |exit, loser| {
                left_done(typed_exit::<E, A>(&exit), Fiber::new(loser)).into_instruction()
            }),
            right_wins: Box::new(move |exit, loser| {
                right_done(typed_exit::<E1, B>(&exit), Fiber::new(loser)).into_instruction()
            }),
        })
    }

    /// Returns the first successful value of `self` and `that`.
    ///
    /// A successful winner interrupts the loser and waits for it to stop. A
    /// failed winner waits for the loser instead; if the loser fails too, the
    /// two causes are combined with [`Cause::both`].
    ///
    /// # Examples
    ///
    /// ```rust
    /// use effect_fiber::effect::{Async, Exit, Runtime};
    ///
    /// let effect: Async<(), String, i32> = Async::succeed(1).race(Async::never());
    /// let exit = futures::executor::block_on(Runtime::default().run_promise_exit(effect));
    /// assert_eq!(exit, Exit::Success(1));
    /// ```
    pub fn race(self, that: Self) -> Self {
        self.race_with(that, Self::settle_race, Self::settle_race)
    }

    fn settle_race(exit: Exit<E, A>, loser: Fiber<E, A>) -> Self {
        match exit {
            Exit::Success(value) => loser.interrupt::<R, E>().as_value(value),
            Exit::Failure(cause) => loser
                .join()
                .map_error_cause(move |other| Cause::both(cause, other)),
        }
    }

    /// Races `self` against `that`, tagging the winner's value with its side.
    pub fn race_either<B>(self, that: Async<R, E, B>) -> Async<R, E, Either<A, B>>
    where
        B: Clone + Send + Sync + 'static,
    {
        self.fmap(Either::Left).race(that.fmap(Either::Right))
    }

    /// Runs every effect in its own fiber and collects the values in input
    /// order.
    ///
    /// All effects run to completion. When any of them fails, the failing
    /// causes are combined with [`Cause::both`] in input order.
    pub fn collect_all_par<I>(effects: I) -> Async<R, E, Vec<A>>
    where
        I: IntoIterator<Item = Self>,
    {
        Async::from_instruction(Instruction::All {
            effects: effects.into_iter().map(Self::into_instruction).collect(),
            seal: Seal::of::<E, A>(),
            collect: Box::new(|exit| match exit {
                Exit::Success(values) => Instruction::Succeed(erase(
                    values
                        .iter()
                        .map(|value| unseal::<A>(value, "parallel value"))
                        .collect::<Vec<A>>(),
                )),
                Exit::Failure(cause) => Instruction::Fail(
                    cause.map(|error| erase(unseal::<E>(&error, "parallel failure"))),
                ),
            }),
        })
    }

    /// Runs `self` and `that` concurrently and combines both values.
    ///
    /// The first side to fail interrupts the other one; the result then
    /// fails with the first cause, joined with [`Cause::both`] to the other
    /// side's cause unless that one only records the interruption.
    pub fn zip_with_par<B, C, F>(self, that: Async<R, E, B>, function: F) -> Async<R, E, C>
    where
        B: Clone + Send + Sync + 'static,
        C: Send + 'static,
        F: FnOnce(A, B) -> C + Send + 'static,
    {
        let slot = Arc::new(Mutex::new(Some(function)));
        let right_slot = Arc::clone(&slot);
        self.race_with(
            that,
            move |exit, loser| {
                settle_zip(exit, loser, move |left, right| {
                    let function = slot.lock().take().expect("zip_with_par combines once");
                    function(left, right)
                })
            },
            move |exit, loser| {
                settle_zip(exit, loser, move |right, left| {
                    let function = right_slot
                        .lock()
                        .take()
                        .expect("zip_with_par combines once");
                    function(left, right)
                })
            },
        )
    }

    /// Runs `self` and `that` concurrently and pairs their values.
    pub fn zip_par<B>(self, that: Async<R, E, B>) -> Async<R, E, (A, B)>
    where
        B: Clone + Send + Sync + 'static,
    {
        self.zip_with_par(that, |left, right| (left, right))
    }
}

fn settle_zip<R, E, W, L, C, G>(exit: Exit<E, W>, other: Fiber<E, L>, combine: G) -> Async<R, E, C>
where
    R: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    W: Send + 'static,
    L: Clone + Send + Sync + 'static,
    C: Send + 'static,
    G: FnOnce(W, L) -> C + Send + 'static,
{
    match exit {
        Exit::Success(first) => other.join().fmap(move |second| combine(first, second)),
        Exit::Failure(cause) => other.interrupt().flat_map(move |exit| {
            Async::halt(match exit {
                Exit::Failure(secondary) if !secondary.interrupted_only() => {
                    Cause::both(cause, secondary)
                }
                _ => cause,
            })
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::{IO, Runtime};
    use futures::executor::block_on;
    use rstest::rstest;

    fn run<E, A>(effect: Async<(), E, A>) -> Exit<E, A>
    where
        E: Clone + Send + Sync + 'static,
        A: Clone + Send + Sync + 'static,
    {
        block_on(Runtime::default().run_promise_exit(effect))
    }

    #[rstest]
    fn fork_then_join_returns_the_child_value() {
        let effect: IO<String, i32> = Async::<(), String, i32>::succeed(4)
            .fork()
            .flat_map(|fiber| fiber.join());
        assert_eq!(run(effect), Exit::Success(4));
    }

    #[rstest]
    fn race_prefers_the_left_side_when_both_are_ready() {
        let effect: IO<String, &str> = Async::succeed("left").race(Async::succeed("right"));
        assert_eq!(run(effect), Exit::Success("left"));
    }

    #[rstest]
    fn race_falls_back_to_the_loser_after_a_failure() {
        let effect: IO<String, i32> = Async::fail("left".to_string()).race(Async::succeed(2));
        assert_eq!(run(effect), Exit::Success(2));
    }

    #[rstest]
    fn race_combines_two_failures() {
        let effect: IO<String, i32> =
            Async::fail("left".to_string()).race(Async::fail("right".to_string()));
        assert_eq!(
            run(effect),
            Exit::halt(Cause::both(
                Cause::fail("left".to_string()),
                Cause::fail("right".to_string())
            ))
        );
    }

    #[rstest]
    fn collect_all_par_of_nothing_is_empty() {
        let effect: IO<String, Vec<i32>> = Async::collect_all_par(Vec::new());
        assert_eq!(run(effect), Exit::Success(Vec::new()));
    }

    #[rstest]
    fn zip_par_interrupts_the_other_side_on_failure() {
        let effect: IO<String, (i32, i32)> =
            Async::fail("boom".to_string()).zip_par(Async::never());
        assert_eq!(run(effect), Exit::fail("boom".to_string()));
    }
}
