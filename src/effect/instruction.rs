//! The closed, type-erased instruction set interpreted by drivers.
//!
//! Every typed [`Async`](super::Async) is a thin wrapper around an
//! [`Instruction`]. Values travel as `Box<dyn Any + Send>` and continuations
//! as boxed `FnOnce` closures. A value whose dynamic type does not match
//! what its consumer expects is an interpreter invariant violation:
//! [`unerase`] panics with
//! [`RuntimeError::TypeMismatch`], which the driver turns into a `Die`.
//!
//! ```text
//! Instruction = Succeed(value)
//!             | Total(thunk) | PartialSync(thunk, on_throw)
//!             | Async(register) | Suspend(factory) | Yield
//!             | Fail(cause)
//!             | Chain(effect, k) | Fold(effect, on_failure, on_success)
//!             | Read(k) | Give(effect, environment)
//!             | Fork(effect) | Race(left, right, ...) | All(effects, ...)
//!             | InterruptStatus(effect, flag) | CheckInterruptible(k)
//!             | Descriptor(k) | OnInterrupt(effect, cleanup)
//! ```

use std::any::Any;
use std::sync::Arc;

use super::driver::{Driver, Resume};
use super::error::RuntimeError;
use super::fiber::{FiberDescriptor, InterruptStatus, RestoreInterruptStatus};
use super::{Cause, Defect, Exit};

/// An erased value owned by exactly one consumer.
pub(crate) type AnyValue = Box<dyn Any + Send>;

/// An erased value readable by any number of observers.
pub(crate) type SharedValue = Arc<dyn Any + Send + Sync>;

/// An erased environment.
pub(crate) type Environment = Arc<dyn Any + Send + Sync>;

/// The sealed terminal exit of a driver.
pub(crate) type SharedExit = Exit<SharedValue, SharedValue>;

/// An exit flowing through the interpreter before it is sealed.
pub(crate) type ErasedExit = Exit<AnyValue, AnyValue>;

pub(crate) type Continuation = Box<dyn FnOnce(AnyValue) -> Instruction + Send>;
pub(crate) type FailureHandler = Box<dyn FnOnce(Cause<AnyValue>) -> Instruction + Send>;
pub(crate) type Registration = Box<dyn FnOnce(Resume) -> Option<Instruction> + Send>;
pub(crate) type RaceContinuation = Box<dyn FnOnce(SharedExit, Arc<Driver>) -> Instruction + Send>;
pub(crate) type Collect = Box<dyn FnOnce(Exit<SharedValue, Vec<SharedValue>>) -> Instruction + Send>;

/// One node of an effect description.
pub(crate) enum Instruction {
    Succeed(AnyValue),
    Total(Box<dyn FnOnce() -> AnyValue + Send>),
    PartialSync {
        thunk: Box<dyn FnOnce() -> AnyValue + Send>,
        on_throw: Box<dyn FnOnce(Defect) -> AnyValue + Send>,
    },
    Async(Registration),
    Suspend(Box<dyn FnOnce() -> Instruction + Send>),
    Fail(Cause<AnyValue>),
    Chain {
        effect: Box<Instruction>,
        continuation: Continuation,
    },
    Fold {
        effect: Box<Instruction>,
        on_failure: FailureHandler,
        on_success: Continuation,
    },
    Read(Box<dyn FnOnce(Environment) -> Instruction + Send>),
    Give {
        effect: Box<Instruction>,
        environment: Environment,
    },
    Fork {
        effect: Box<Instruction>,
        seal: Seal,
        wrap: fn(Arc<Driver>) -> AnyValue,
    },
    Race {
        left: Box<Instruction>,
        right: Box<Instruction>,
        left_seal: Seal,
        right_seal: Seal,
        left_wins: RaceContinuation,
        right_wins: RaceContinuation,
    },
    All {
        effects: Vec<Instruction>,
        seal: Seal,
        collect: Collect,
    },
    InterruptStatus {
        effect: Box<Instruction>,
        flag: InterruptStatus,
    },
    CheckInterruptible(Box<dyn FnOnce(InterruptStatus) -> Instruction + Send>),
    Descriptor(Box<dyn FnOnce(FiberDescriptor) -> Instruction + Send>),
    OnInterrupt {
        effect: Box<Instruction>,
        cleanup: Box<Instruction>,
    },
    Yield,
}

/// A continuation frame awaiting the value of the instruction below it.
pub(crate) enum Frame {
    Apply(Continuation),
    Fold {
        on_failure: FailureHandler,
        on_success: Continuation,
    },
    InterruptExit,
    EnvironmentExit,
}

/// Conversions that turn a driver's erased exit into a shareable one.
#[derive(Clone, Copy)]
pub(crate) struct Seal {
    success: fn(AnyValue) -> SharedValue,
    failure: fn(AnyValue) -> SharedValue,
}

impl Seal {
    pub(crate) fn of<E, A>() -> Self
    where
        E: Any + Send + Sync,
        A: Any + Send + Sync,
    {
        Self {
            success: seal_value::<A>,
            failure: seal_value::<E>,
        }
    }

    pub(crate) fn exit(self, exit: ErasedExit) -> SharedExit {
        match exit {
            Exit::Success(value) => Exit::Success((self.success)(value)),
            Exit::Failure(cause) => Exit::Failure(cause.map(self.failure)),
        }
    }
}

fn seal_value<T: Any + Send + Sync>(value: AnyValue) -> SharedValue {
    Arc::new(unerase::<T>(value, "sealed value"))
}

/// Recovers a value of type `T` from an erased box.
///
/// # Panics
///
/// Panics with [`RuntimeError::TypeMismatch`] when the box holds another type.
pub(crate) fn unerase<T: Any>(value: AnyValue, context: &'static str) -> T {
    match value.downcast::<T>() {
        Ok(value) => *value,
        Err(_) => std::panic::panic_any(RuntimeError::TypeMismatch { context }),
    }
}

/// Clones a value of type `T` out of a shared box.
///
/// # Panics
///
/// Panics with [`RuntimeError::TypeMismatch`] when the box holds another type.
pub(crate) fn unseal<T: Any + Clone>(value: &SharedValue, context: &'static str) -> T {
    match value.downcast_ref::<T>() {
        Some(value) => value.clone(),
        None => std::panic::panic_any(RuntimeError::TypeMismatch { context }),
    }
}

/// Reads a sealed exit back at its static types.
pub(crate) fn typed_exit<E, A>(exit: &SharedExit) -> Exit<E, A>
where
    E: Any + Clone,
    A: Any + Clone,
{
    match exit {
        Exit::Success(value) => Exit::Success(unseal::<A>(value, "fiber success")),
        Exit::Failure(cause) => {
            Exit::Failure(cause.clone().map(|error| unseal::<E>(&error, "fiber failure")))
        }
    }
}

pub(crate) fn erase<T: Any + Send>(value: T) -> AnyValue {
    Box::new(value)
}

impl Instruction {
    pub(crate) fn unit() -> Self {
        Self::Succeed(erase(()))
    }

    pub(crate) fn done(exit: ErasedExit) -> Self {
        match exit {
            Exit::Success(value) => Self::Succeed(value),
            Exit::Failure(cause) => Self::Fail(cause),
        }
    }

    pub(crate) fn chain<F>(self, continuation: F) -> Self
    where
        F: FnOnce(AnyValue) -> Self + Send + 'static,
    {
        Self::Chain {
            effect: Box::new(self),
            continuation: Box::new(continuation),
        }
    }

    pub(crate) fn fold_cause<F, S>(self, on_failure: F, on_success: S) -> Self
    where
        F: FnOnce(Cause<AnyValue>) -> Self + Send + 'static,
        S: FnOnce(AnyValue) -> Self + Send + 'static,
    {
        Self::Fold {
            effect: Box::new(self),
            on_failure: Box::new(on_failure),
            on_success: Box::new(on_success),
        }
    }

    /// Evaluates to the erased [`Exit`] of `self`; never fails.
    pub(crate) fn into_exit(self) -> Self {
        self.fold_cause(
            |cause| Self::Succeed(erase::<ErasedExit>(Exit::Failure(cause))),
            |value| Self::Succeed(erase::<ErasedExit>(Exit::Success(value))),
        )
    }

    pub(crate) fn with_status(self, flag: InterruptStatus) -> Self {
        Self::InterruptStatus {
            effect: Box::new(self),
            flag,
        }
    }

    pub(crate) fn uninterruptible_mask<F>(function: F) -> Self
    where
        F: FnOnce(RestoreInterruptStatus) -> Self + Send + 'static,
    {
        Self::CheckInterruptible(Box::new(move |status| {
            function(RestoreInterruptStatus::new(status)).with_status(InterruptStatus::Uninterruptible)
        }))
    }

    /// Runs `effect` so that `cleanup` runs, uninterruptibly, whenever
    /// `effect` ends with an interruption.
    pub(crate) fn on_interrupt(effect: Self, cleanup: Self) -> Self {
        Self::uninterruptible_mask(move |restore| {
            restore.apply(effect).fold_cause(
                move |cause| {
                    if !cause.interrupted() {
                        return Self::Fail(cause);
                    }
                    cleanup.into_exit().chain(move |exit| {
                        match unerase::<ErasedExit>(exit, "cleanup exit") {
                            Exit::Success(_) => Self::Fail(cause),
                            Exit::Failure(secondary) => Self::Fail(Cause::then(cause, secondary)),
                        }
                    })
                },
                Self::Succeed,
            )
        })
    }

    /// Runs `finalizer` uninterruptibly after `effect`, whatever its outcome.
    pub(crate) fn ensuring(effect: Self, finalizer: Self) -> Self {
        Self::uninterruptible_mask(move |restore| {
            restore.apply(effect).into_exit().chain(move |exit| {
                let exit = unerase::<ErasedExit>(exit, "guarded exit");
                finalizer.into_exit().chain(move |finalized| {
                    let finalized = unerase::<ErasedExit>(finalized, "finalizer exit");
                    Self::done(exit.zip_with(finalized, |value, _| value))
                })
            })
        })
    }

    /// Short label used in trace output.
    pub(crate) const fn tag(&self) -> &'static str {
        match self {
            Self::Succeed(_) => "Succeed",
            Self::Total(_) => "Total",
            Self::PartialSync { .. } => "PartialSync",
            Self::Async(_) => "Async",
            Self::Suspend(_) => "Suspend",
            Self::Fail(_) => "Fail",
            Self::Chain { .. } => "Chain",
            Self::Fold { .. } => "Fold",
            Self::Read(_) => "Read",
            Self::Give { .. } => "Give",
            Self::Fork { .. } => "Fork",
            Self::Race { .. } => "Race",
            Self::All { .. } => "All",
            Self::InterruptStatus { .. } => "InterruptStatus",
            Self::CheckInterruptible(_) => "CheckInterruptible",
            Self::Descriptor(_) => "Descriptor",
            Self::OnInterrupt { .. } => "OnInterrupt",
            Self::Yield => "Yield",
        }
    }

    /// Whether an interruption may be delivered in place of this instruction.
    ///
    /// Entering an uninterruptible region is not an interruption point.
    pub(crate) const fn is_interruption_point(&self) -> bool {
        !matches!(
            self,
            Self::InterruptStatus {
                flag: InterruptStatus::Uninterruptible,
                ..
            } | Self::CheckInterruptible(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn unerase_recovers_the_boxed_type() {
        assert_eq!(unerase::<i32>(erase(7_i32), "test"), 7);
    }

    #[rstest]
    fn unerase_panics_with_type_mismatch() {
        let payload = std::panic::catch_unwind(|| unerase::<String>(erase(7_i32), "test"))
            .expect_err("mismatched downcast must panic");
        assert_eq!(
            payload.downcast_ref::<RuntimeError>(),
            Some(&RuntimeError::TypeMismatch { context: "test" })
        );
    }

    #[rstest]
    fn seal_and_typed_exit_agree() {
        let seal = Seal::of::<String, i32>();
        let sealed = seal.exit(Exit::Success(erase(5_i32)));
        assert_eq!(typed_exit::<String, i32>(&sealed), Exit::Success(5));

        let sealed = seal.exit(Exit::Failure(Cause::fail(erase("e".to_string()))));
        assert_eq!(
            typed_exit::<String, i32>(&sealed),
            Exit::fail("e".to_string())
        );
    }

    #[rstest]
    fn entering_uninterruptible_region_is_not_an_interruption_point() {
        let masked = Instruction::unit().with_status(InterruptStatus::Uninterruptible);
        let restored = Instruction::unit().with_status(InterruptStatus::Interruptible);
        assert!(!masked.is_interruption_point());
        assert!(restored.is_interruption_point());
        assert!(Instruction::unit().is_interruption_point());
    }
}
