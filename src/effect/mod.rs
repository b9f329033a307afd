//! Deferred effects interpreted by cooperative fibers.
//!
//! An [`Async<R, E, A>`] describes a computation that reads an environment
//! `R`, may fail with `E` and succeeds with `A`. Descriptions are plain
//! values: building one performs no work. A [`Runtime`] turns a description
//! into a root fiber, which a trampoline interpreter runs on a [`RunQueue`]
//! in constant native stack.
//!
//! Outcomes are reported as an [`Exit`]: either a value or a [`Cause`], the
//! tree of typed failures, defects and interruptions that ended the fiber.
//!
//! # Fibers
//!
//! [`Async::fork`] starts a child fiber and returns a [`Fiber`] handle that
//! can be joined or interrupted. Interruption is cooperative: a request is
//! recorded at once but only delivered where the fiber's current region is
//! interruptible (see [`Async::uninterruptible`]).
//!
//! ```rust
//! use effect_fiber::effect::{Async, Exit, Runtime};
//!
//! let effect: Async<(), String, i32> = Async::<(), String, i32>::never()
//!     .fork()
//!     .flat_map(|fiber| fiber.interrupt().then(fiber.join()));
//!
//! let exit = futures::executor::block_on(Runtime::default().run_promise_exit(effect));
//! assert!(exit.is_interrupted());
//! ```
//!
//! # Racing
//!
//! ```rust
//! use effect_fiber::control::Either;
//! use effect_fiber::effect::{Async, Exit, Runtime};
//!
//! let effect: Async<(), String, Either<i32, &str>> =
//!     Async::succeed(1).race_either(Async::never());
//!
//! let exit = futures::executor::block_on(Runtime::default().run_promise_exit(effect));
//! assert_eq!(exit, Exit::Success(Either::Left(1)));
//! ```

// =============================================================================
// Outcomes
// =============================================================================

mod cause;
mod error;
mod exit;
mod fiber_id;

pub use cause::{Branch, Cause, Defect};
pub use error::{BlockingError, ConfigError, InterruptedError, RuntimeError};
pub use exit::Exit;
pub use fiber_id::FiberId;

// =============================================================================
// Interpreter
// =============================================================================

mod driver;
mod instruction;
mod scheduler;

pub use driver::AsyncStatus;
pub use scheduler::{RunQueue, Scheduler, Task};

// =============================================================================
// Typed Surface
// =============================================================================

mod async_effect;
mod fiber;

pub use async_effect::{Async, IO, Resolve, UIO};
pub use fiber::{Fiber, FiberDescriptor, InterruptStatus, RestoreInterruptStatus};

// =============================================================================
// Runtime
// =============================================================================

pub mod runtime;

#[cfg(feature = "host")]
pub use runtime::run;
pub use runtime::{
    Canceler, ExitFuture, Runtime, RuntimeConfig, run_promise_exit, run_promise_exit_interrupt,
};
