//! # effect-fiber
//!
//! A cooperative fiber runtime for deferred, composable effects.
//!
//! ## Overview
//!
//! - **Control**: [`control::Either`]
//! - **Effect**: the [`effect::Async`] effect with typed success, error and
//!   environment channels, the [`effect::Cause`] error algebra, fibers with
//!   fork, join, race and cooperative interruption, and the [`effect::Runtime`]
//!   that interprets effects on a run queue
//!
//! ## Features
//!
//! - `control`: control structures
//! - `effect`: the effect runtime
//! - `host`: tokio-backed timers, futures and blocking execution
//! - `full`: everything
//!
//! ## Quick Start
//!
//! ```rust
//! use effect_fiber::prelude::*;
//!
//! let effect: Async<(), String, i32> = Async::succeed(20)
//!     .zip_par(Async::total(|| 22))
//!     .fmap(|(left, right)| left + right);
//!
//! let exit = futures::executor::block_on(run_promise_exit(effect));
//! assert_eq!(exit, Exit::Success(42));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
// Note: Disabling redundant_closure_for_method_calls due to clippy 0.1.92 panic bug
#![allow(clippy::redundant_closure_for_method_calls)]

/// Prelude module for convenient imports.
///
/// Re-exports commonly used types and traits.
///
/// # Usage
///
/// ```rust
/// use effect_fiber::prelude::*;
/// ```
pub mod prelude {

    #[cfg(feature = "control")]
    pub use crate::control::*;

    #[cfg(feature = "effect")]
    pub use crate::effect::*;
}

#[cfg(feature = "control")]
pub mod control;

#[cfg(feature = "effect")]
pub mod effect;
