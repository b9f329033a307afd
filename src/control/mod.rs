//! Control structures shared by the effect runtime.
//!
//! - [`Either`]: a value that is one of two types
//!
//! # Examples
//!
//! ```rust
//! use effect_fiber::control::Either;
//!
//! let winner: Either<i32, String> = Either::Left(1);
//! assert_eq!(winner.left(), Some(1));
//! ```

mod either;

pub use either::Either;
