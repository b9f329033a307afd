//! `Either<L, R>`: the outcome of racing two differently typed effects
//! ([`Async::race_either`](crate::effect::Async::race_either)) and the
//! registration result of
//! [`Async::effect_async_interrupt`](crate::effect::Async::effect_async_interrupt),
//! where `Left` carries a canceler and `Right` an immediately available effect.
//!
//! # Examples
//!
//! ```rust
//! use effect_fiber::control::Either;
//!
//! let winner: Either<i32, String> = Either::Right("right side".to_string());
//! assert!(winner.is_right());
//! assert_eq!(winner.right(), Some("right side".to_string()));
//! ```

use std::fmt;

/// One of two alternatives. `Left` is the left side of a race, or the
/// deferred branch of a registration.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum Either<L, R> {
    /// The left variant.
    Left(L),
    /// The right variant.
    Right(R),
}

impl<L, R> Either<L, R> {
    /// Returns `true` if this is a `Left` value.
    #[inline]
    pub const fn is_left(&self) -> bool {
        matches!(self, Self::Left(_))
    }

    /// Returns `true` if this is a `Right` value.
    #[inline]
    pub const fn is_right(&self) -> bool {
        matches!(self, Self::Right(_))
    }

    /// The `Left` value, if any.
    #[inline]
    pub fn left(self) -> Option<L> {
        match self {
            Self::Left(value) => Some(value),
            Self::Right(_) => None,
        }
    }

    /// The `Right` value, if any.
    #[inline]
    pub fn right(self) -> Option<R> {
        match self {
            Self::Left(_) => None,
            Self::Right(value) => Some(value),
        }
    }
}

impl<L: fmt::Debug, R: fmt::Debug> fmt::Debug for Either<L, R> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Left(value) => formatter.debug_tuple("Left").field(value).finish(),
            Self::Right(value) => formatter.debug_tuple("Right").field(value).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Either::Left(1), true)]
    #[case(Either::Right("one"), false)]
    fn is_left_matches_variant(#[case] value: Either<i32, &str>, #[case] expected: bool) {
        assert_eq!(value.is_left(), expected);
        assert_eq!(value.is_right(), !expected);
    }

    #[rstest]
    fn accessors_take_the_matching_side() {
        let left: Either<i32, &str> = Either::Left(7);
        assert_eq!(left.left(), Some(7));
        assert_eq!(left.right(), None);
    }
}
