//! Terminal outcome of a fiber.

use super::{Cause, Defect, FiberId};

/// The terminal result of a fiber: a success value or the [`Cause`] of its
/// failure.
///
/// Every driver produces exactly one `Exit`. Runtime entry points resolve with
/// an `Exit` instead of rejecting, so expected failures are inspected like any
/// other value.
///
/// # Examples
///
/// ```rust
/// use effect_fiber::effect::{Cause, Exit};
///
/// let success: Exit<String, i32> = Exit::succeed(2);
/// let failure: Exit<String, i32> = Exit::fail("boom".to_string());
///
/// assert_eq!(success.map(|n| n * 10), Exit::Success(20));
/// assert_eq!(failure.cause(), Some(&Cause::fail("boom".to_string())));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Exit<E, A> {
    /// The fiber produced a value.
    Success(A),
    /// The fiber failed.
    Failure(Cause<E>),
}

impl<E, A> Exit<E, A> {
    /// A successful exit.
    #[inline]
    pub const fn succeed(value: A) -> Self {
        Self::Success(value)
    }

    /// An exit failed with a typed error.
    #[inline]
    pub const fn fail(error: E) -> Self {
        Self::Failure(Cause::fail(error))
    }

    /// An exit failed with the given cause.
    #[inline]
    pub const fn halt(cause: Cause<E>) -> Self {
        Self::Failure(cause)
    }

    /// An exit failed with a defect.
    #[inline]
    pub const fn die(defect: Defect) -> Self {
        Self::Failure(Cause::die(defect))
    }

    /// An exit interrupted by `fiber_id`.
    #[inline]
    pub const fn interrupt(fiber_id: FiberId) -> Self {
        Self::Failure(Cause::interrupt(fiber_id))
    }

    /// Returns `true` for `Success`.
    #[inline]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns `true` for `Failure`.
    #[inline]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Returns `true` if this is a failure whose cause holds an interruption.
    pub fn is_interrupted(&self) -> bool {
        match self {
            Self::Success(_) => false,
            Self::Failure(cause) => cause.interrupted(),
        }
    }

    /// The failure cause, if any.
    pub const fn cause(&self) -> Option<&Cause<E>> {
        match self {
            Self::Success(_) => None,
            Self::Failure(cause) => Some(cause),
        }
    }

    /// The success value, if any.
    pub fn success(self) -> Option<A> {
        match self {
            Self::Success(value) => Some(value),
            Self::Failure(_) => None,
        }
    }

    /// Transforms the success value.
    pub fn map<B, F>(self, function: F) -> Exit<E, B>
    where
        F: FnOnce(A) -> B,
    {
        match self {
            Self::Success(value) => Exit::Success(function(value)),
            Self::Failure(cause) => Exit::Failure(cause),
        }
    }

    /// Transforms every typed failure of the cause.
    pub fn map_error<E2, F>(self, function: F) -> Exit<E2, A>
    where
        F: FnMut(E) -> E2,
    {
        match self {
            Self::Success(value) => Exit::Success(value),
            Self::Failure(cause) => Exit::Failure(cause.map(function)),
        }
    }

    /// Collapses both outcomes into a single value.
    pub fn fold<Z, F, S>(self, on_failure: F, on_success: S) -> Z
    where
        F: FnOnce(Cause<E>) -> Z,
        S: FnOnce(A) -> Z,
    {
        match self {
            Self::Success(value) => on_success(value),
            Self::Failure(cause) => on_failure(cause),
        }
    }

    /// Converts into a `Result` carrying the whole cause on failure.
    pub fn into_result(self) -> Result<A, Cause<E>> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Failure(cause) => Err(cause),
        }
    }

    /// Combines two exits of sequential computations; two failures are
    /// combined with [`Cause::then`].
    pub fn zip_with<B, C, F>(self, that: Exit<E, B>, function: F) -> Exit<E, C>
    where
        F: FnOnce(A, B) -> C,
    {
        self.combine(that, function, Cause::then)
    }

    /// Combines two exits of concurrent computations; two failures are
    /// combined with [`Cause::both`].
    pub fn zip_with_par<B, C, F>(self, that: Exit<E, B>, function: F) -> Exit<E, C>
    where
        F: FnOnce(A, B) -> C,
    {
        self.combine(that, function, Cause::both)
    }

    fn combine<B, C, F, G>(self, that: Exit<E, B>, function: F, join: G) -> Exit<E, C>
    where
        F: FnOnce(A, B) -> C,
        G: FnOnce(Cause<E>, Cause<E>) -> Cause<E>,
    {
        match (self, that) {
            (Self::Success(left), Exit::Success(right)) => Exit::Success(function(left, right)),
            (Self::Failure(cause), Exit::Success(_)) | (Self::Success(_), Exit::Failure(cause)) => {
                Exit::Failure(cause)
            }
            (Self::Failure(left), Exit::Failure(right)) => Exit::Failure(join(left, right)),
        }
    }

    /// Collects the exits of concurrent computations, preserving order.
    ///
    /// Succeeds with every value when all exits succeeded, otherwise fails
    /// with the [`Cause::both`] combination of every failure in order.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use effect_fiber::effect::{Cause, Exit};
    ///
    /// let exits: Vec<Exit<&str, i32>> = vec![Exit::succeed(1), Exit::fail("a"), Exit::fail("b")];
    /// assert_eq!(
    ///     Exit::collect_all_par(exits),
    ///     Exit::halt(Cause::both(Cause::fail("a"), Cause::fail("b")))
    /// );
    /// ```
    pub fn collect_all_par<I>(exits: I) -> Exit<E, Vec<A>>
    where
        I: IntoIterator<Item = Self>,
    {
        let mut values = Vec::new();
        let mut failure: Option<Cause<E>> = None;
        for exit in exits {
            match exit {
                Self::Success(value) => values.push(value),
                Self::Failure(cause) => {
                    failure = Some(match failure {
                        None => cause,
                        Some(previous) => Cause::both(previous, cause),
                    });
                }
            }
        }
        match failure {
            None => Exit::Success(values),
            Some(cause) => Exit::Failure(cause),
        }
    }
}

impl<E, A> From<Result<A, E>> for Exit<E, A> {
    fn from(result: Result<A, E>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(error) => Self::fail(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn zip_with_sequences_failures_with_then() {
        let left: Exit<&str, i32> = Exit::fail("a");
        let right: Exit<&str, i32> = Exit::fail("b");
        assert_eq!(
            left.zip_with(right, |a, b| a + b),
            Exit::halt(Cause::then(Cause::fail("a"), Cause::fail("b")))
        );
    }

    #[rstest]
    fn zip_with_par_combines_failures_with_both() {
        let left: Exit<&str, i32> = Exit::fail("a");
        let right: Exit<&str, i32> = Exit::fail("b");
        assert_eq!(
            left.zip_with_par(right, |a, b| a + b),
            Exit::halt(Cause::both(Cause::fail("a"), Cause::fail("b")))
        );
    }

    #[rstest]
    fn zip_with_keeps_single_failure() {
        let left: Exit<&str, i32> = Exit::succeed(1);
        let right: Exit<&str, i32> = Exit::fail("b");
        assert_eq!(left.zip_with(right, |a, b| a + b), Exit::fail("b"));
    }

    #[rstest]
    fn collect_all_par_preserves_order() {
        let exits: Vec<Exit<&str, i32>> = vec![Exit::succeed(3), Exit::succeed(1), Exit::succeed(2)];
        assert_eq!(Exit::collect_all_par(exits), Exit::Success(vec![3, 1, 2]));
    }

    #[rstest]
    fn collect_all_par_combines_many_failures() {
        let exits = (0..100_000_usize).map(Exit::<usize, ()>::fail);
        let Exit::Failure(cause) = Exit::collect_all_par(exits) else {
            panic!("expected a failure");
        };
        assert_eq!(cause.failures().len(), 100_000);
        assert_eq!(cause.into_failures().last(), Some(&99_999));
    }

    #[rstest]
    #[case(Exit::interrupt(FiberId::NONE), true)]
    #[case(Exit::fail("e"), false)]
    #[case(Exit::succeed(1), false)]
    fn is_interrupted_inspects_cause(#[case] exit: Exit<&str, i32>, #[case] expected: bool) {
        assert_eq!(exit.is_interrupted(), expected);
    }

    #[rstest]
    fn from_result() {
        let exit: Exit<String, i32> = Err("e".to_string()).into();
        assert_eq!(exit.into_result(), Err(Cause::fail("e".to_string())));
    }
}
