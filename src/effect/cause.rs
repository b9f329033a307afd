//! Cause algebra - why an effect failed.
//!
//! A [`Cause`] is an accumulation tree of failure reasons:
//!
//! ```text
//! Cause<E> = Empty
//!          | Fail(E)              typed, expected failure
//!          | Die(Defect)          unexpected defect (panic, interpreter error)
//!          | Interrupt(FiberId)   cooperative cancellation
//!          | Then(Cause, Cause)   sequential composition
//!          | Both(Cause, Cause)   parallel composition
//! ```
//!
//! `Empty` is the identity of both `Then` and `Both`. The smart constructors
//! [`Cause::then`] and [`Cause::both`] never build a node with an empty side,
//! and equality treats a raw node with an empty side as its other side.
//!
//! # Examples
//!
//! ```rust
//! use effect_fiber::effect::{Cause, FiberId};
//!
//! let cause: Cause<&str> = Cause::then(
//!     Cause::fail("boom"),
//!     Cause::interrupt(FiberId::NONE),
//! );
//! assert!(cause.failed());
//! assert!(cause.interrupted());
//!
//! let stripped = cause.strip_failures();
//! assert!(!stripped.failed());
//! assert_eq!(stripped, Cause::interrupt(FiberId::NONE));
//! ```

use std::any::Any;
use std::collections::{BTreeSet, VecDeque};
use std::convert::Infallible;
use std::fmt;
use std::mem;
use std::ops::Deref;
use std::sync::Arc;

use super::FiberId;
use super::error::{InterruptedError, RuntimeError};

// =============================================================================
// Defect
// =============================================================================

/// Payload of a panic that carried neither a string nor a runtime error.
#[derive(Debug)]
struct OpaquePanic;

/// An unexpected failure: a panic in user code or an interpreter error.
///
/// Defects are shared, so a `Cause` holding one can be cloned and delivered
/// to every observer of a fiber. Two defects are equal when they share the
/// same payload or render to the same message.
///
/// # Examples
///
/// ```rust
/// use effect_fiber::effect::Defect;
///
/// let defect = Defect::new("disk on fire".to_string());
/// assert_eq!(defect.message(), "disk on fire");
/// assert_eq!(defect.downcast_ref::<String>().map(String::as_str), Some("disk on fire"));
/// ```
#[derive(Clone)]
pub struct Defect {
    payload: Arc<dyn Any + Send + Sync>,
}

impl Defect {
    /// Wraps an arbitrary payload.
    pub fn new<T: Any + Send + Sync>(payload: T) -> Self {
        Self {
            payload: Arc::new(payload),
        }
    }

    /// Converts a payload caught by `catch_unwind`.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let payload = match payload.downcast::<String>() {
            Ok(message) => return Self::new(*message),
            Err(payload) => payload,
        };
        let payload = match payload.downcast::<&'static str>() {
            Ok(message) => return Self::new(*message),
            Err(payload) => payload,
        };
        match payload.downcast::<RuntimeError>() {
            Ok(error) => Self::new(*error),
            Err(_) => Self::new(OpaquePanic),
        }
    }

    /// Returns a reference to the payload if it has type `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    fn rendered(&self) -> Option<String> {
        if let Some(message) = self.downcast_ref::<String>() {
            return Some(message.clone());
        }
        if let Some(message) = self.downcast_ref::<&'static str>() {
            return Some((*message).to_string());
        }
        if let Some(error) = self.downcast_ref::<RuntimeError>() {
            return Some(error.to_string());
        }
        self.downcast_ref::<InterruptedError>()
            .map(ToString::to_string)
    }

    /// Human readable description of the payload.
    pub fn message(&self) -> String {
        self.rendered()
            .unwrap_or_else(|| "defect with an opaque payload".to_string())
    }
}

impl PartialEq for Defect {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.payload, &other.payload) {
            return true;
        }
        match (self.rendered(), other.rendered()) {
            (Some(left), Some(right)) => left == right,
            _ => false,
        }
    }
}

impl fmt::Debug for Defect {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_tuple("Defect").field(&self.message()).finish()
    }
}

impl fmt::Display for Defect {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.message())
    }
}

// =============================================================================
// Cause
// =============================================================================

/// Owned operand of a [`Cause::Then`] or [`Cause::Both`] node.
///
/// Dropping a branch releases its subtree with an explicit worklist, so a
/// cause of any depth is freed in constant native stack.
pub struct Branch<E>(Box<Cause<E>>);

impl<E> Branch<E> {
    /// Boxes `cause` as an operand.
    pub fn new(cause: Cause<E>) -> Self {
        Self(Box::new(cause))
    }

    /// Takes the operand out of the branch.
    pub fn into_inner(mut self) -> Cause<E> {
        mem::replace(&mut *self.0, Cause::Empty)
    }
}

impl<E> From<Cause<E>> for Branch<E> {
    fn from(cause: Cause<E>) -> Self {
        Self::new(cause)
    }
}

impl<E> Deref for Branch<E> {
    type Target = Cause<E>;

    fn deref(&self) -> &Cause<E> {
        &self.0
    }
}

impl<E: Clone> Clone for Branch<E> {
    fn clone(&self) -> Self {
        Self::new((**self).clone())
    }
}

impl<E: fmt::Debug> fmt::Debug for Branch<E> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, formatter)
    }
}

impl<E> Drop for Branch<E> {
    fn drop(&mut self) {
        if !matches!(*self.0, Cause::Then(..) | Cause::Both(..)) {
            return;
        }
        let mut pending = vec![mem::replace(&mut *self.0, Cause::Empty)];
        while let Some(cause) = pending.pop() {
            if let Cause::Then(left, right) | Cause::Both(left, right) = cause {
                pending.push(left.into_inner());
                pending.push(right.into_inner());
            }
        }
    }
}

/// The accumulation tree describing why an effect failed.
///
/// Every traversal, including `Clone`, `Drop` and equality, runs on an
/// explicit stack, so causes accumulated from many fibers stay cheap to
/// handle.
///
/// # Laws
///
/// - `Cause::then(Cause::empty(), c) == c == Cause::then(c, Cause::empty())`
/// - `Cause::both(Cause::empty(), c) == c == Cause::both(c, Cause::empty())`
/// - `strip_failures` removes every `Fail` and keeps every `Die` and `Interrupt`
pub enum Cause<E> {
    /// No failure.
    Empty,
    /// An expected, typed failure.
    Fail(E),
    /// An unexpected defect.
    Die(Defect),
    /// An interruption requested by the given fiber.
    Interrupt(FiberId),
    /// The left cause followed by the right cause.
    Then(Branch<E>, Branch<E>),
    /// The left and right causes occurred concurrently.
    Both(Branch<E>, Branch<E>),
}

#[derive(Clone, Copy)]
enum Composite {
    Then,
    Both,
}

impl Composite {
    fn join<E>(self, left: Cause<E>, right: Cause<E>) -> Cause<E> {
        match self {
            Self::Then => Cause::Then(Branch::new(left), Branch::new(right)),
            Self::Both => Cause::Both(Branch::new(left), Branch::new(right)),
        }
    }
}

/// A node without operands.
enum Leaf<E> {
    Empty,
    Fail(E),
    Die(Defect),
    Interrupt(FiberId),
}

/// Rebuilds `cause` bottom-up: `leaf` maps the leaves, `join` combines the
/// rebuilt operands of every composite node.
fn rebuild<E, T, L, J>(cause: Cause<E>, mut leaf: L, mut join: J) -> T
where
    L: FnMut(Leaf<E>) -> T,
    J: FnMut(Composite, T, T) -> T,
{
    enum Step<E> {
        Visit(Cause<E>),
        Join(Composite),
    }

    let mut steps = vec![Step::Visit(cause)];
    let mut built = Vec::new();
    while let Some(step) = steps.pop() {
        match step {
            Step::Visit(Cause::Then(left, right)) => {
                steps.push(Step::Join(Composite::Then));
                steps.push(Step::Visit(right.into_inner()));
                steps.push(Step::Visit(left.into_inner()));
            }
            Step::Visit(Cause::Both(left, right)) => {
                steps.push(Step::Join(Composite::Both));
                steps.push(Step::Visit(right.into_inner()));
                steps.push(Step::Visit(left.into_inner()));
            }
            Step::Visit(Cause::Empty) => built.push(leaf(Leaf::Empty)),
            Step::Visit(Cause::Fail(error)) => built.push(leaf(Leaf::Fail(error))),
            Step::Visit(Cause::Die(defect)) => built.push(leaf(Leaf::Die(defect))),
            Step::Visit(Cause::Interrupt(fiber_id)) => built.push(leaf(Leaf::Interrupt(fiber_id))),
            Step::Join(composite) => {
                let right = built.pop().expect("right operand rebuilt before its node");
                let left = built.pop().expect("left operand rebuilt before its node");
                built.push(join(composite, left, right));
            }
        }
    }
    built.pop().expect("root rebuilt last")
}

impl<E> Cause<E> {
    /// The empty cause.
    #[inline]
    pub const fn empty() -> Self {
        Self::Empty
    }

    /// A typed failure.
    #[inline]
    pub const fn fail(error: E) -> Self {
        Self::Fail(error)
    }

    /// A defect.
    #[inline]
    pub const fn die(defect: Defect) -> Self {
        Self::Die(defect)
    }

    /// An interruption requested by `fiber_id`.
    #[inline]
    pub const fn interrupt(fiber_id: FiberId) -> Self {
        Self::Interrupt(fiber_id)
    }

    /// Sequential composition; `Empty` on either side yields the other side.
    pub fn then(left: Self, right: Self) -> Self {
        if left.is_empty() {
            right
        } else if right.is_empty() {
            left
        } else {
            Self::Then(Branch::new(left), Branch::new(right))
        }
    }

    /// Parallel composition; `Empty` on either side yields the other side.
    pub fn both(left: Self, right: Self) -> Self {
        if left.is_empty() {
            right
        } else if right.is_empty() {
            left
        } else {
            Self::Both(Branch::new(left), Branch::new(right))
        }
    }

    /// Visits the nodes in pre-order, left to right, returning the first
    /// `Some` produced by `function`.
    pub fn find<Z, F>(&self, mut function: F) -> Option<Z>
    where
        F: FnMut(&Self) -> Option<Z>,
    {
        let mut pending = vec![self];
        while let Some(node) = pending.pop() {
            if let Some(found) = function(node) {
                return Some(found);
            }
            if let Self::Then(left, right) | Self::Both(left, right) = node {
                pending.push(right);
                pending.push(left);
            }
        }
        None
    }

    /// Returns `true` if the tree holds no `Fail`, `Die` or `Interrupt`.
    ///
    /// Searches breadth first: a node built by the smart constructors has a
    /// leaf close to it, however deep the tree is.
    pub fn is_empty(&self) -> bool {
        let mut pending = VecDeque::from([self]);
        while let Some(node) = pending.pop_front() {
            match node {
                Self::Fail(_) | Self::Die(_) | Self::Interrupt(_) => return false,
                Self::Then(left, right) | Self::Both(left, right) => {
                    pending.push_back(left);
                    pending.push_back(right);
                }
                Self::Empty => {}
            }
        }
        true
    }

    /// Returns `true` if the tree holds a typed failure.
    pub fn failed(&self) -> bool {
        self.find(|node| matches!(node, Self::Fail(_)).then_some(()))
            .is_some()
    }

    /// Returns `true` if the tree holds a defect.
    pub fn died(&self) -> bool {
        self.find(|node| matches!(node, Self::Die(_)).then_some(()))
            .is_some()
    }

    /// Returns `true` if the tree holds an interruption.
    pub fn interrupted(&self) -> bool {
        self.find(|node| matches!(node, Self::Interrupt(_)).then_some(()))
            .is_some()
    }

    /// Returns `true` if the tree holds interruptions and nothing else.
    pub fn interrupted_only(&self) -> bool {
        self.interrupted() && !self.failed() && !self.died()
    }

    /// References to every typed failure, left to right.
    pub fn failures(&self) -> Vec<&E> {
        let mut failures = Vec::new();
        let mut pending = vec![self];
        while let Some(node) = pending.pop() {
            match node {
                Self::Fail(error) => failures.push(error),
                Self::Then(left, right) | Self::Both(left, right) => {
                    pending.push(right);
                    pending.push(left);
                }
                Self::Empty | Self::Die(_) | Self::Interrupt(_) => {}
            }
        }
        failures
    }

    /// Every typed failure, left to right, consuming the cause.
    pub fn into_failures(self) -> Vec<E> {
        let mut failures = Vec::new();
        let mut pending = vec![self];
        while let Some(node) = pending.pop() {
            match node {
                Self::Fail(error) => failures.push(error),
                Self::Then(left, right) | Self::Both(left, right) => {
                    pending.push(right.into_inner());
                    pending.push(left.into_inner());
                }
                Self::Empty | Self::Die(_) | Self::Interrupt(_) => {}
            }
        }
        failures
    }

    /// Every defect, left to right.
    pub fn defects(&self) -> Vec<Defect> {
        let mut defects = Vec::new();
        let mut pending = vec![self];
        while let Some(node) = pending.pop() {
            match node {
                Self::Die(defect) => defects.push(defect.clone()),
                Self::Then(left, right) | Self::Both(left, right) => {
                    pending.push(right);
                    pending.push(left);
                }
                Self::Empty | Self::Fail(_) | Self::Interrupt(_) => {}
            }
        }
        defects
    }

    /// Every fiber that requested an interruption recorded in this tree.
    pub fn interruptors(&self) -> BTreeSet<FiberId> {
        let mut interruptors = BTreeSet::new();
        let mut pending = vec![self];
        while let Some(node) = pending.pop() {
            match node {
                Self::Interrupt(fiber_id) => {
                    interruptors.insert(*fiber_id);
                }
                Self::Then(left, right) | Self::Both(left, right) => {
                    pending.push(right);
                    pending.push(left);
                }
                Self::Empty | Self::Fail(_) | Self::Die(_) => {}
            }
        }
        interruptors
    }

    /// Returns the first typed failure, or the whole cause when there is none.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use effect_fiber::effect::{Cause, Defect};
    ///
    /// let cause = Cause::both(Cause::die(Defect::new("bug")), Cause::fail(1));
    /// assert_eq!(cause.failure_or_cause(), Ok(1));
    /// ```
    pub fn failure_or_cause(self) -> Result<E, Self> {
        if !self.failed() {
            return Err(self);
        }
        let mut failures = self.into_failures();
        Ok(failures.swap_remove(0))
    }

    /// Transforms every typed failure, keeping the shape of the tree.
    pub fn map<E2, F>(self, mut function: F) -> Cause<E2>
    where
        F: FnMut(E) -> E2,
    {
        rebuild(
            self,
            |leaf| match leaf {
                Leaf::Empty => Cause::Empty,
                Leaf::Fail(error) => Cause::Fail(function(error)),
                Leaf::Die(defect) => Cause::Die(defect),
                Leaf::Interrupt(fiber_id) => Cause::Interrupt(fiber_id),
            },
            Composite::join,
        )
    }

    /// Removes every typed failure, keeping defects and interruptions.
    ///
    /// Used when an interrupted fiber unwinds past error handlers: ordinary
    /// failures may not be recovered from, but defects are still reported.
    pub fn strip_failures(self) -> Self {
        self.without_failures()
    }

    /// [`strip_failures`](Self::strip_failures) into any error type.
    pub(crate) fn without_failures<E2>(self) -> Cause<E2> {
        rebuild(
            self,
            |leaf| match leaf {
                Leaf::Empty | Leaf::Fail(_) => Cause::Empty,
                Leaf::Die(defect) => Cause::Die(defect),
                Leaf::Interrupt(fiber_id) => Cause::Interrupt(fiber_id),
            },
            |composite, left, right| match composite {
                Composite::Then => Cause::then(left, right),
                Composite::Both => Cause::both(left, right),
            },
        )
    }

    /// Reduces the cause to a single defect.
    ///
    /// The first typed failure wins (converted by `function`); otherwise an
    /// interruption is reported as an [`InterruptedError`]; otherwise the
    /// first defect; an empty cause squashes to an `InterruptedError` with
    /// no interruptors.
    pub fn squash_with<F>(self, function: F) -> Defect
    where
        F: FnOnce(E) -> Defect,
    {
        match self.failure_or_cause() {
            Ok(error) => function(error),
            Err(cause) => cause.squash_defect(),
        }
    }

    fn squash_defect(&self) -> Defect {
        if self.interrupted() {
            return Defect::new(InterruptedError {
                interruptors: self.interruptors(),
            });
        }
        self.defects()
            .into_iter()
            .next()
            .unwrap_or_else(|| {
                Defect::new(InterruptedError {
                    interruptors: BTreeSet::new(),
                })
            })
    }

    /// Returns `true` when every interruptor of `other` is already recorded
    /// in this cause.
    pub(crate) fn covers_interruptors(&self, other: &Cause<Infallible>) -> bool {
        other.interruptors().is_subset(&self.interruptors())
    }
}

impl<E: Any + Send + Sync> Cause<E> {
    /// [`squash_with`](Self::squash_with) that wraps a typed failure as the
    /// defect payload.
    pub fn squash(self) -> Defect {
        self.squash_with(Defect::new)
    }
}

impl Cause<Infallible> {
    /// Lifts a cause that cannot hold typed failures into any error type.
    pub fn widen<E>(self) -> Cause<E> {
        self.map(|never| match never {})
    }
}

impl<E: Clone> Clone for Cause<E> {
    fn clone(&self) -> Self {
        enum Step<'a, E> {
            Visit(&'a Cause<E>),
            Join(Composite),
        }

        let mut steps = vec![Step::Visit(self)];
        let mut built = Vec::new();
        while let Some(step) = steps.pop() {
            match step {
                Step::Visit(Self::Then(left, right)) => {
                    steps.push(Step::Join(Composite::Then));
                    steps.push(Step::Visit(&**right));
                    steps.push(Step::Visit(&**left));
                }
                Step::Visit(Self::Both(left, right)) => {
                    steps.push(Step::Join(Composite::Both));
                    steps.push(Step::Visit(&**right));
                    steps.push(Step::Visit(&**left));
                }
                Step::Visit(Self::Empty) => built.push(Self::Empty),
                Step::Visit(Self::Fail(error)) => built.push(Self::Fail(error.clone())),
                Step::Visit(Self::Die(defect)) => built.push(Self::Die(defect.clone())),
                Step::Visit(Self::Interrupt(fiber_id)) => built.push(Self::Interrupt(*fiber_id)),
                Step::Join(composite) => {
                    let right = built.pop().expect("right operand cloned before its node");
                    let left = built.pop().expect("left operand cloned before its node");
                    built.push(composite.join(left, right));
                }
            }
        }
        built.pop().expect("root cloned last")
    }
}

/// Skips through nodes that have an empty side, so that `Then(Empty, c)`
/// is viewed as `c`.
fn skip_empty<E>(cause: &Cause<E>) -> &Cause<E> {
    let mut current = cause;
    loop {
        match current {
            Cause::Then(left, right) | Cause::Both(left, right) => {
                if left.is_empty() {
                    current = &**right;
                } else if right.is_empty() {
                    current = &**left;
                } else {
                    return current;
                }
            }
            _ => return current,
        }
    }
}

const fn as_built<E>(cause: &Cause<E>) -> &Cause<E> {
    cause
}

impl<E: PartialEq> PartialEq for Cause<E> {
    fn eq(&self, other: &Self) -> bool {
        let mut pending = vec![(self, other)];
        while let Some((left, right)) = pending.pop() {
            match (skip_empty(left), skip_empty(right)) {
                (Self::Empty, Self::Empty) => {}
                (Self::Fail(left), Self::Fail(right)) if left == right => {}
                (Self::Die(left), Self::Die(right)) if left == right => {}
                (Self::Interrupt(left), Self::Interrupt(right)) if left == right => {}
                (Self::Then(left_a, right_a), Self::Then(left_b, right_b))
                | (Self::Both(left_a, right_a), Self::Both(left_b, right_b)) => {
                    pending.push((&**right_a, &**right_b));
                    pending.push((&**left_a, &**left_b));
                }
                _ => return false,
            }
        }
        true
    }
}

/// Writes `cause` in `Then(left, right)` notation without recursion.
fn render<'a, E, L>(
    cause: &'a Cause<E>,
    formatter: &mut fmt::Formatter<'_>,
    view: fn(&Cause<E>) -> &Cause<E>,
    mut leaf: L,
) -> fmt::Result
where
    L: FnMut(&'a Cause<E>, &mut fmt::Formatter<'_>) -> fmt::Result,
{
    enum Token<'a, E> {
        Node(&'a Cause<E>),
        Text(&'static str),
    }

    let mut pending = vec![Token::Node(cause)];
    while let Some(token) = pending.pop() {
        let node = match token {
            Token::Text(text) => {
                formatter.write_str(text)?;
                continue;
            }
            Token::Node(node) => view(node),
        };
        let (name, left, right) = match node {
            Cause::Then(left, right) => ("Then(", left, right),
            Cause::Both(left, right) => ("Both(", left, right),
            _ => {
                leaf(node, formatter)?;
                continue;
            }
        };
        formatter.write_str(name)?;
        pending.push(Token::Text(")"));
        pending.push(Token::Node(&**right));
        pending.push(Token::Text(", "));
        pending.push(Token::Node(&**left));
    }
    Ok(())
}

impl<E: fmt::Debug> fmt::Debug for Cause<E> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        render(self, formatter, as_built, |node, formatter| match node {
            Self::Fail(error) => write!(formatter, "Fail({error:?})"),
            Self::Die(defect) => write!(formatter, "Die({defect:?})"),
            Self::Interrupt(fiber_id) => write!(formatter, "Interrupt({fiber_id:?})"),
            Self::Empty | Self::Then(..) | Self::Both(..) => formatter.write_str("Empty"),
        })
    }
}

impl<E: fmt::Display> fmt::Display for Cause<E> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        render(self, formatter, skip_empty, |node, formatter| match node {
            Self::Fail(error) => write!(formatter, "Fail({error})"),
            Self::Die(defect) => write!(formatter, "Die({defect})"),
            Self::Interrupt(fiber_id) => write!(formatter, "Interrupt({fiber_id})"),
            Self::Empty | Self::Then(..) | Self::Both(..) => formatter.write_str("Empty"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn then_with_empty_is_identity() {
        let cause = Cause::fail(1);
        assert_eq!(Cause::then(Cause::empty(), cause.clone()), cause);
        assert_eq!(Cause::then(cause.clone(), Cause::empty()), cause);
    }

    #[rstest]
    fn raw_nodes_with_empty_side_compare_equal() {
        let raw: Cause<i32> = Cause::Both(Branch::new(Cause::Empty), Branch::new(Cause::fail(2)));
        assert_eq!(raw, Cause::fail(2));
        assert!(!raw.is_empty());
    }

    #[rstest]
    fn nested_empty_nodes_are_empty() {
        let raw: Cause<i32> = Cause::Then(
            Branch::new(Cause::Both(Branch::new(Cause::Empty), Branch::new(Cause::Empty))),
            Branch::new(Cause::Empty),
        );
        assert!(raw.is_empty());
        assert_eq!(raw, Cause::empty());
    }

    #[rstest]
    fn strip_failures_keeps_defects_and_interrupts() {
        let id = FiberId::next();
        let defect = Defect::new("bug");
        let cause = Cause::then(
            Cause::both(Cause::fail("e"), Cause::die(defect.clone())),
            Cause::then(Cause::fail("f"), Cause::interrupt(id)),
        );
        let stripped = cause.strip_failures();
        assert_eq!(
            stripped,
            Cause::then(Cause::die(defect), Cause::interrupt(id))
        );
    }

    #[rstest]
    fn failures_are_reported_left_to_right() {
        let cause = Cause::then(Cause::fail(1), Cause::both(Cause::fail(2), Cause::fail(3)));
        assert_eq!(cause.failures(), vec![&1, &2, &3]);
        assert_eq!(cause.into_failures(), vec![1, 2, 3]);
    }

    #[rstest]
    fn squash_prefers_failures_then_interruptions_then_defects() {
        let id = FiberId::next();
        let failing: Cause<&'static str> =
            Cause::both(Cause::interrupt(id), Cause::fail("typed"));
        assert_eq!(failing.squash().message(), "typed");

        let interrupted: Cause<&'static str> =
            Cause::both(Cause::die(Defect::new("bug")), Cause::interrupt(id));
        assert!(interrupted.squash().downcast_ref::<InterruptedError>().is_some());

        let dying: Cause<&'static str> = Cause::die(Defect::new("bug"));
        assert_eq!(dying.squash().message(), "bug");
    }

    #[rstest]
    fn defect_from_panic_recognizes_string_payloads() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(Defect::from_panic(payload).message(), "static message");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(Defect::from_panic(payload).message(), "owned");

        let payload: Box<dyn Any + Send> = Box::new(17_u8);
        assert_eq!(
            Defect::from_panic(payload).message(),
            "defect with an opaque payload"
        );
    }

    #[rstest]
    fn covers_interruptors_compares_sets() {
        let first = FiberId::next();
        let second = FiberId::next();
        let cause: Cause<i32> = Cause::then(Cause::interrupt(first), Cause::fail(3));
        assert!(cause.covers_interruptors(&Cause::interrupt(first)));
        assert!(!cause.covers_interruptors(&Cause::interrupt(second)));
        assert!(cause.covers_interruptors(&Cause::empty()));
    }

    fn deep_chain(depth: usize) -> Cause<usize> {
        (0..depth).fold(Cause::empty(), |cause, n| Cause::then(cause, Cause::fail(n)))
    }

    #[rstest]
    fn deep_causes_are_traversed_without_recursion() {
        let cause = deep_chain(200_000);
        let copy = cause.clone();
        assert_eq!(copy, cause);
        assert_eq!(copy.map(|n| n + 1).failures().first(), Some(&&1));
        assert!(cause.clone().strip_failures().is_empty());
        assert!(cause.to_string().starts_with("Then(Then("));
        assert_ne!(Cause::both(cause, Cause::fail(0)), deep_chain(3));
    }

    #[rstest]
    fn raw_nodes_are_debug_printed_as_built() {
        let raw: Cause<i32> = Cause::Then(Branch::new(Cause::Empty), Branch::new(Cause::fail(1)));
        assert_eq!(format!("{raw:?}"), "Then(Empty, Fail(1))");
        assert_eq!(raw.to_string(), "Fail(1)");
    }

    #[rstest]
    fn display_renders_tree() {
        let cause: Cause<i32> = Cause::then(Cause::fail(1), Cause::interrupt(FiberId::NONE));
        assert_eq!(cause.to_string(), "Then(Fail(1), Interrupt(#0))");
    }
}
