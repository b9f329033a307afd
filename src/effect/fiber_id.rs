//! Fiber identities.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_FIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identity of a fiber.
///
/// Identities are allocated from a process-wide counter and never reused.
/// [`FiberId::NONE`] names "no fiber" and is used as the interruptor when a
/// driver is cancelled from outside the runtime (for example through a
/// [`Canceler`](crate::effect::Canceler)).
///
/// # Examples
///
/// ```rust
/// use effect_fiber::effect::FiberId;
///
/// assert_eq!(FiberId::NONE.to_string(), "#0");
/// assert!(FiberId::NONE.is_none());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FiberId(u64);

impl FiberId {
    /// The identity used when no fiber is responsible for an interruption.
    pub const NONE: Self = Self(0);

    /// Allocates a fresh identity.
    pub(crate) fn next() -> Self {
        Self(NEXT_FIBER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the numeric value of this identity.
    #[inline]
    pub const fn sequence_number(self) -> u64 {
        self.0
    }

    /// Returns `true` for [`FiberId::NONE`].
    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "#{}", self.0)
    }
}
