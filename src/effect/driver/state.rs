//! Lifecycle state of a driver.

use std::convert::Infallible;
use std::fmt;

use crate::effect::Cause;
use crate::effect::instruction::SharedExit;

/// Observer notified once with the sealed exit of a driver.
pub(crate) type Observer = Box<dyn FnOnce(SharedExit) + Send>;

/// Execution status of a fiber.
///
/// ```text
/// Running(interrupting) --Async--> Suspended(previous, interruptible, epoch)
/// Suspended --resume(matching epoch)--> previous
/// Running --exit--> Finishing(interrupting) --> Done
/// ```
///
/// `Done` is terminal. `Suspended` keeps the status it replaced so that a
/// resumption restores it exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsyncStatus {
    /// Interpreting instructions.
    Running {
        /// Whether the fiber is unwinding because of an interruption.
        interrupting: bool,
    },
    /// Producing its exit.
    Finishing {
        /// Whether the fiber is unwinding because of an interruption.
        interrupting: bool,
    },
    /// Waiting for an asynchronous callback.
    Suspended {
        /// Status to restore on resumption.
        previous: Box<AsyncStatus>,
        /// Whether an interruption may wake the fiber.
        interruptible: bool,
        /// Identifies this suspension; resumptions for other epochs are stale.
        epoch: u64,
    },
    /// Terminated.
    Done,
}

impl AsyncStatus {
    /// Returns `true` while the fiber unwinds because of an interruption.
    pub fn is_interrupting(&self) -> bool {
        match self {
            Self::Running { interrupting } | Self::Finishing { interrupting } => *interrupting,
            Self::Suspended { previous, .. } => previous.is_interrupting(),
            Self::Done => false,
        }
    }

    /// Returns `true` once the fiber has terminated.
    #[inline]
    pub const fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Returns `true` while the fiber waits for a callback.
    #[inline]
    pub const fn is_suspended(&self) -> bool {
        matches!(self, Self::Suspended { .. })
    }

    pub(crate) fn with_interrupting(self, interrupting: bool) -> Self {
        match self {
            Self::Running { .. } => Self::Running { interrupting },
            Self::Finishing { .. } => Self::Finishing { interrupting },
            Self::Suspended {
                previous,
                interruptible,
                epoch,
            } => Self::Suspended {
                previous: Box::new(previous.with_interrupting(interrupting)),
                interruptible,
                epoch,
            },
            Self::Done => Self::Done,
        }
    }
}

impl fmt::Display for AsyncStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running { interrupting } => write!(formatter, "Running(interrupting: {interrupting})"),
            Self::Finishing { interrupting } => {
                write!(formatter, "Finishing(interrupting: {interrupting})")
            }
            Self::Suspended {
                interruptible,
                epoch,
                ..
            } => write!(formatter, "Suspended(interruptible: {interruptible}, epoch: {epoch})"),
            Self::Done => write!(formatter, "Done"),
        }
    }
}

/// Mutable state shared between a driver and the threads that observe,
/// resume or interrupt it.
pub(crate) enum AsyncState {
    Executing {
        status: AsyncStatus,
        observers: Vec<Observer>,
        interrupted: Cause<Infallible>,
    },
    Done(SharedExit),
}

impl AsyncState {
    pub(crate) const fn initial() -> Self {
        Self::Executing {
            status: AsyncStatus::Running {
                interrupting: false,
            },
            observers: Vec::new(),
            interrupted: Cause::Empty,
        }
    }

    pub(crate) const fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }

    pub(crate) fn status(&self) -> AsyncStatus {
        match self {
            Self::Executing { status, .. } => status.clone(),
            Self::Done(_) => AsyncStatus::Done,
        }
    }
}
