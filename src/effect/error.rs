//! Error types for the runtime.
//!
//! Effect failures are never reported through these types: they travel as
//! [`Cause`](super::Cause) values inside an [`Exit`](super::Exit). The errors
//! here describe problems of the runtime machinery itself, the environment it
//! was configured from, or the host it runs on.

use std::collections::BTreeSet;

use thiserror::Error;

use super::FiberId;

/// Errors raised by the runtime machinery.
///
/// These surface to callers as `Die` defects inside a failed `Exit`, never as
/// a rejected future.
///
/// # Examples
///
/// ```rust
/// use effect_fiber::effect::RuntimeError;
///
/// let error = RuntimeError::TypeMismatch { context: "continuation input" };
/// assert_eq!(
///     error.to_string(),
///     "type mismatch in interpreter: continuation input"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// The root driver was dropped before producing an exit.
    #[error("fiber was abandoned before producing an exit")]
    Abandoned,

    /// An erased value did not have the type its consumer expected.
    #[error("type mismatch in interpreter: {context}")]
    TypeMismatch {
        /// Where the mismatch was detected.
        context: &'static str,
    },
}

/// Squashed form of an interruption, used when a cause carrying only
/// interruptions has to be reported as a single defect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("interrupted by fibers {}", render_interruptors(.interruptors))]
pub struct InterruptedError {
    /// The fibers that requested the interruption.
    pub interruptors: BTreeSet<FiberId>,
}

fn render_interruptors(interruptors: &BTreeSet<FiberId>) -> String {
    interruptors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors produced while loading a [`RuntimeConfig`](super::RuntimeConfig).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue {
        /// The name of the environment variable.
        key: String,
        /// Description of why the value is invalid.
        message: String,
    },
}

/// Error type for blocking execution failures.
///
/// Returned when [`Runtime::run_blocking_exit`](super::Runtime::run_blocking_exit)
/// cannot block the calling thread on the host runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BlockingError {
    /// Cannot use `block_in_place` in a current-thread runtime.
    #[error(
        "cannot execute blocking operation in current-thread runtime: \
         block_in_place is only supported in multi-thread runtimes"
    )]
    CurrentThreadRuntime,

    /// The runtime flavor is not supported for blocking execution.
    #[error(
        "cannot execute blocking operation: \
         the runtime flavor is not supported for blocking execution"
    )]
    UnsupportedRuntimeFlavor,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn abandoned_display() {
        assert_eq!(
            RuntimeError::Abandoned.to_string(),
            "fiber was abandoned before producing an exit"
        );
    }

    #[rstest]
    fn interrupted_error_lists_interruptors_in_order() {
        let error = InterruptedError {
            interruptors: [FiberId::NONE].into_iter().collect(),
        };
        assert_eq!(error.to_string(), "interrupted by fibers #0");
    }

    #[rstest]
    fn config_error_display() {
        let error = ConfigError::InvalidValue {
            key: "EFFECT_FIBER_YIELD_OP_COUNT".to_string(),
            message: "must be positive".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "invalid value for EFFECT_FIBER_YIELD_OP_COUNT: must be positive"
        );
    }

    #[rstest]
    fn blocking_error_display_mentions_block_in_place() {
        assert!(
            BlockingError::CurrentThreadRuntime
                .to_string()
                .contains("block_in_place")
        );
    }
}
