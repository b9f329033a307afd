//! Runtime configuration.
//!
//! Configuration is read once, when a [`Runtime`](super::Runtime) is built.
//! Every value has a default, so an empty environment yields a usable
//! configuration; a value that is present but invalid is an error.
//!
//! # Example
//!
//! ```rust
//! use effect_fiber::effect::{Runtime, RuntimeConfig};
//!
//! let config = RuntimeConfig::default().with_yield_op_count(128);
//! let runtime = Runtime::new(config);
//! assert_eq!(runtime.config().yield_op_count, 128);
//! ```

use std::env;

use super::super::ConfigError;

/// Environment variable overriding [`RuntimeConfig::yield_op_count`].
pub const YIELD_OP_COUNT_VAR: &str = "EFFECT_FIBER_YIELD_OP_COUNT";

const DEFAULT_YIELD_OP_COUNT: usize = 2048;

/// Tuning knobs of a [`Runtime`](super::Runtime).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Number of instructions a fiber executes before it hands the scheduler
    /// to its siblings. Always at least one.
    pub yield_op_count: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            yield_op_count: DEFAULT_YIELD_OP_COUNT,
        }
    }
}

impl RuntimeConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `EFFECT_FIBER_YIELD_OP_COUNT`: instructions per scheduling turn
    ///   (optional, default: 2048, must be a positive integer)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a variable is set to an invalid
    /// value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let yield_op_count = lookup(YIELD_OP_COUNT_VAR).map_or(
            Ok(DEFAULT_YIELD_OP_COUNT),
            |value| parse_positive(YIELD_OP_COUNT_VAR, &value),
        )?;
        Ok(Self { yield_op_count })
    }

    /// Returns a copy with `yield_op_count` replaced; zero is raised to one.
    #[must_use]
    pub fn with_yield_op_count(self, yield_op_count: usize) -> Self {
        Self {
            yield_op_count: yield_op_count.max(1),
        }
    }
}

fn parse_positive(key: &str, value: &str) -> Result<usize, ConfigError> {
    match value.trim().parse::<usize>() {
        Ok(0) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be a positive integer".to_string(),
        }),
        Ok(parsed) => Ok(parsed),
        Err(error) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: error.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn lookup(value: Option<&'static str>) -> impl Fn(&str) -> Option<String> {
        move |key| {
            assert_eq!(key, YIELD_OP_COUNT_VAR);
            value.map(str::to_string)
        }
    }

    #[rstest]
    fn missing_variable_uses_the_default() {
        assert_eq!(
            RuntimeConfig::from_lookup(lookup(None)),
            Ok(RuntimeConfig::default())
        );
    }

    #[rstest]
    #[case("64", 64)]
    #[case(" 7 ", 7)]
    fn positive_values_are_accepted(#[case] raw: &'static str, #[case] expected: usize) {
        let config = RuntimeConfig::from_lookup(lookup(Some(raw)));
        assert_eq!(config.map(|config| config.yield_op_count), Ok(expected));
    }

    #[rstest]
    #[case("0")]
    #[case("-3")]
    #[case("many")]
    fn invalid_values_are_rejected(#[case] raw: &'static str) {
        let error = RuntimeConfig::from_lookup(lookup(Some(raw)));
        assert!(matches!(
            error,
            Err(ConfigError::InvalidValue { key, .. }) if key == YIELD_OP_COUNT_VAR
        ));
    }

    #[rstest]
    fn builder_never_sets_zero() {
        assert_eq!(
            RuntimeConfig::default().with_yield_op_count(0).yield_op_count,
            1
        );
    }
}
