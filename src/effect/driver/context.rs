//! Execution stacks owned by a single driver.

use smallvec::SmallVec;

use crate::effect::fiber::InterruptStatus;
use crate::effect::instruction::{Environment, Frame};

const ENVIRONMENT_INLINE_CAPACITY: usize = 4;
const INTERRUPT_STATUS_INLINE_CAPACITY: usize = 8;

/// Frame, environment and interrupt-status stacks of one driver.
///
/// Only the interpreter loop touches these; the driver parks them between
/// evaluations.
pub(crate) struct ExecutionContext {
    pub(crate) frames: Vec<Frame>,
    environments: SmallVec<[Environment; ENVIRONMENT_INLINE_CAPACITY]>,
    interrupt_status: SmallVec<[bool; INTERRUPT_STATUS_INLINE_CAPACITY]>,
    epoch: u64,
}

impl ExecutionContext {
    pub(crate) fn new(environment: Environment) -> Self {
        let mut environments = SmallVec::new();
        environments.push(environment);
        let mut interrupt_status = SmallVec::new();
        interrupt_status.push(true);
        Self {
            frames: Vec::new(),
            environments,
            interrupt_status,
            epoch: 0,
        }
    }

    /// The innermost environment.
    pub(crate) fn environment(&self) -> Environment {
        self.environments
            .last()
            .cloned()
            .expect("environment stack always holds the root environment")
    }

    pub(crate) fn push_environment(&mut self, environment: Environment) {
        self.environments.push(environment);
    }

    pub(crate) fn pop_environment(&mut self) {
        if self.environments.len() > 1 {
            self.environments.pop();
        }
    }

    pub(crate) fn is_interruptible(&self) -> bool {
        self.interrupt_status.last().copied().unwrap_or(true)
    }

    pub(crate) fn interrupt_status(&self) -> InterruptStatus {
        InterruptStatus::from_interruptible(self.is_interruptible())
    }

    pub(crate) fn push_interrupt_status(&mut self, status: InterruptStatus) {
        self.interrupt_status.push(status.is_interruptible());
    }

    pub(crate) fn pop_interrupt_status(&mut self) {
        if self.interrupt_status.len() > 1 {
            self.interrupt_status.pop();
        }
    }

    /// Allocates the epoch of the next suspension.
    pub(crate) const fn next_epoch(&mut self) -> u64 {
        let epoch = self.epoch;
        self.epoch += 1;
        epoch
    }
}
