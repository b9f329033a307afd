//! Fiber drivers: the trampoline interpreter.
//!
//! A [`Driver`] owns the execution of one instruction tree. It walks the tree
//! with an explicit loop over a frame stack, never with native recursion, so
//! arbitrarily deep `Chain` nests run in constant native stack.
//!
//! # Threading
//!
//! A driver is `Send + Sync` so resolve callbacks and interruption requests
//! may arrive from any thread, but those only update the lifecycle state and
//! enqueue work on the driver's [`Scheduler`]. Interpretation itself happens
//! in [`Driver::evaluate_now`], which is only ever called from a scheduler
//! task; the execution stacks are parked in the driver between evaluations.
//!
//! # Interruption
//!
//! An interruption request is recorded in the accumulated `interrupted`
//! cause. It is delivered at the next interruption point while the innermost
//! interrupt status is interruptible, or immediately when the driver is
//! suspended in an interruptible region. While an interrupted driver
//! unwinds, failure handlers in interruptible regions are skipped and the
//! propagating cause loses its typed failures.
//!
//! # Ownership
//!
//! A driver is kept alive by whatever can still resume it: queued scheduler
//! tasks and suspension callbacks hold its [`Anchor`]. An anchor also owns
//! the anchors of the fibers waiting on its driver, while the observers
//! those fibers register hold them only weakly. A parent keeps its children
//! reachable for interruption; a child keeps its parent alive only while
//! the child itself can make progress. A root that nothing can resume any
//! more is therefore dropped, even when it waits on children.

mod context;
mod coordination;
mod state;

use std::collections::BTreeSet;
use std::convert::Infallible;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use static_assertions::assert_impl_all;
use tracing::{debug, error, trace, warn};

pub use self::state::AsyncStatus;
pub(crate) use self::state::Observer;

use self::context::ExecutionContext;
use self::state::AsyncState;
use super::fiber::FiberDescriptor;
use super::instruction::{
    AnyValue, Environment, ErasedExit, Frame, Instruction, Registration, Seal, SharedExit,
};
use super::scheduler::Scheduler;
use super::{Cause, Defect, Exit, FiberId};

/// The execution context of one fiber.
pub(crate) struct Driver {
    id: FiberId,
    state: Mutex<AsyncState>,
    context: Mutex<Option<ExecutionContext>>,
    interrupt_requested: AtomicBool,
    scheduler: Arc<dyn Scheduler>,
    yield_op_count: usize,
    seal: Seal,
    anchor: Mutex<Weak<Anchor>>,
    waiters: Mutex<Vec<Weak<Driver>>>,
}

assert_impl_all!(Driver: Send, Sync);

/// Strong handle on a driver held by the things that can resume it.
pub(crate) struct Anchor {
    driver: Arc<Driver>,
    waiters: Mutex<Vec<Arc<Anchor>>>,
}

/// Callback that resumes a driver suspended at a given epoch.
///
/// Resuming a suspension that has already ended, by an earlier resumption or
/// by an interruption, does nothing.
#[derive(Clone)]
pub(crate) struct Resume {
    anchor: Arc<Anchor>,
    epoch: u64,
}

impl Resume {
    pub(crate) fn resume(&self, instruction: Instruction) {
        resume_driver(&self.anchor.driver, self.epoch, instruction);
    }

    pub(crate) fn fiber_id(&self) -> FiberId {
        self.anchor.driver.id
    }

    /// A resumption that does not keep the waiting fiber alive.
    pub(crate) fn downgrade(&self) -> WeakResume {
        WeakResume {
            driver: Arc::downgrade(&self.anchor.driver),
            epoch: self.epoch,
        }
    }
}

/// [`Resume`] held by observers of other drivers.
///
/// Resuming a fiber that was already dropped does nothing.
#[derive(Clone)]
pub(crate) struct WeakResume {
    driver: Weak<Driver>,
    epoch: u64,
}

impl WeakResume {
    pub(crate) fn resume(&self, instruction: Instruction) {
        match self.driver.upgrade() {
            Some(driver) => resume_driver(&driver, self.epoch, instruction),
            None => trace!(epoch = self.epoch, "resumption of a dropped fiber ignored"),
        }
    }
}

fn resume_driver(driver: &Arc<Driver>, epoch: u64, instruction: Instruction) {
    if driver.exit_async(epoch) {
        debug!(fiber = %driver.id, epoch, "fiber resumed");
        driver.evaluate_later(instruction);
    } else {
        trace!(fiber = %driver.id, epoch, "stale resumption ignored");
    }
}

impl Driver {
    pub(crate) fn new(
        environment: Environment,
        scheduler: Arc<dyn Scheduler>,
        yield_op_count: usize,
        seal: Seal,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: FiberId::next(),
            state: Mutex::new(AsyncState::initial()),
            context: Mutex::new(Some(ExecutionContext::new(environment))),
            interrupt_requested: AtomicBool::new(false),
            scheduler,
            yield_op_count: yield_op_count.max(1),
            seal,
            anchor: Mutex::new(Weak::new()),
            waiters: Mutex::new(Vec::new()),
        })
    }

    /// The anchor of this driver, created on demand.
    ///
    /// A new anchor picks up the anchors of every fiber still waiting on the
    /// driver.
    fn anchor(self: &Arc<Self>) -> Arc<Anchor> {
        let anchor = {
            let mut slot = self.anchor.lock();
            if let Some(anchor) = slot.upgrade() {
                return anchor;
            }
            let anchor = Arc::new(Anchor {
                driver: Arc::clone(self),
                waiters: Mutex::new(Vec::new()),
            });
            *slot = Arc::downgrade(&anchor);
            anchor
        };
        let waiters: Vec<Arc<Self>> = self
            .waiters
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        let waiting: Vec<Arc<Anchor>> = waiters.iter().map(Self::anchor).collect();
        anchor.waiters.lock().extend(waiting);
        anchor
    }

    /// Registers `observer` on behalf of the fiber `waiter` resumes.
    ///
    /// Until this driver completes, anything able to resume it also keeps the
    /// waiting fiber alive. The observer should only hold the waiter through
    /// [`Resume::downgrade`].
    pub(crate) fn observe_for(&self, waiter: &Resume, observer: Observer) -> Option<SharedExit> {
        let exit = self.observe(observer);
        if exit.is_none() {
            self.waiters.lock().push(Arc::downgrade(&waiter.anchor.driver));
            let anchor = self.anchor.lock().upgrade();
            if let Some(anchor) = anchor {
                anchor.waiters.lock().push(Arc::clone(&waiter.anchor));
            }
        }
        exit
    }

    pub(crate) const fn id(&self) -> FiberId {
        self.id
    }

    pub(crate) fn status(&self) -> AsyncStatus {
        self.state.lock().status()
    }

    /// The sealed exit, once the driver is done.
    pub(crate) fn poll(&self) -> Option<SharedExit> {
        match &*self.state.lock() {
            AsyncState::Done(exit) => Some(exit.clone()),
            AsyncState::Executing { .. } => None,
        }
    }

    /// Registers `observer` for the exit of this driver.
    ///
    /// When the driver is already done the observer is dropped and the exit
    /// is returned instead.
    pub(crate) fn observe(&self, observer: Observer) -> Option<SharedExit> {
        match &mut *self.state.lock() {
            AsyncState::Done(exit) => Some(exit.clone()),
            AsyncState::Executing { observers, .. } => {
                observers.push(observer);
                None
            }
        }
    }

    pub(crate) fn interruptors(&self) -> BTreeSet<FiberId> {
        match &*self.state.lock() {
            AsyncState::Executing { interrupted, .. } => interrupted.interruptors(),
            AsyncState::Done(_) => BTreeSet::new(),
        }
    }

    fn is_interrupted(&self) -> bool {
        self.interrupt_requested.load(Ordering::Acquire)
    }

    /// Requests interruption on behalf of `interruptor`.
    ///
    /// The request is merged into the accumulated interruption cause. A driver
    /// suspended in an interruptible region is woken with a halt right away;
    /// otherwise the request waits for the next interruption point.
    pub(crate) fn interrupt_as(self: &Arc<Self>, interruptor: FiberId) {
        let halt = {
            let mut state = self.state.lock();
            let AsyncState::Executing {
                status,
                interrupted,
                ..
            } = &mut *state
            else {
                return;
            };
            *interrupted = Cause::then(
                mem::replace(interrupted, Cause::Empty),
                Cause::interrupt(interruptor),
            );
            self.interrupt_requested.store(true, Ordering::Release);
            let eager = matches!(
                &*status,
                AsyncStatus::Suspended {
                    previous,
                    interruptible: true,
                    ..
                } if !previous.is_interrupting()
            );
            if eager {
                *status = AsyncStatus::Running { interrupting: true };
                Some(interrupted.clone())
            } else {
                None
            }
        };
        debug!(fiber = %self.id, interruptor = %interruptor, eager = halt.is_some(), "interruption requested");
        if let Some(cause) = halt {
            let anchor = self.anchor();
            self.scheduler.dispatch(Box::new(move || {
                anchor.driver.evaluate_now(Instruction::Fail(cause.widen()));
            }));
        }
    }

    /// Schedules `instruction` on a later turn of the scheduler.
    pub(crate) fn evaluate_later(self: &Arc<Self>, instruction: Instruction) {
        let anchor = self.anchor();
        self.scheduler
            .dispatch_later(Box::new(move || anchor.driver.evaluate_now(instruction)));
    }

    /// Forks `effect` into a child driver that shares the scheduler.
    pub(crate) fn fork(
        self: &Arc<Self>,
        effect: Instruction,
        seal: Seal,
        environment: Environment,
    ) -> Arc<Self> {
        let child = Self::new(
            environment,
            Arc::clone(&self.scheduler),
            self.yield_op_count,
            seal,
        );
        debug!(fiber = %child.id, parent = %self.id, "fiber forked");
        child.evaluate_later(effect);
        child
    }

    /// Interprets from `instruction` until the driver suspends, yields or
    /// completes.
    pub(crate) fn evaluate_now(self: &Arc<Self>, instruction: Instruction) {
        let Some(mut context) = self.context.lock().take() else {
            error!(fiber = %self.id, "execution context missing, evaluation dropped");
            return;
        };
        let mut current = if self.state.lock().is_done() {
            trace!(fiber = %self.id, "evaluation of a finished fiber ignored");
            None
        } else {
            Some(instruction)
        };
        let mut operations = 0;
        while let Some(instruction) = current.take() {
            if operations == self.yield_op_count {
                trace!(
                    fiber = %self.id,
                    operations,
                    next = instruction.tag(),
                    "operation budget spent, yielding"
                );
                self.evaluate_later(instruction);
                break;
            }
            operations += 1;
            let instruction = self.deliver_interruption(&context, instruction);
            current = match panic::catch_unwind(AssertUnwindSafe(|| {
                self.step(&mut context, instruction)
            })) {
                Ok(next) => next,
                Err(payload) => {
                    let defect = Defect::from_panic(payload);
                    debug!(fiber = %self.id, defect = %defect, "defect raised");
                    self.set_interrupting(true);
                    Some(Instruction::Fail(Cause::die(defect)))
                }
            };
        }
        *self.context.lock() = Some(context);
    }

    fn step(
        self: &Arc<Self>,
        context: &mut ExecutionContext,
        instruction: Instruction,
    ) -> Option<Instruction> {
        match instruction {
            Instruction::Succeed(value) => self.next(context, value),
            Instruction::Total(thunk) => self.next(context, thunk()),
            Instruction::PartialSync { thunk, on_throw } => match run_partial(thunk, on_throw) {
                Ok(value) => self.next(context, value),
                Err(error) => Some(Instruction::Fail(Cause::fail(error))),
            },
            Instruction::Async(register) => self.suspend(context, register),
            Instruction::Suspend(factory) => Some(factory()),
            Instruction::Fail(cause) => self.unwind(context, cause),
            Instruction::Chain {
                effect,
                continuation,
            } => Some(match *effect {
                Instruction::Succeed(value) => continuation(value),
                Instruction::Total(thunk) => continuation(thunk()),
                Instruction::PartialSync { thunk, on_throw } => {
                    match run_partial(thunk, on_throw) {
                        Ok(value) => continuation(value),
                        Err(error) => Instruction::Fail(Cause::fail(error)),
                    }
                }
                effect => {
                    context.frames.push(Frame::Apply(continuation));
                    effect
                }
            }),
            Instruction::Fold {
                effect,
                on_failure,
                on_success,
            } => {
                context.frames.push(Frame::Fold {
                    on_failure,
                    on_success,
                });
                Some(*effect)
            }
            Instruction::Read(function) => Some(function(context.environment())),
            Instruction::Give {
                effect,
                environment,
            } => {
                context.push_environment(environment);
                context.frames.push(Frame::EnvironmentExit);
                Some(*effect)
            }
            Instruction::Fork { effect, seal, wrap } => {
                let child = self.fork(*effect, seal, context.environment());
                Some(Instruction::Succeed(wrap(child)))
            }
            Instruction::Race {
                left,
                right,
                left_seal,
                right_seal,
                left_wins,
                right_wins,
            } => {
                let environment = context.environment();
                let left = self.fork(*left, left_seal, Arc::clone(&environment));
                let right = self.fork(*right, right_seal, environment);
                Some(coordination::race(self.id, left, right, left_wins, right_wins))
            }
            Instruction::All {
                effects,
                seal,
                collect,
            } => {
                if effects.is_empty() {
                    return Some(collect(Exit::Success(Vec::new())));
                }
                let environment = context.environment();
                let children = effects
                    .into_iter()
                    .map(|effect| self.fork(effect, seal, Arc::clone(&environment)))
                    .collect();
                Some(coordination::collect_all(self.id, children, collect))
            }
            Instruction::InterruptStatus { effect, flag } => {
                context.push_interrupt_status(flag);
                context.frames.push(Frame::InterruptExit);
                Some(*effect)
            }
            Instruction::CheckInterruptible(function) => Some(function(context.interrupt_status())),
            Instruction::Descriptor(function) => Some(function(FiberDescriptor {
                id: self.id,
                interrupt_status: context.interrupt_status(),
                interruptors: self.interruptors(),
            })),
            Instruction::OnInterrupt { effect, cleanup } => {
                Some(Instruction::on_interrupt(*effect, *cleanup))
            }
            Instruction::Yield => {
                trace!(fiber = %self.id, "fiber yielded");
                self.evaluate_later(Instruction::unit());
                None
            }
        }
    }

    /// Feeds `value` to the innermost continuation frame.
    fn next(&self, context: &mut ExecutionContext, value: AnyValue) -> Option<Instruction> {
        loop {
            match context.frames.pop() {
                None => {
                    self.complete(Exit::Success(value));
                    return None;
                }
                Some(Frame::Apply(continuation)) => return Some(continuation(value)),
                Some(Frame::Fold { on_success, .. }) => return Some(on_success(value)),
                Some(Frame::InterruptExit) => context.pop_interrupt_status(),
                Some(Frame::EnvironmentExit) => context.pop_environment(),
            }
        }
    }

    /// Unwinds the frame stack to the nearest failure handler.
    fn unwind(&self, context: &mut ExecutionContext, cause: Cause<AnyValue>) -> Option<Instruction> {
        let mut discarded = false;
        let handler = loop {
            match context.frames.pop() {
                None => break None,
                Some(Frame::Apply(_)) => {}
                Some(Frame::InterruptExit) => context.pop_interrupt_status(),
                Some(Frame::EnvironmentExit) => context.pop_environment(),
                Some(Frame::Fold { on_failure, .. }) => {
                    if self.is_interrupted() && context.is_interruptible() {
                        discarded = true;
                    } else {
                        break Some(on_failure);
                    }
                }
            }
        };
        let cause = if discarded {
            cause.strip_failures()
        } else {
            cause
        };
        match handler {
            Some(on_failure) => {
                self.set_interrupting(false);
                Some(on_failure(cause))
            }
            None => {
                let cause = self.merge_interruption(cause);
                self.set_interrupting(true);
                self.complete(Exit::Failure(cause));
                None
            }
        }
    }

    /// Adds the accumulated interruption to `cause` unless it already
    /// records every interruptor.
    fn merge_interruption(&self, cause: Cause<AnyValue>) -> Cause<AnyValue> {
        let interrupted = match &*self.state.lock() {
            AsyncState::Executing { interrupted, .. } => interrupted.clone(),
            AsyncState::Done(_) => Cause::Empty,
        };
        if cause.covers_interruptors(&interrupted) {
            cause
        } else {
            Cause::then(cause, interrupted.widen())
        }
    }

    /// Replaces `instruction` with a halt when an interruption is pending and
    /// may be delivered now.
    fn deliver_interruption(
        &self,
        context: &ExecutionContext,
        instruction: Instruction,
    ) -> Instruction {
        if !self.is_interrupted()
            || !instruction.is_interruption_point()
            || !context.is_interruptible()
        {
            return instruction;
        }
        let Some(pending) = self.begin_interruption() else {
            return instruction;
        };
        debug!(fiber = %self.id, replaced = instruction.tag(), "interruption delivered");
        match instruction {
            Instruction::Fail(cause) => Instruction::Fail(Cause::then(cause, pending.widen())),
            _ => Instruction::Fail(pending.widen()),
        }
    }

    /// Marks the driver as interrupting, returning the pending interruption
    /// unless it is already being delivered.
    fn begin_interruption(&self) -> Option<Cause<Infallible>> {
        let mut state = self.state.lock();
        let AsyncState::Executing {
            status,
            interrupted,
            ..
        } = &mut *state
        else {
            return None;
        };
        if interrupted.is_empty() || status.is_interrupting() {
            return None;
        }
        *status = mem::replace(status, AsyncStatus::Done).with_interrupting(true);
        Some(interrupted.clone())
    }

    fn set_interrupting(&self, interrupting: bool) {
        if let AsyncState::Executing { status, .. } = &mut *self.state.lock() {
            *status = mem::replace(status, AsyncStatus::Done).with_interrupting(interrupting);
        }
    }

    fn suspend(
        self: &Arc<Self>,
        context: &mut ExecutionContext,
        register: Registration,
    ) -> Option<Instruction> {
        let epoch = context.next_epoch();
        if let Err(pending) = self.enter_async(epoch, context.is_interruptible()) {
            return Some(Instruction::Fail(pending.widen()));
        }
        debug!(fiber = %self.id, epoch, "fiber suspended");
        let resume = Resume {
            anchor: self.anchor(),
            epoch,
        };
        match panic::catch_unwind(AssertUnwindSafe(|| register(resume))) {
            Ok(Some(instruction)) if self.exit_async(epoch) => Some(instruction),
            Ok(_) => None,
            Err(payload) => self
                .exit_async(epoch)
                .then(|| Instruction::Fail(Cause::die(Defect::from_panic(payload)))),
        }
    }

    /// Moves the driver into `Suspended` for `epoch`.
    ///
    /// Fails with the pending interruption when it must be delivered instead.
    fn enter_async(&self, epoch: u64, interruptible: bool) -> Result<(), Cause<Infallible>> {
        let mut state = self.state.lock();
        let AsyncState::Executing {
            status,
            interrupted,
            ..
        } = &mut *state
        else {
            return Ok(());
        };
        let interrupting = status.is_interrupting();
        if interruptible && !interrupting && !interrupted.is_empty() {
            *status = mem::replace(status, AsyncStatus::Done).with_interrupting(true);
            return Err(interrupted.clone());
        }
        let previous = mem::replace(status, AsyncStatus::Done);
        *status = AsyncStatus::Suspended {
            previous: Box::new(previous),
            interruptible: interruptible && !interrupting,
            epoch,
        };
        Ok(())
    }

    /// Ends the suspension identified by `epoch`, restoring the status it
    /// replaced. Returns `false` when that suspension is no longer current.
    fn exit_async(&self, epoch: u64) -> bool {
        let mut state = self.state.lock();
        let AsyncState::Executing { status, .. } = &mut *state else {
            return false;
        };
        match mem::replace(status, AsyncStatus::Done) {
            AsyncStatus::Suspended {
                previous,
                epoch: current,
                ..
            } if current == epoch => {
                *status = *previous;
                true
            }
            unchanged => {
                *status = unchanged;
                false
            }
        }
    }

    fn complete(&self, exit: ErasedExit) {
        {
            let mut state = self.state.lock();
            let AsyncState::Executing { status, .. } = &mut *state else {
                warn!(fiber = %self.id, "fiber completed twice, later exit dropped");
                return;
            };
            *status = AsyncStatus::Finishing {
                interrupting: status.is_interrupting(),
            };
        }
        let sealed = self.seal.exit(exit);
        let observers = {
            let mut state = self.state.lock();
            match mem::replace(&mut *state, AsyncState::Done(sealed.clone())) {
                AsyncState::Executing { observers, .. } => observers,
                done @ AsyncState::Done(_) => {
                    *state = done;
                    warn!(fiber = %self.id, "fiber completed twice, later exit dropped");
                    return;
                }
            }
        };
        self.waiters.lock().clear();
        let anchor = self.anchor.lock().upgrade();
        if let Some(anchor) = anchor {
            anchor.waiters.lock().clear();
        }
        debug!(fiber = %self.id, outcome = outcome(&sealed), observers = observers.len(), "fiber completed");
        for observer in observers {
            observer(sealed.clone());
        }
    }
}

fn run_partial(
    thunk: Box<dyn FnOnce() -> AnyValue + Send>,
    on_throw: Box<dyn FnOnce(Defect) -> AnyValue + Send>,
) -> Result<AnyValue, AnyValue> {
    panic::catch_unwind(AssertUnwindSafe(thunk))
        .map_err(|payload| on_throw(Defect::from_panic(payload)))
}

fn outcome(exit: &SharedExit) -> &'static str {
    match exit {
        Exit::Success(_) => "success",
        Exit::Failure(cause) if cause.interrupted_only() => "interrupted",
        Exit::Failure(_) => "failure",
    }
}
