//! Waiting on several child drivers at once.
//!
//! Both protocols register observers on already forked children and suspend
//! the parent with a single `Async` instruction. The first observer (or the
//! synchronous fast path, when a child is already done) that completes the
//! protocol produces the continuation; every later arrival is ignored. If the
//! waiting parent is interrupted, every child is interrupted on its behalf.
//!
//! The parent owns its children through the interruption cleanup. Observers
//! only hold the parent and the other contender weakly, so a parent whose
//! children can never finish is dropped together with them.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::{Driver, Resume};
use crate::effect::instruction::{Collect, Instruction, RaceContinuation, SharedExit, erase};
use crate::effect::{Exit, FiberId};

#[derive(Clone, Copy)]
enum Side {
    Left,
    Right,
}

/// Single-winner guard of a race.
struct RaceCoordinator {
    decided: AtomicBool,
    left_wins: Mutex<Option<RaceContinuation>>,
    right_wins: Mutex<Option<RaceContinuation>>,
}

impl RaceCoordinator {
    fn decide(&self, side: Side, exit: SharedExit, loser: Arc<Driver>) -> Option<Instruction> {
        if self
            .decided
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        let slot = match side {
            Side::Left => &self.left_wins,
            Side::Right => &self.right_wins,
        };
        let continuation = slot.lock().take()?;
        Some(Instruction::Suspend(Box::new(move || {
            continuation(exit, loser)
        })))
    }
}

fn observe_side(
    coordinator: &Arc<RaceCoordinator>,
    side: Side,
    contender: &Arc<Driver>,
    other: &Arc<Driver>,
    resume: &Resume,
) -> Option<Instruction> {
    let observer_coordinator = Arc::clone(coordinator);
    let observer_loser: Weak<Driver> = Arc::downgrade(other);
    let observer_resume = resume.downgrade();
    let exit = contender.observe_for(
        resume,
        Box::new(move |exit| {
            let Some(loser) = observer_loser.upgrade() else {
                return;
            };
            if let Some(instruction) = observer_coordinator.decide(side, exit, loser) {
                observer_resume.resume(instruction);
            }
        }),
    )?;
    coordinator.decide(side, exit, Arc::clone(other))
}

/// Waits for the first of `left` and `right` to finish.
///
/// The left side is observed first, so when both are already done the left
/// side wins.
pub(super) fn race(
    parent: FiberId,
    left: Arc<Driver>,
    right: Arc<Driver>,
    left_wins: RaceContinuation,
    right_wins: RaceContinuation,
) -> Instruction {
    let coordinator = Arc::new(RaceCoordinator {
        decided: AtomicBool::new(false),
        left_wins: Mutex::new(Some(left_wins)),
        right_wins: Mutex::new(Some(right_wins)),
    });
    let contenders = [Arc::clone(&left), Arc::clone(&right)];
    let wait = Instruction::Async(Box::new(move |resume| {
        observe_side(&coordinator, Side::Left, &left, &right, &resume)
            .or_else(|| observe_side(&coordinator, Side::Right, &right, &left, &resume))
    }));
    Instruction::OnInterrupt {
        effect: Box::new(wait),
        cleanup: Box::new(interrupt_all(parent, contenders.into())),
    }
}

/// Index-ordered collection of child exits.
struct CompletionLatch {
    remaining: AtomicUsize,
    exits: Mutex<Vec<Option<SharedExit>>>,
    collect: Mutex<Option<Collect>>,
}

impl CompletionLatch {
    fn arrive(&self, index: usize, exit: SharedExit) -> Option<Instruction> {
        if let Some(slot) = self.exits.lock().get_mut(index) {
            *slot = Some(exit);
        }
        if self.remaining.fetch_sub(1, Ordering::AcqRel) != 1 {
            return None;
        }
        let exits = std::mem::take(&mut *self.exits.lock());
        let collect = self.collect.lock().take()?;
        let exit = Exit::collect_all_par(exits.into_iter().flatten());
        Some(Instruction::Suspend(Box::new(move || collect(exit))))
    }
}

/// Waits for every child, then hands their exits to `collect`.
pub(super) fn collect_all(parent: FiberId, children: Vec<Arc<Driver>>, collect: Collect) -> Instruction {
    let latch = Arc::new(CompletionLatch {
        remaining: AtomicUsize::new(children.len()),
        exits: Mutex::new(vec![None; children.len()]),
        collect: Mutex::new(Some(collect)),
    });
    let observed = children.clone();
    let wait = Instruction::Async(Box::new(move |resume| {
        for (index, child) in observed.iter().enumerate() {
            let observer_latch = Arc::clone(&latch);
            let observer_resume = resume.downgrade();
            let exit = child.observe_for(
                &resume,
                Box::new(move |exit| {
                    if let Some(instruction) = observer_latch.arrive(index, exit) {
                        observer_resume.resume(instruction);
                    }
                }),
            );
            if let Some(instruction) = exit.and_then(|exit| latch.arrive(index, exit)) {
                return Some(instruction);
            }
        }
        None
    }));
    Instruction::OnInterrupt {
        effect: Box::new(wait),
        cleanup: Box::new(interrupt_all(parent, children)),
    }
}

fn interrupt_all(parent: FiberId, children: Vec<Arc<Driver>>) -> Instruction {
    Instruction::Total(Box::new(move || {
        for child in &children {
            child.interrupt_as(parent);
        }
        erase(())
    }))
}
