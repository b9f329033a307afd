#![cfg(feature = "effect")]
//! Integration tests for the Async interpreter.
//!
//! Covers stack safety of deep chains, failure propagation and recovery,
//! environments, synchronous side effects, callback registration and
//! cooperative yielding.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use effect_fiber::effect::{
    Async, Cause, Defect, Exit, FiberDescriptor, FiberId, IO, InterruptStatus, Runtime,
    RuntimeConfig, RuntimeError,
};
use futures::executor::block_on;
use rstest::rstest;

fn run<E, A>(effect: IO<E, A>) -> Exit<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
{
    block_on(Runtime::default().run_promise_exit(effect))
}

// =============================================================================
// Stack Safety
// =============================================================================

#[rstest]
fn test_deep_left_nested_flat_map_chain() {
    let mut effect: IO<String, u64> = Async::succeed(0);
    for _ in 0..100_000 {
        effect = effect.flat_map(|n| Async::succeed(n + 1));
    }
    assert_eq!(run(effect), Exit::Success(100_000));
}

#[rstest]
fn test_deep_fmap_chain_over_total() {
    let mut effect: IO<String, u64> = Async::total(|| 0);
    for _ in 0..50_000 {
        effect = effect.fmap(|n| n + 2);
    }
    assert_eq!(run(effect), Exit::Success(100_000));
}

fn count_down(remaining: u64) -> IO<String, u64> {
    Async::suspend(move || {
        if remaining == 0 {
            Async::succeed(0)
        } else {
            count_down(remaining - 1).fmap(|n| n + 1)
        }
    })
}

#[rstest]
fn test_deep_right_nested_recursion() {
    assert_eq!(run(count_down(50_000)), Exit::Success(50_000));
}

#[rstest]
#[case(1)]
#[case(7)]
#[case(2048)]
fn test_deep_chain_completes_for_any_yield_budget(#[case] yield_op_count: usize) {
    let runtime = Runtime::new(RuntimeConfig::default().with_yield_op_count(yield_op_count));
    let mut effect: IO<String, u64> = Async::succeed(0);
    for _ in 0..10_000 {
        effect = effect.flat_map(|n| Async::succeed(n + 1));
    }
    assert_eq!(block_on(runtime.run_promise_exit(effect)), Exit::Success(10_000));
}

// =============================================================================
// Scenarios
// =============================================================================

#[rstest]
fn test_succeed_then_increment() {
    let effect: IO<String, i32> = Async::succeed(1).flat_map(|n| Async::succeed(n + 1));
    assert_eq!(run(effect), Exit::Success(2));
}

#[rstest]
fn test_building_an_effect_runs_nothing() {
    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);
    let effect: IO<String, ()> = Async::total(move || flag.store(true, Ordering::SeqCst));
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(run(effect), Exit::Success(()));
    assert!(ran.load(Ordering::SeqCst));
}

// =============================================================================
// Failure Propagation
// =============================================================================

#[rstest]
fn test_fail_resolves_to_failure() {
    let effect: IO<String, i32> = Async::fail("e".to_string());
    assert_eq!(run(effect), Exit::Failure(Cause::Fail("e".to_string())));
}

#[rstest]
fn test_fold_recovers_from_failure() {
    let effect: IO<String, usize> =
        Async::<(), String, usize>::fail("four".to_string()).fold(|error| error.len(), |n| n);
    assert_eq!(run(effect), Exit::Success(4));
}

#[rstest]
fn test_failure_skips_pending_continuations() {
    let reached = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&reached);
    let effect: IO<String, i32> = Async::fail("stop".to_string())
        .flat_map(move |n: i32| Async::total(move || flag.store(true, Ordering::SeqCst)).as_value(n))
        .catch_all(|_| Async::succeed(0));
    assert_eq!(run(effect), Exit::Success(0));
    assert!(!reached.load(Ordering::SeqCst));
}

#[rstest]
fn test_catch_all_cause_sees_the_whole_cause() {
    let effect: IO<String, bool> = Async::<(), String, bool>::die(Defect::new("bug"))
        .catch_all_cause(|cause| Async::succeed(cause.died()));
    assert_eq!(run(effect), Exit::Success(true));
}

#[rstest]
fn test_result_never_fails() {
    let effect: IO<String, Exit<String, i32>> =
        Async::<(), String, i32>::fail("x".to_string()).result();
    assert_eq!(run(effect), Exit::Success(Exit::fail("x".to_string())));
}

#[rstest]
fn test_panic_in_total_becomes_a_defect() {
    let effect: IO<String, i32> = Async::total(|| panic!("kaboom"));
    let exit = run(effect);
    let defects = exit.cause().map(Cause::defects).unwrap_or_default();
    assert_eq!(defects.len(), 1);
    assert_eq!(defects[0].message(), "kaboom");
}

#[rstest]
fn test_partial_maps_panics_to_typed_failures() {
    let effect: IO<String, i32> = Async::partial(|| panic!("bad input"), |defect| defect.message());
    assert_eq!(run(effect), Exit::fail("bad input".to_string()));
}

#[rstest]
fn test_attempt_lifts_results() {
    let ok: IO<String, i32> = Async::attempt(|| Ok(1));
    let err: IO<String, i32> = Async::attempt(|| Err("no".to_string()));
    assert_eq!(run(ok), Exit::Success(1));
    assert_eq!(run(err), Exit::fail("no".to_string()));
}

// =============================================================================
// Environment
// =============================================================================

#[derive(Clone)]
struct Settings {
    greeting: &'static str,
}

#[rstest]
fn test_give_all_provides_the_environment() {
    let effect: IO<String, String> = Async::<Settings, String, String>::access(|settings| {
        format!("{}, fiber", settings.greeting)
    })
    .give_all(Settings { greeting: "hello" });
    assert_eq!(run(effect), Exit::Success("hello, fiber".to_string()));
}

#[rstest]
fn test_inner_environment_is_removed_after_its_region() {
    let inner: Async<Settings, String, &'static str> =
        Async::<u32, String, &'static str>::access(|_| "inner").give_all(7_u32);
    let effect: IO<String, (&'static str, &'static str)> = inner
        .flat_map(|value| Async::access(move |settings: &Settings| (value, settings.greeting)))
        .give_all(Settings { greeting: "outer" });
    assert_eq!(run(effect), Exit::Success(("inner", "outer")));
}

#[rstest]
fn test_environment_returns_a_clone() {
    let effect: IO<String, u32> = Async::<u32, String, u32>::environment().give_all(11_u32);
    assert_eq!(run(effect), Exit::Success(11));
}

#[rstest]
fn test_forked_fibers_inherit_the_environment() {
    let effect: IO<String, u32> = Async::<u32, String, u32>::environment()
        .fork()
        .flat_map(|fiber| fiber.join())
        .give_all(5_u32);
    assert_eq!(run(effect), Exit::Success(5));
}

// =============================================================================
// Callbacks
// =============================================================================

#[rstest]
fn test_effect_async_resolved_from_another_thread() {
    let effect: IO<String, i32> = Async::effect_async(|resolve| {
        std::thread::spawn(move || resolve.succeed(9));
    });
    assert_eq!(run(effect), Exit::Success(9));
}

#[rstest]
fn test_effect_async_option_fast_path() {
    let effect: IO<String, i32> = Async::effect_async_option(|_| Some(Async::succeed(3)));
    assert_eq!(run(effect), Exit::Success(3));
}

#[rstest]
fn test_second_resolution_is_ignored() {
    let continued = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&continued);
    let effect: IO<String, i32> = Async::effect_async(|resolve| {
        resolve.succeed(1);
        resolve.succeed(2);
        resolve.fail("late".to_string());
    })
    .tap(move |_| {
        Async::total(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    });
    assert_eq!(run(effect), Exit::Success(1));
    assert_eq!(continued.load(Ordering::SeqCst), 1);
}

#[rstest]
fn test_resolution_from_a_late_thread_is_ignored() {
    let (sender, receiver) = std::sync::mpsc::channel();
    let effect: IO<String, i32> = Async::effect_async(move |resolve| {
        resolve.succeed(1);
        sender.send(resolve).ok();
    });
    assert_eq!(run(effect), Exit::Success(1));
    let late = receiver.recv().ok();
    if let Some(resolve) = late {
        resolve.succeed(2);
    }
}

fn abandonment<A>(exit: &Exit<String, A>) -> Option<RuntimeError> {
    exit.cause()
        .and_then(|cause| cause.defects().into_iter().next())
        .and_then(|defect| defect.downcast_ref::<RuntimeError>().cloned())
}

#[rstest]
fn test_never_resolved_root_is_abandoned() {
    let exit = run(IO::<String, i32>::never());
    assert_eq!(abandonment(&exit), Some(RuntimeError::Abandoned));
}

#[rstest]
fn test_root_racing_never_resolved_children_is_abandoned() {
    let exit = run(IO::<String, i32>::never().race(Async::never()));
    assert_eq!(abandonment(&exit), Some(RuntimeError::Abandoned));
}

#[rstest]
#[case(1)]
#[case(3)]
fn test_root_collecting_never_resolved_children_is_abandoned(#[case] width: usize) {
    let exit = run(Async::collect_all_par(
        (0..width).map(|_| IO::<String, i32>::never()),
    ));
    assert_eq!(abandonment(&exit), Some(RuntimeError::Abandoned));
}

#[rstest]
fn test_root_joining_a_never_resolved_child_is_abandoned() {
    let effect: IO<String, i32> = IO::<String, i32>::never()
        .fork()
        .flat_map(|fiber| fiber.join());
    assert_eq!(abandonment(&run(effect)), Some(RuntimeError::Abandoned));
}

#[rstest]
fn test_child_waiting_on_a_pending_callback_keeps_the_root_alive() {
    let (sender, receiver) = std::sync::mpsc::channel();
    let pending: IO<String, i32> = Async::effect_async(move |resolve| {
        sender.send(resolve).ok();
    });
    let runtime = Runtime::default();
    let future = runtime.run_promise_exit(pending.race(Async::never()));
    runtime.run_until_idle();
    if let Ok(resolve) = receiver.recv() {
        resolve.succeed(5);
    }
    assert_eq!(block_on(future), Exit::Success(5));
}

// =============================================================================
// Cooperative Scheduling
// =============================================================================

fn wait_for(flag: Arc<AtomicBool>, remaining: usize) -> IO<String, bool> {
    Async::suspend(move || {
        if flag.load(Ordering::SeqCst) || remaining == 0 {
            Async::succeed(flag.load(Ordering::SeqCst))
        } else {
            Async::yield_now().then(wait_for(flag, remaining - 1))
        }
    })
}

#[rstest]
fn test_yield_now_lets_siblings_run() {
    let flag = Arc::new(AtomicBool::new(false));
    let setter = Arc::clone(&flag);
    let child: IO<String, ()> = Async::total(move || setter.store(true, Ordering::SeqCst));
    let effect = child.fork().then(wait_for(flag, 100));
    assert_eq!(run(effect), Exit::Success(true));
}

#[rstest]
fn test_operation_budget_lets_siblings_run() {
    let runtime = Runtime::new(RuntimeConfig::default().with_yield_op_count(16));
    let flag = Arc::new(AtomicBool::new(false));
    let setter = Arc::clone(&flag);
    let observer = Arc::clone(&flag);
    let child: IO<String, ()> = Async::total(move || setter.store(true, Ordering::SeqCst));
    let mut busy: IO<String, u64> = Async::succeed(0);
    for _ in 0..1_000 {
        busy = busy.flat_map(|n| Async::succeed(n + 1));
    }
    let effect = child
        .fork()
        .then(busy)
        .flat_map(move |_| Async::total(move || observer.load(Ordering::SeqCst)));
    assert_eq!(block_on(runtime.run_promise_exit(effect)), Exit::Success(true));
}

// =============================================================================
// Descriptor
// =============================================================================

#[rstest]
fn test_descriptor_reports_the_running_fiber() {
    let effect: IO<String, (bool, InterruptStatus)> = Async::descriptor()
        .fmap(|descriptor| (descriptor.id != FiberId::NONE, descriptor.interrupt_status));
    assert_eq!(
        run(effect),
        Exit::Success((true, InterruptStatus::Interruptible))
    );
}

#[rstest]
fn test_fiber_id_matches_the_descriptor() {
    let effect: IO<String, bool> = Async::fiber_id()
        .zip_with(Async::descriptor(), |id: FiberId, descriptor: FiberDescriptor| {
        id == descriptor.id
    });
    assert_eq!(run(effect), Exit::Success(true));
}
