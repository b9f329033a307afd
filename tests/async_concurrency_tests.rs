#![cfg(feature = "effect")]
//! Integration tests for fibers, races and parallel composition.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use effect_fiber::control::Either;
use effect_fiber::effect::{Async, AsyncStatus, Cause, Exit, IO, Resolve, Runtime};
use futures::executor::block_on;
use rstest::rstest;

fn run<A>(effect: IO<String, A>) -> Exit<String, A>
where
    A: Clone + Send + Sync + 'static,
{
    block_on(Runtime::default().run_promise_exit(effect))
}

fn counted_never<A>() -> (Arc<AtomicUsize>, IO<String, A>)
where
    A: Send + 'static,
{
    let count = Arc::new(AtomicUsize::new(0));
    let handle = Arc::clone(&count);
    let effect = IO::<String, A>::never().on_interrupt(Async::total(move || {
        handle.fetch_add(1, Ordering::SeqCst);
    }));
    (count, effect)
}

// =============================================================================
// Fork and Join
// =============================================================================

#[rstest]
fn test_join_returns_the_child_exit() {
    let effect: IO<String, i32> = IO::<String, i32>::fail("child".to_string())
        .fork()
        .flat_map(|fiber| fiber.join());
    assert_eq!(run(effect), Exit::fail("child".to_string()));
}

#[rstest]
fn test_await_exit_never_fails() {
    let effect: IO<String, Exit<String, i32>> = IO::<String, i32>::fail("child".to_string())
        .fork()
        .flat_map(|fiber| fiber.await_exit());
    assert_eq!(run(effect), Exit::Success(Exit::fail("child".to_string())));
}

#[rstest]
fn test_joined_fiber_reports_done() {
    let effect: IO<String, (Option<Exit<String, i32>>, bool)> = IO::<String, i32>::succeed(1)
        .fork()
        .flat_map(|fiber| {
            fiber
                .join()
                .flat_map(move |_| {
                    Async::total(move || (fiber.poll(), fiber.status() == AsyncStatus::Done))
                })
        });
    assert_eq!(run(effect), Exit::Success((Some(Exit::Success(1)), true)));
}

#[rstest]
fn test_forked_fibers_have_distinct_ids() {
    let effect: IO<String, bool> = Async::fiber_id().flat_map(|parent| {
        IO::<String, i32>::succeed(0)
            .fork()
            .fmap(move |fiber| fiber.id() != parent)
    });
    assert_eq!(run(effect), Exit::Success(true));
}

#[rstest]
fn test_interrupt_then_join_is_interrupted() {
    let effect: IO<String, i32> = IO::<String, i32>::never()
        .fork()
        .flat_map(|fiber| fiber.interrupt().then(fiber.join()));
    assert!(run(effect).is_interrupted());
}

// =============================================================================
// Race
// =============================================================================

#[rstest]
fn test_race_winner_interrupts_the_loser() {
    let (interruptions, loser) = counted_never();
    let effect: IO<String, i32> = Async::succeed(1).race(loser);
    assert_eq!(run(effect), Exit::Success(1));
    assert_eq!(interruptions.load(Ordering::SeqCst), 1);
}

#[rstest]
fn test_race_ignores_late_resolutions_of_the_loser() {
    let slot: Arc<Mutex<Option<Resolve<(), String, i32>>>> = Arc::new(Mutex::new(None));
    let registered = Arc::clone(&slot);
    let loser = IO::<String, i32>::effect_async(move |resolve| {
        if let Ok(mut slot) = registered.lock() {
            *slot = Some(resolve);
        }
    });
    let runtime = Runtime::default();
    let future = runtime.run_promise_exit(Async::succeed(7).race(loser));
    runtime.run_until_idle();

    let resolve = slot.lock().ok().and_then(|mut slot| slot.take());
    if let Some(resolve) = resolve {
        resolve.succeed(100);
        resolve.succeed(200);
        resolve.fail("late".to_string());
    }
    assert_eq!(block_on(future), Exit::Success(7));
}

#[rstest]
fn test_race_falls_back_to_the_slower_success() {
    let effect: IO<String, i32> = IO::<String, i32>::fail("fast".to_string())
        .race(IO::<String, ()>::yield_now().as_value(2));
    assert_eq!(run(effect), Exit::Success(2));
}

#[rstest]
#[case(true, Either::Left(1))]
#[case(false, Either::Right("right"))]
fn test_race_either_tags_the_winner(
    #[case] left_first: bool,
    #[case] expected: Either<i32, &'static str>,
) {
    let left: IO<String, i32> = if left_first {
        Async::succeed(1)
    } else {
        Async::never()
    };
    let right: IO<String, &'static str> = if left_first {
        Async::never()
    } else {
        Async::succeed("right")
    };
    assert_eq!(run(left.race_either(right)), Exit::Success(expected));
}

#[rstest]
fn test_interrupting_a_race_interrupts_both_sides() {
    let (left_count, left) = counted_never::<i32>();
    let (right_count, right) = counted_never::<i32>();
    let runtime = Runtime::default();
    let (future, canceler) = runtime.run_promise_exit_interrupt(left.race(right));
    runtime.run_until_idle();
    canceler.cancel();
    assert!(block_on(future).is_interrupted());
    assert_eq!(left_count.load(Ordering::SeqCst), 1);
    assert_eq!(right_count.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Parallel Composition
// =============================================================================

#[rstest]
fn test_collect_all_par_preserves_input_order() {
    let effects = (0..8).map(|n| {
        if n % 2 == 0 {
            IO::<String, i32>::succeed(n)
        } else {
            IO::<String, ()>::yield_now().as_value(n)
        }
    });
    assert_eq!(
        run(Async::collect_all_par(effects)),
        Exit::Success((0..8).collect::<Vec<i32>>())
    );
}

#[rstest]
fn test_collect_all_par_combines_failures_in_order() {
    let effects = vec![
        IO::<String, i32>::succeed(1),
        IO::<String, i32>::fail("a".to_string()),
        IO::<String, i32>::fail("b".to_string()),
    ];
    assert_eq!(
        run(Async::collect_all_par(effects)),
        Exit::halt(Cause::both(
            Cause::fail("a".to_string()),
            Cause::fail("b".to_string())
        ))
    );
}

#[rstest]
fn test_interrupting_collect_all_par_interrupts_every_child() {
    let (first_count, first) = counted_never::<i32>();
    let (second_count, second) = counted_never::<i32>();
    let runtime = Runtime::default();
    let (future, canceler) =
        runtime.run_promise_exit_interrupt(Async::collect_all_par(vec![first, second]));
    runtime.run_until_idle();
    canceler.cancel();
    assert!(block_on(future).is_interrupted());
    assert_eq!(first_count.load(Ordering::SeqCst), 1);
    assert_eq!(second_count.load(Ordering::SeqCst), 1);
}

#[rstest]
fn test_zip_par_pairs_both_values() {
    let effect: IO<String, (i32, &'static str)> =
        Async::succeed(1).zip_par(IO::<String, ()>::yield_now().as_value("two"));
    assert_eq!(run(effect), Exit::Success((1, "two")));
}

#[rstest]
fn test_zip_with_par_failure_interrupts_the_other_side() {
    let (interruptions, other) = counted_never::<i32>();
    let effect: IO<String, i32> =
        IO::<String, i32>::fail("boom".to_string()).zip_with_par(other, |left, right| left + right);
    assert_eq!(run(effect), Exit::fail("boom".to_string()));
    assert_eq!(interruptions.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Host Timers and Futures
// =============================================================================

#[cfg(feature = "host")]
mod host {
    use super::*;
    use effect_fiber::effect::{Defect, RuntimeError};
    use std::time::Duration;

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn test_interrupting_a_sleeping_child_then_joining_is_interrupted() {
        let effect: IO<String, ()> = IO::<String, ()>::sleep(Duration::from_secs(1000))
            .fork()
            .flat_map(|fiber| fiber.interrupt().then(fiber.join()));
        let exit = Runtime::default().run_promise_exit(effect).await;
        assert!(exit.is_interrupted());
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn test_sleep_waits_for_the_duration() {
        let start = tokio::time::Instant::now();
        let effect: IO<String, i32> =
            IO::<String, ()>::sleep(Duration::from_secs(30)).as_value(1);
        assert_eq!(Runtime::default().run_promise_exit(effect).await, Exit::Success(1));
        assert!(start.elapsed() >= Duration::from_secs(30));
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn test_timeout_expires_for_a_never_ending_effect() {
        let (interruptions, slow) = counted_never::<i32>();
        let effect = slow.timeout(Duration::from_secs(5));
        assert_eq!(Runtime::default().run_promise_exit(effect).await, Exit::Success(None));
        assert_eq!(interruptions.load(Ordering::SeqCst), 1);
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn test_timeout_keeps_a_fast_value() {
        let effect = IO::<String, i32>::succeed(3).timeout(Duration::from_secs(5));
        assert_eq!(Runtime::default().run_promise_exit(effect).await, Exit::Success(Some(3)));
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn test_timeout_keeps_a_fast_failure() {
        let start = tokio::time::Instant::now();
        let effect = IO::<String, i32>::fail("boom".to_string()).timeout(Duration::from_secs(10));
        assert_eq!(
            Runtime::default().run_promise_exit(effect).await,
            Exit::fail("boom".to_string())
        );
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn test_timeout_keeps_a_failure_raised_before_the_deadline() {
        let effect = IO::<String, ()>::sleep(Duration::from_secs(1))
            .then(IO::<String, i32>::fail("late".to_string()))
            .timeout(Duration::from_secs(10));
        assert_eq!(
            Runtime::default().run_promise_exit(effect).await,
            Exit::fail("late".to_string())
        );
    }

    #[rstest]
    #[tokio::test]
    async fn test_from_future_maps_results() {
        let ok: IO<String, i32> = Async::from_future(async { Ok(1) });
        let err: IO<String, i32> = Async::from_future(async { Err("no".to_string()) });
        assert_eq!(Runtime::default().run_promise_exit(ok).await, Exit::Success(1));
        assert_eq!(
            Runtime::default().run_promise_exit(err).await,
            Exit::fail("no".to_string())
        );
    }

    async fn explode() -> Result<i32, String> {
        panic!("inside future")
    }

    #[rstest]
    #[tokio::test]
    async fn test_from_future_panic_becomes_a_defect() {
        let effect: IO<String, i32> = Async::from_future(explode());
        let exit = Runtime::default().run_promise_exit(effect).await;
        let defects = exit.cause().map(Cause::defects).unwrap_or_default();
        assert_eq!(defects, vec![Defect::new("inside future")]);
        assert!(
            defects
                .iter()
                .all(|defect| defect.downcast_ref::<RuntimeError>().is_none())
        );
    }

    #[rstest]
    fn test_run_blocking_exit_outside_a_runtime() {
        let effect: IO<String, i32> = IO::<String, ()>::sleep(Duration::from_millis(5)).as_value(8);
        assert_eq!(Runtime::default().run_blocking_exit(effect), Ok(Exit::Success(8)));
    }
}
