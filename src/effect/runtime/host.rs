//! Sharing of the tokio host runtime.
//!
//! Host combinators such as [`Async::sleep`](crate::effect::Async::sleep)
//! spawn their futures on the runtime returned by [`handle`]: the runtime the
//! caller is already running on, or a lazily built global multi-thread
//! runtime otherwise. The global runtime is created once and never dropped.
//!
//! When called from inside a runtime, [`handle`] prefers the current runtime
//! so that its tracing context and timer settings (including paused test
//! time) are inherited.

use std::cell::RefCell;
use std::future::Future;
use std::sync::LazyLock;

use tokio::runtime::{Builder, Handle, Runtime, RuntimeFlavor};
use tracing::debug;

use crate::effect::BlockingError;

static GLOBAL_RUNTIME: LazyLock<Runtime> = LazyLock::new(|| {
    debug!(workers = num_cpus::get(), "building global host runtime");
    Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .enable_all()
        .build()
        .expect("Failed to create global tokio runtime")
});

/// Returns the global host runtime, building it on first use.
#[inline]
#[must_use]
pub fn global() -> &'static Runtime {
    &GLOBAL_RUNTIME
}

thread_local! {
    static CACHED_HANDLE: RefCell<Option<Handle>> = const { RefCell::new(None) };
}

/// Returns a handle to the current runtime, or to the global one when the
/// caller runs outside any tokio runtime.
#[inline]
#[must_use]
pub fn handle() -> Handle {
    if let Ok(current_handle) = Handle::try_current() {
        return current_handle;
    }
    CACHED_HANDLE.with(|cached| {
        cached
            .borrow_mut()
            .get_or_insert_with(|| global().handle().clone())
            .clone()
    })
}

/// Blocks the current thread on `future`.
///
/// - Inside a multi-thread runtime the future runs under `block_in_place`
///   on the current runtime.
/// - Outside any runtime it runs on the global runtime.
///
/// # Errors
///
/// Returns `BlockingError::CurrentThreadRuntime` when called from within a
/// current-thread runtime, and `BlockingError::UnsupportedRuntimeFlavor` for
/// any other flavor that cannot block in place.
#[inline]
pub fn try_run_blocking<F, T>(future: F) -> Result<T, BlockingError>
where
    F: Future<Output = T>,
{
    let Ok(current_handle) = Handle::try_current() else {
        return Ok(global().block_on(future));
    };
    match current_handle.runtime_flavor() {
        RuntimeFlavor::MultiThread => Ok(tokio::task::block_in_place(|| {
            current_handle.block_on(future)
        })),
        RuntimeFlavor::CurrentThread => Err(BlockingError::CurrentThreadRuntime),
        _ => Err(BlockingError::UnsupportedRuntimeFlavor),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::ptr;

    #[rstest]
    fn global_returns_same_instance() {
        assert!(ptr::eq(global(), global()));
    }

    #[rstest]
    fn handle_works_from_outside_runtime() {
        assert_eq!(handle().block_on(async { 42 }), 42);
    }

    #[rstest]
    #[tokio::test]
    async fn handle_prefers_the_current_runtime() {
        assert_eq!(handle().runtime_flavor(), RuntimeFlavor::CurrentThread);
    }

    #[rstest]
    fn try_run_blocking_from_outside_runtime() {
        assert_eq!(try_run_blocking(async { 42 }), Ok(42));
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn try_run_blocking_inside_multi_thread_runtime() {
        let result = tokio::task::spawn_blocking(|| try_run_blocking(async { 42 }))
            .await
            .unwrap();
        assert_eq!(result, Ok(42));
    }

    #[rstest]
    #[tokio::test(flavor = "current_thread")]
    async fn try_run_blocking_inside_current_thread_runtime() {
        let result = tokio::task::spawn_blocking(|| try_run_blocking(async { 42 }))
            .await
            .unwrap();
        assert_eq!(result, Err(BlockingError::CurrentThreadRuntime));
    }
}
