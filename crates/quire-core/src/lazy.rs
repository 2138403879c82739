//! Lazy, cancellable, single-flight memoizing cells.
//!
//! [`AsyncLazy`] backs every cached computation in the engine: document
//! trees, text loads, version stamps and checksums.
//!
//! # Guarantees
//!
//! - At most one computation is in flight at a time. Later callers join the
//!   in-flight computation instead of starting their own.
//! - Cancelling one caller only affects that caller. The computation is
//!   cancelled (its token fires and its future is dropped) once every waiter
//!   has gone away.
//! - A successful value is memoized forever and returned to every caller,
//!   including synchronous probes. The first published value wins, so the
//!   synchronous and asynchronous paths never hand out different objects.
//! - Failures, including cancellation, are never memoized. The next caller
//!   starts from scratch.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

type ComputeFuture<T> = BoxFuture<'static, Result<T>>;
type AsyncComputeFn<T> = Arc<dyn Fn(CancellationToken) -> ComputeFuture<T> + Send + Sync>;
type SyncComputeFn<T> = Arc<dyn Fn(&CancellationToken) -> Result<T> + Send + Sync>;

enum LazyState<T> {
    Idle,
    Running {
        attempt: u64,
        computation: WeakShared<ComputeFuture<T>>,
    },
    Done(T),
}

struct LazyInner<T> {
    state: LazyState<T>,
    attempts: u64,
}

enum Join<T> {
    Ready(T),
    Pending(u64, Shared<ComputeFuture<T>>),
}

/// A lazily computed, memoized value with sync and async entry points.
pub struct AsyncLazy<T: Clone + Send + Sync + 'static> {
    inner: Mutex<LazyInner<T>>,
    compute: Option<AsyncComputeFn<T>>,
    compute_sync: Option<SyncComputeFn<T>>,
}

impl<T: Clone + Send + Sync + 'static> AsyncLazy<T> {
    /// Create a cell whose value is produced by an async computation.
    ///
    /// The computation receives a token that fires when every waiter has
    /// been cancelled.
    pub fn new<F, Fut>(compute: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            inner: Mutex::new(LazyInner {
                state: LazyState::Idle,
                attempts: 0,
            }),
            compute: Some(Arc::new(move |token| compute(token).boxed())),
            compute_sync: None,
        }
    }

    /// Create a cell with both an async and a synchronous computation.
    ///
    /// The synchronous one is used by [`get_value`](Self::get_value) so that
    /// synchronous callers never block on an executor.
    pub fn with_sync<F, Fut, S>(compute: F, compute_sync: S) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        S: Fn(&CancellationToken) -> Result<T> + Send + Sync + 'static,
    {
        let mut lazy = Self::new(compute);
        lazy.compute_sync = Some(Arc::new(compute_sync));
        lazy
    }

    /// Create a cell that already holds a value.
    pub fn from_value(value: T) -> Self {
        Self {
            inner: Mutex::new(LazyInner {
                state: LazyState::Done(value),
                attempts: 0,
            }),
            compute: None,
            compute_sync: None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LazyInner<T>> {
        // Critical sections only swap plain enum values; a poisoned lock still
        // holds a consistent state.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the memoized value without waiting or computing.
    pub fn try_get_value(&self) -> Option<T> {
        match &self.lock().state {
            LazyState::Done(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// True if a computation is currently in flight.
    pub fn is_computing(&self) -> bool {
        match &self.lock().state {
            LazyState::Running { computation, .. } => computation.upgrade().is_some(),
            _ => false,
        }
    }

    /// Get the value, computing it if needed.
    pub async fn get_value_async(&self, cancel: &CancellationToken) -> Result<T> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let (attempt, computation) = match self.start_or_join()? {
            Join::Ready(value) => return Ok(value),
            Join::Pending(attempt, computation) => (attempt, computation),
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = computation => result,
        };

        self.complete(attempt, result)
    }

    /// Get the value synchronously, computing it if needed.
    ///
    /// Without a synchronous computation this blocks the current thread on
    /// the shared async computation, so it must not be called from inside an
    /// async task.
    pub fn get_value(&self, cancel: &CancellationToken) -> Result<T> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if let Some(value) = self.try_get_value() {
            return Ok(value);
        }

        match &self.compute_sync {
            Some(compute_sync) => {
                let value = compute_sync(cancel)?;
                Ok(self.publish(value))
            }
            None => futures::executor::block_on(self.get_value_async(cancel)),
        }
    }

    fn start_or_join(&self) -> Result<Join<T>> {
        let mut inner = self.lock();
        match &inner.state {
            LazyState::Done(value) => return Ok(Join::Ready(value.clone())),
            LazyState::Running {
                attempt,
                computation,
            } => {
                if let Some(shared) = computation.upgrade() {
                    return Ok(Join::Pending(*attempt, shared));
                }
            }
            LazyState::Idle => {}
        }

        let Some(compute) = &self.compute else {
            return Err(Error::Unreachable(
                "lazy cell without a computation lost its value".to_string(),
            ));
        };

        inner.attempts += 1;
        let attempt = inner.attempts;
        let token = CancellationToken::new();
        let future = compute(token.clone());
        let guarded: ComputeFuture<T> = async move {
            // Fires the token if the last waiter drops this future.
            let guard = token.drop_guard();
            let result = future.await;
            guard.disarm();
            result
        }
        .boxed();

        let shared = guarded.shared();
        if let Some(weak) = shared.downgrade() {
            inner.state = LazyState::Running {
                attempt,
                computation: weak,
            };
        }

        Ok(Join::Pending(attempt, shared))
    }

    fn complete(&self, attempt: u64, result: Result<T>) -> Result<T> {
        let mut inner = self.lock();
        if let LazyState::Done(existing) = &inner.state {
            return Ok(existing.clone());
        }

        match result {
            Ok(value) => {
                inner.state = LazyState::Done(value.clone());
                Ok(value)
            }
            Err(e) => {
                if let LazyState::Running { attempt: current, .. } = &inner.state {
                    if *current == attempt {
                        inner.state = LazyState::Idle;
                    }
                }
                Err(e)
            }
        }
    }

    fn publish(&self, value: T) -> T {
        let mut inner = self.lock();
        match &inner.state {
            LazyState::Done(existing) => existing.clone(),
            _ => {
                inner.state = LazyState::Done(value.clone());
                value
            }
        }
    }
}

impl<T: Clone + Send + Sync + 'static> fmt::Debug for AsyncLazy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.lock().state {
            LazyState::Idle => "idle",
            LazyState::Running { .. } => "running",
            LazyState::Done(_) => "done",
        };
        f.debug_struct("AsyncLazy").field("state", &state).finish()
    }
}
