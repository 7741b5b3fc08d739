// ============================================================================
// File: packages/gridplane/src/async_task.rs
// ----------------------------------------------------------------------------
// Task handle alias and builder used by every asynchronous service method.
// ============================================================================

use std::future::Future;

/// Handle to a spawned unit of work
pub type AsyncTask<T> = tokio::task::JoinHandle<T>;

/// Wraps a future so that it can be spawned onto the runtime
pub struct AsyncTaskBuilder<F> {
    future: F,
}

impl<F> AsyncTaskBuilder<F>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    pub fn new(future: F) -> Self {
        Self { future }
    }

    /// Spawn the wrapped future on the current tokio runtime
    pub fn spawn(self) -> AsyncTask<F::Output> {
        tokio::spawn(self.future)
    }
}
