//! Private tokio runtime for drivers whose client libraries are async.
//!
//! The store API is synchronous. Async drivers own one of these and drive
//! each call to completion with [`BlockingRuntime::block_on`]. Calling it from
//! inside another tokio runtime is not supported.

use std::future::Future;
use std::sync::Arc;

use anystore_core::error::{Result, StoreError};
use tokio::runtime::{Builder, Runtime};

/// Shared handle to a small multi-thread runtime.
#[derive(Clone)]
pub(crate) struct BlockingRuntime(Arc<Runtime>);

impl BlockingRuntime {
    /// Builds a runtime with timers and I/O enabled.
    pub(crate) fn new(backend: &'static str) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name(format!("anystore-{backend}"))
            .enable_all()
            .build()
            .map_err(|e| StoreError::backend(backend, e))?;
        Ok(Self(Arc::new(runtime)))
    }

    pub(crate) fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.0.block_on(future)
    }

    /// Runs `future` in the background on this runtime.
    #[cfg(feature = "object-store")]
    pub(crate) fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        drop(self.0.spawn(future));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drives_futures_to_completion() {
        let rt = BlockingRuntime::new("test").unwrap();
        assert_eq!(rt.block_on(async { 40 + 2 }), 42);
    }
}
