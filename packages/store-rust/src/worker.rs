//! Threaded producer/consumer runner for per-key jobs.
//!
//! Tasks come from one lazy iterator shared by all consumer threads; each
//! thread folds the tasks it handled into its own accumulator, and the caller
//! merges the accumulators. The first error stops every consumer.

use std::num::NonZeroUsize;
use std::panic;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use anystore_core::error::{Result, StoreError};
use parking_lot::Mutex;

/// Number of consumer threads used when none is configured.
#[must_use]
pub fn default_threads() -> usize {
    thread::available_parallelism().map_or(4, NonZeroUsize::get)
}

/// Pool of consumer threads; `threads == 0` means one per available CPU.
#[derive(Debug, Clone, Copy, Default)]
pub struct Worker {
    threads: usize,
}

impl Worker {
    #[must_use]
    pub fn new(threads: usize) -> Self {
        Self { threads }
    }

    /// Effective number of consumer threads.
    #[must_use]
    pub fn threads(&self) -> usize {
        if self.threads == 0 {
            default_threads()
        } else {
            self.threads
        }
    }

    /// Runs `handle` once per task and returns one accumulator per thread.
    ///
    /// Tasks are pulled lazily, so a listing is never collected up front.
    ///
    /// # Errors
    ///
    /// The first error yielded by `tasks` or returned by `handle`. Tasks
    /// already started on other threads finish; no new ones are taken.
    pub fn run<T, A, I, F>(&self, tasks: I, handle: F) -> Result<Vec<A>>
    where
        I: IntoIterator<Item = Result<T>>,
        I::IntoIter: Send,
        T: Send,
        A: Default + Send,
        F: Fn(&mut A, T) -> Result<()> + Sync,
    {
        let threads = self.threads();
        let queue = Mutex::new(tasks.into_iter());
        let failed = AtomicBool::new(false);
        let first_error: Mutex<Option<StoreError>> = Mutex::new(None);
        tracing::debug!(threads, "starting consumers");

        let fail = |e: StoreError| {
            failed.store(true, Ordering::SeqCst);
            first_error.lock().get_or_insert(e);
        };

        let accumulators = thread::scope(|scope| {
            let consumers: Vec<_> = (0..threads)
                .map(|_| {
                    scope.spawn(|| {
                        let mut acc = A::default();
                        while !failed.load(Ordering::SeqCst) {
                            // Lock only while pulling the next task.
                            let next = queue.lock().next();
                            match next {
                                None => break,
                                Some(Err(e)) => fail(e),
                                Some(Ok(task)) => {
                                    if let Err(e) = handle(&mut acc, task) {
                                        fail(e);
                                    }
                                }
                            }
                        }
                        acc
                    })
                })
                .collect();
            consumers
                .into_iter()
                .map(|consumer| match consumer.join() {
                    Ok(acc) => acc,
                    Err(payload) => panic::resume_unwind(payload),
                })
                .collect::<Vec<A>>()
        });

        match first_error.into_inner() {
            Some(e) => Err(e),
            None => Ok(accumulators),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    #[test]
    fn zero_threads_means_available_parallelism() {
        assert_eq!(Worker::new(0).threads(), default_threads());
        assert_eq!(Worker::new(3).threads(), 3);
        assert!(default_threads() >= 1);
    }

    #[test]
    fn every_task_is_handled_exactly_once() {
        let tasks = (0..200u32).map(Ok);
        let parts: Vec<Vec<u32>> = Worker::new(4)
            .run(tasks, |seen: &mut Vec<u32>, n| {
                seen.push(n);
                Ok(())
            })
            .unwrap();
        assert_eq!(parts.len(), 4);
        let all: Vec<u32> = parts.into_iter().flatten().collect();
        assert_eq!(all.len(), 200);
        let unique: BTreeSet<u32> = all.into_iter().collect();
        assert_eq!(unique.len(), 200);
    }

    #[test]
    fn first_handler_error_is_returned() {
        let tasks = (0..50u32).map(Ok);
        let err = Worker::new(2)
            .run(tasks, |_: &mut (), n| {
                if n == 7 {
                    Err(StoreError::does_not_exist("seven"))
                } else {
                    Ok(())
                }
            })
            .unwrap_err();
        assert!(err.is_missing());
    }

    #[test]
    fn producer_error_is_returned() {
        let tasks = vec![Ok(1u32), Err(StoreError::does_not_exist("listing")), Ok(2)];
        let err = Worker::new(1).run(tasks, |_: &mut (), _| Ok(())).unwrap_err();
        assert!(err.is_missing());
    }
}
