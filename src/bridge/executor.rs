//! Host mutation executor
//!
//! The host's object model may only be touched from one thread. The
//! executor owns that state on a dedicated worker thread and runs submitted
//! closures there one at a time, in submission order, regardless of which
//! thread or task submitted them.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread::{self, ThreadId};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use super::error::ExecutorError;

type Job<S> = Box<dyn FnOnce(&mut S) + Send + 'static>;

/// Handle to the single host mutation thread
pub struct MutationExecutor<S> {
    jobs: mpsc::UnboundedSender<Job<S>>,
    worker: ThreadId,
}

impl<S> Clone for MutationExecutor<S> {
    fn clone(&self) -> Self {
        Self {
            jobs: self.jobs.clone(),
            worker: self.worker,
        }
    }
}

impl<S> fmt::Debug for MutationExecutor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationExecutor")
            .field("worker", &self.worker)
            .finish()
    }
}

impl<S: Send + 'static> MutationExecutor<S> {
    /// Move `state` onto a new worker thread.
    ///
    /// The worker exits once every executor handle has been dropped.
    pub fn spawn(name: &str, state: S) -> Result<Self, ExecutorError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job<S>>();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut state = state;
                while let Some(job) = rx.blocking_recv() {
                    job(&mut state);
                }
                debug!("Mutation worker exiting");
            })
            .map_err(|err| ExecutorError::Spawn(err.to_string()))?;

        Ok(Self {
            jobs: tx,
            worker: handle.thread().id(),
        })
    }

    /// Id of the worker thread
    pub fn worker_thread(&self) -> ThreadId {
        self.worker
    }

    fn submit<R, F>(
        &self,
        f: F,
    ) -> Result<oneshot::Receiver<Result<R, ExecutorError>>, ExecutorError>
    where
        F: FnOnce(&mut S) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job<S> = Box::new(move |state: &mut S| {
            let outcome = catch_unwind(AssertUnwindSafe(|| f(state))).map_err(|_| {
                error!("Mutation job panicked");
                ExecutorError::JobPanicked
            });
            let _ = tx.send(outcome);
        });
        self.jobs.send(job).map_err(|_| ExecutorError::Stopped)?;
        Ok(rx)
    }

    /// Run `f` on the worker and wait for its result.
    pub async fn run<R, F>(&self, f: F) -> Result<R, ExecutorError>
    where
        F: FnOnce(&mut S) -> R + Send + 'static,
        R: Send + 'static,
    {
        let rx = self.submit(f)?;
        rx.await.map_err(|_| ExecutorError::Stopped)?
    }

    /// Run `f` on the worker, blocking the calling thread.
    ///
    /// Must not be called from inside an async runtime.
    pub fn run_blocking<R, F>(&self, f: F) -> Result<R, ExecutorError>
    where
        F: FnOnce(&mut S) -> R + Send + 'static,
        R: Send + 'static,
    {
        let rx = self.submit(f)?;
        rx.blocking_recv().map_err(|_| ExecutorError::Stopped)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn jobs_run_in_order_on_the_worker() {
        let executor = MutationExecutor::spawn("test-worker", Vec::<u32>::new()).unwrap();
        let worker = executor.worker_thread();

        for n in 0..5 {
            executor.run(move |log| log.push(n)).await.unwrap();
        }
        let (log, thread) = executor
            .run(|log| (log.clone(), thread::current().id()))
            .await
            .unwrap();
        assert_eq!(log, vec![0, 1, 2, 3, 4]);
        assert_eq!(thread, worker);
        assert_ne!(thread, thread::current().id());
    }

    #[tokio::test]
    async fn panicking_job_does_not_kill_worker() {
        let executor = MutationExecutor::spawn("test-worker", 0u32).unwrap();
        let result = executor.run(|_: &mut u32| -> u32 { panic!("boom") }).await;
        assert_eq!(result, Err(ExecutorError::JobPanicked));

        let value = executor
            .run(|n| {
                *n += 1;
                *n
            })
            .await
            .unwrap();
        assert_eq!(value, 1);
    }

    #[test]
    fn blocking_callers_are_supported() {
        let executor = MutationExecutor::spawn("test-worker", String::new()).unwrap();
        executor.run_blocking(|s| s.push_str("abc")).unwrap();
        assert_eq!(executor.run_blocking(|s| s.len()).unwrap(), 3);
    }
}
