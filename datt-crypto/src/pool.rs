// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::{Arc, OnceLock};
use std::thread;

use tokio::sync::oneshot;
use tracing::error;

/// A job queued for execution on the pool.
type Job = Box<dyn FnOnce() + Send + 'static>;

static DEFAULT_POOL: OnceLock<WorkerPool> = OnceLock::new();

/// Bounded pool of OS threads executing CPU-bound crypto jobs.
///
/// Jobs are consumed from a single FIFO queue: when every worker is busy, new jobs wait in the
/// queue instead of spawning additional threads. Cloning the pool is cheap and shares the same
/// workers.
#[derive(Clone, Debug)]
pub struct WorkerPool {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    sender: crossbeam_channel::Sender<Job>,
    size: usize,
}

impl WorkerPool {
    /// Spawn a pool with the given number of worker threads.
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "worker pool needs at least one thread");

        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();

        for index in 0..size {
            let receiver = receiver.clone();
            let spawned = thread::Builder::new()
                .name(format!("datt-crypto-{index}"))
                .spawn(move || {
                    // The receive loop ends once every pool handle has been dropped.
                    while let Ok(job) = receiver.recv() {
                        job();
                    }
                });
            if let Err(err) = spawned {
                error!("failed to spawn crypto worker thread: {err}");
            }
        }

        Self {
            inner: Arc::new(Inner { sender, size }),
        }
    }

    /// The process-wide pool, created lazily on first use and shared by every engine that does
    /// not bring its own pool.
    pub fn default_pool() -> WorkerPool {
        DEFAULT_POOL
            .get_or_init(|| {
                let size = thread::available_parallelism()
                    .map(|cores| cores.get())
                    .unwrap_or(4);
                WorkerPool::new(size)
            })
            .clone()
    }

    /// Number of worker threads in this pool.
    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Queue a job and hand back the receiver its result arrives on.
    ///
    /// The receiver resolves exactly once; if the executing worker dies before completing, the
    /// receiver errors instead of hanging.
    pub(crate) fn dispatch<T, F>(&self, task: F) -> oneshot::Receiver<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (reply, reply_rx) = oneshot::channel();
        let job = Box::new(move || {
            // The caller may have gone away in the meantime; completing is not an error then.
            let _ = reply.send(task());
        });
        if self.inner.sender.send(job).is_err() {
            error!("crypto worker pool has no live workers, dropping task");
        }
        reply_rx
    }
}

impl PartialEq for WorkerPool {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::WorkerPool;

    #[tokio::test]
    async fn executes_queued_jobs() {
        let pool = WorkerPool::new(2);
        let result = pool.dispatch(|| 40 + 2).await.unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn queues_more_jobs_than_workers() {
        let pool = WorkerPool::new(1);
        let receivers: Vec<_> = (0..16usize).map(|i| pool.dispatch(move || i * 2)).collect();
        for (i, receiver) in receivers.into_iter().enumerate() {
            assert_eq!(receiver.await.unwrap(), i * 2);
        }
    }

    #[test]
    fn default_pool_is_shared() {
        assert_eq!(WorkerPool::default_pool(), WorkerPool::default_pool());
        assert_ne!(WorkerPool::default_pool(), WorkerPool::new(1));
    }
}
