//! The fixed-size worker pool request dispatch runs on.
//!
//! A single unbounded FIFO queue guarded by a mutex and condition variable
//! feeds a fixed set of worker threads. Submission hands back a oneshot
//! receiver so async callers can await the result without tying up a
//! reactor thread on CPU-bound dispatch work.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use lodestar_common::protocol::{Result, RpcError};
use tokio::sync::oneshot;
use tracing::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct QueueState {
    jobs: VecDeque<Job>,
    shutdown: bool,
}

struct Shared {
    queue: Mutex<QueueState>,
    available: Condvar,
}

/// Fixed pool of worker threads over one FIFO task queue.
///
/// Jobs run in strict order of successful enqueue. A panicking job is caught
/// and logged; the worker thread survives. On [`WorkerPool::shutdown`] the
/// pool refuses new submissions, drains what was already queued, wakes all
/// workers, and joins them.
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl WorkerPool {
    /// Spawns `size` worker threads (at least one).
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let shared = Arc::new(Shared {
            queue: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                shutdown: false,
            }),
            available: Condvar::new(),
        });

        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("rpc-worker-{}", index))
                .spawn(move || worker_main(shared))
                .expect("failed to spawn worker thread");
            workers.push(handle);
        }

        WorkerPool {
            shared,
            workers: Mutex::new(workers),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Enqueues a job and returns a receiver for its result. The receiver
    /// errors if the job panics before sending.
    pub fn submit<F, T>(&self, job: F) -> Result<oneshot::Receiver<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.execute(move || {
            // The receiver may have been dropped; that is not our problem.
            let _ = tx.send(job());
        })?;
        Ok(rx)
    }

    /// Enqueues a job whose result nobody awaits.
    pub fn execute<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut queue = self.shared.queue.lock().unwrap();
        if queue.shutdown {
            return Err(RpcError::Transport("worker pool is shut down".into()));
        }
        queue.jobs.push_back(Box::new(job));
        drop(queue);
        self.shared.available.notify_one();
        Ok(())
    }

    /// Queued jobs not yet claimed by a worker.
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().unwrap().jobs.len()
    }

    /// Refuses further submissions, lets workers drain the queue, and joins
    /// every worker thread. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut queue = self.shared.queue.lock().unwrap();
            if queue.shutdown {
                return;
            }
            queue.shutdown = true;
        }
        self.shared.available.notify_all();

        let mut workers = self.workers.lock().unwrap();
        debug!(workers = workers.len(), "shutting down worker pool");
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_main(shared: Arc<Shared>) {
    loop {
        let job = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if let Some(job) = queue.jobs.pop_front() {
                    break job;
                }
                if queue.shutdown {
                    return;
                }
                queue = shared.available.wait(queue).unwrap();
            }
        };

        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            warn!("worker job panicked; worker thread continues");
        }
    }
}
