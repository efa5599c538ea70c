use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::AgentError;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed set of named threads executing publish jobs.
///
/// Jobs are fire-and-forget.  Once the pool is shut down, queued jobs that have not started yet
/// are discarded and new jobs are refused.
pub(crate) struct WorkerPool {
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stopped: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new(threads: usize, name: &str) -> Result<WorkerPool, AgentError> {
        let (sender, receiver) = unbounded::<Job>();
        let stopped = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(threads);
        for id in 0..threads {
            let thread_name = format!("{}-worker-{}", name, id);
            let receiver = receiver.clone();
            let stopped = Arc::clone(&stopped);
            let handle = std::thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || run_worker(receiver, stopped))
                .map_err(|source| AgentError::Spawn { name: thread_name, source })?;
            workers.push(handle);
        }

        Ok(WorkerPool {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            stopped,
        })
    }

    /// Queues a job, returning `false` if the pool has been shut down.
    pub fn execute<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.send(Box::new(job)).is_ok(),
            None => {
                warn!("Worker pool is shut down. Dropping job.");
                false
            }
        }
    }

    /// Stops the workers, waiting for jobs already running to finish.
    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::Release);
        // Dropping the only sender disconnects the channel, which wakes idle workers up.
        drop(self.sender.lock().take());

        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if worker.join().is_err() {
                warn!("Worker thread panicked.");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(receiver: Receiver<Job>, stopped: Arc<AtomicBool>) {
    while let Ok(job) = receiver.recv() {
        if stopped.load(Ordering::Acquire) {
            trace!("Discarding queued job after shutdown.");
            continue;
        }
        job();
    }
    debug!("Worker thread exiting.");
}

#[cfg(test)]
mod tests {
    use super::WorkerPool;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn wait_for(count: &AtomicUsize, expected: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while count.load(Ordering::Acquire) < expected && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn executes_jobs() {
        let pool = WorkerPool::new(2, "test").unwrap();
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            let count = Arc::clone(&count);
            assert!(pool.execute(move || {
                count.fetch_add(1, Ordering::AcqRel);
            }));
        }

        wait_for(&count, 10);
        assert_eq!(count.load(Ordering::Acquire), 10);
    }

    #[test]
    fn refuses_jobs_after_shutdown() {
        let pool = WorkerPool::new(1, "test").unwrap();
        pool.shutdown();

        assert!(!pool.execute(|| {}));
        // A second shutdown is harmless.
        pool.shutdown();
    }
}
