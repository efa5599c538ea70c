use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_queue::SegQueue;
use metrics_core::MetricSnapshot;
use metrics_util::{CounterDiff, FilterChain, MetricFilter};
use parking_lot::Mutex;
use tracing::{debug, info, trace};

use crate::config::{AgentConfig, CounterReset};
use crate::dispatcher::Dispatcher;
use crate::error::AgentError;
use crate::pool::WorkerPool;
use crate::publisher::Publisher;

/// A client that buffers snapshots and publishes them on demand.
pub trait BufferedClient: Send + Sync {
    /// Queues a snapshot.  Never blocks.
    fn send(&self, snapshot: MetricSnapshot);

    /// Queues several snapshots.
    fn send_all(&self, snapshots: Vec<MetricSnapshot>) {
        for snapshot in snapshots {
            self.send(snapshot);
        }
    }

    /// Drains the queue and hands the snapshots to every publisher.
    fn flush(&self);

    /// Stops publishing and releases the publishers.
    fn shutdown(&self);
}

struct PublisherSlot {
    publisher: Arc<dyn Publisher>,
    dispatcher: Arc<Dispatcher>,
    filters: FilterChain,
    batch_size: usize,
}

/// Buffers snapshots and fans them out to publishers on a worker pool.
///
/// [`send`](BufferedClient::send) only pushes onto a lock-free queue.  [`flush`](BufferedClient::flush)
/// drains everything queued so far and, for each publisher, filters the snapshots, turns counters
/// into deltas if the publisher asks for it, slices the result into batches, and submits each batch
/// to the worker pool wrapped by the publisher's [`Dispatcher`].  Flushes are serialized with each
/// other but never wait for publishing to complete.
pub struct MetricClient {
    queue: SegQueue<MetricSnapshot>,
    publishers: Vec<PublisherSlot>,
    // Held for the duration of a flush; also owns the per-publisher counter state.
    flush_state: Mutex<Vec<Option<CounterDiff>>>,
    pool: WorkerPool,
    shutdown: AtomicBool,
}

impl MetricClient {
    /// Creates a client publishing to `publishers`.
    ///
    /// # Errors
    ///
    /// If the agent configuration or any publisher configuration is invalid, or if the worker
    /// threads could not be spawned, an error variant will be returned.
    pub fn new(publishers: Vec<Arc<dyn Publisher>>, config: &AgentConfig) -> Result<MetricClient, AgentError> {
        config.validate()?;

        let mut slots = Vec::with_capacity(publishers.len());
        let mut diffs = Vec::with_capacity(publishers.len());
        for publisher in publishers {
            let publisher_config = publisher.config();
            publisher_config.validate()?;

            let dispatcher = Dispatcher::new(
                publisher_config.name.as_str(),
                &publisher_config.retry,
                &publisher_config.circuit_breaker,
            );
            let diff = (publisher_config.reset_counters && config.counter_reset == CounterReset::Publisher)
                .then(CounterDiff::new);
            slots.push(PublisherSlot {
                filters: publisher_config.filters(),
                batch_size: publisher_config.effective_batch_size(),
                dispatcher: Arc::new(dispatcher),
                publisher,
            });
            diffs.push(diff);
        }

        let pool = WorkerPool::new(config.worker_threads, "metrics-agent")?;
        debug!(publishers = slots.len(), workers = config.worker_threads, "Created metric client.");

        Ok(MetricClient {
            queue: SegQueue::new(),
            publishers: slots,
            flush_state: Mutex::new(diffs),
            pool,
            shutdown: AtomicBool::new(false),
        })
    }

    /// Gets the number of snapshots waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Gets the dispatcher guarding the publisher named `name`.
    pub fn dispatcher(&self, name: &str) -> Option<&Dispatcher> {
        self.publishers
            .iter()
            .find(|slot| slot.dispatcher.name() == name)
            .map(|slot| slot.dispatcher.as_ref())
    }

    fn drain(&self) -> Vec<MetricSnapshot> {
        // Only take what is queued right now; snapshots sent concurrently wait for the next flush.
        let pending = self.queue.len();
        let mut batch = Vec::with_capacity(pending);
        for _ in 0..pending {
            match self.queue.pop() {
                Some(snapshot) => batch.push(snapshot),
                None => break,
            }
        }
        batch
    }
}

impl BufferedClient for MetricClient {
    fn send(&self, snapshot: MetricSnapshot) {
        if self.shutdown.load(Ordering::Acquire) {
            trace!(metric = %snapshot.name(), "Client is shut down. Dropping snapshot.");
            return;
        }
        self.queue.push(snapshot);
    }

    fn flush(&self) {
        let mut diffs = self.flush_state.lock();
        if self.shutdown.load(Ordering::Acquire) {
            return;
        }

        let snapshots = self.drain();
        if snapshots.is_empty() {
            return;
        }

        for (slot, diff) in self.publishers.iter().zip(diffs.iter_mut()) {
            let mut selected = snapshots
                .iter()
                .filter(|snapshot| slot.filters.is_allowed(snapshot))
                .cloned()
                .collect::<Vec<_>>();
            if let Some(diff) = diff {
                selected = selected.into_iter().map(|snapshot| diff.apply(snapshot)).collect();
            }

            debug!(
                publisher = %slot.dispatcher.name(),
                received = snapshots.len(),
                selected = selected.len(),
                batch_size = slot.batch_size,
                "Submitting metrics batches."
            );

            for chunk in selected.chunks(slot.batch_size) {
                let batch = chunk.to_vec();
                let publisher = Arc::clone(&slot.publisher);
                let dispatcher = Arc::clone(&slot.dispatcher);
                self.pool.execute(move || {
                    dispatcher.dispatch(|| publisher.publish(&batch));
                });
            }
        }
    }

    fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        // Wait for any flush in progress before stopping the workers it submits to.
        let _flush = self.flush_state.lock();
        // Wake workers waiting between retries so joining them does not block.
        for slot in &self.publishers {
            slot.dispatcher.shutdown();
        }
        self.pool.shutdown();
        for slot in &self.publishers {
            slot.publisher.shutdown();
        }
        info!(dropped = self.queue.len(), "Metric client shut down.");
    }
}
