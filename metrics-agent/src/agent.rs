use std::collections::HashSet;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use metrics_core::{Metric, MetricBucket, MetricRegistry, MetricSnapshot, MetricType, Tags, ValueProvider};
use tracing::{debug, info, trace, warn};

use crate::client::{BufferedClient, MetricClient};
use crate::config::{AgentConfig, CounterReset};
use crate::error::AgentError;
use crate::publisher::Publisher;

const SCHEDULER_THREAD_NAME: &str = "metrics-agent-scheduler";

/// Builder for [`MetricAgent`].
///
/// Everything the agent harvests is registered up front; the set of sources is fixed once the
/// agent is built.  Metrics themselves stay live and can be tracked from any thread.
pub struct MetricAgentBuilder {
    config: AgentConfig,
    metrics: Vec<Arc<Metric>>,
    buckets: Vec<Arc<MetricBucket>>,
    providers: Vec<(Arc<Metric>, Arc<dyn ValueProvider>)>,
    registries: Vec<Arc<dyn MetricRegistry>>,
    tags: Tags,
    publishers: Vec<Arc<dyn Publisher>>,
    client: Option<Arc<dyn BufferedClient>>,
}

impl MetricAgentBuilder {
    /// Creates a new [`MetricAgentBuilder`] with the given agent configuration.
    pub fn new(config: AgentConfig) -> MetricAgentBuilder {
        MetricAgentBuilder {
            config,
            metrics: Vec::new(),
            buckets: Vec::new(),
            providers: Vec::new(),
            registries: Vec::new(),
            tags: Tags::default(),
            publishers: Vec::new(),
            client: None,
        }
    }

    /// Registers a metric to harvest every cycle.
    pub fn with_metric(mut self, metric: Arc<Metric>) -> Self {
        self.metrics.push(metric);
        self
    }

    /// Registers a bucket; every metric materialized in it is harvested every cycle.
    pub fn with_bucket(mut self, bucket: Arc<MetricBucket>) -> Self {
        self.buckets.push(bucket);
        self
    }

    /// Registers a callback supplying the value of `metric`.
    ///
    /// When the callback returns `None`, the metric is skipped for that cycle.  Registering a
    /// second provider for the same metric replaces the first.
    pub fn with_value_provider<P>(mut self, metric: Arc<Metric>, provider: P) -> Self
    where
        P: ValueProvider + 'static,
    {
        self.providers.retain(|(existing, _)| !Arc::ptr_eq(existing, &metric));
        self.providers.push((metric, Arc::new(provider)));
        self
    }

    /// Registers an external registry whose snapshots are pulled every cycle.
    pub fn with_registry(mut self, registry: Arc<dyn MetricRegistry>) -> Self {
        self.registries.push(registry);
        self
    }

    /// Sets the tags attached to every snapshot.
    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    /// Adds a publisher to the client the agent will create.
    ///
    /// Ignored if a client is supplied with [`with_client`](MetricAgentBuilder::with_client).
    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publishers.push(publisher);
        self
    }

    /// Uses an existing client instead of creating one.
    pub fn with_client(mut self, client: Arc<dyn BufferedClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Builds the agent.
    ///
    /// # Errors
    ///
    /// If the agent configuration or any publisher configuration is invalid, or if the client's
    /// worker threads could not be spawned, an error variant will be returned.
    pub fn build(self) -> Result<MetricAgent, AgentError> {
        self.config.validate()?;

        let client = match self.client {
            Some(client) => {
                if !self.publishers.is_empty() {
                    warn!(
                        publishers = self.publishers.len(),
                        "Publishers were registered along with an explicit client. Ignoring them."
                    );
                }
                client
            }
            None => Arc::new(MetricClient::new(self.publishers, &self.config)?),
        };

        Ok(MetricAgent {
            config: self.config,
            metrics: self.metrics,
            buckets: self.buckets,
            providers: self.providers,
            registries: self.registries,
            tags: Arc::new(self.tags),
            client,
        })
    }
}

/// Periodically harvests metrics and hands them to a [`BufferedClient`].
///
/// Each cycle collects the registered metrics, the metrics materialized in registered buckets and
/// the metrics with a value provider, reporting each distinct metric once.  Providers override the
/// live value of their metric.  Unless disabled, metrics not tracked within the last
/// `collect_frequency` are skipped.  Non-counter metrics are reset after being read; counters are
/// only reset here under [`CounterReset::Agent`].  Snapshots from external registries are appended
/// as-is, then everything is sent and the client is flushed.
pub struct MetricAgent {
    config: AgentConfig,
    metrics: Vec<Arc<Metric>>,
    buckets: Vec<Arc<MetricBucket>>,
    providers: Vec<(Arc<Metric>, Arc<dyn ValueProvider>)>,
    registries: Vec<Arc<dyn MetricRegistry>>,
    tags: Arc<Tags>,
    client: Arc<dyn BufferedClient>,
}

impl MetricAgent {
    /// Creates a [`MetricAgentBuilder`] with the given configuration.
    pub fn builder(config: AgentConfig) -> MetricAgentBuilder {
        MetricAgentBuilder::new(config)
    }

    /// Gets the agent configuration.
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Runs a single collection cycle on the calling thread.
    ///
    /// Returns the number of snapshots sent to the client.
    pub fn run_cycle(&self) -> usize {
        let now = SystemTime::now();
        let timestamp = now.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default();
        let snapshots = self.collect(now, timestamp);
        let sent = snapshots.len();

        debug!(snapshots = sent, "Collected metrics.");
        self.client.send_all(snapshots);
        self.client.flush();
        sent
    }

    fn collect(&self, now: SystemTime, timestamp: u64) -> Vec<MetricSnapshot> {
        let mut seen = HashSet::new();
        let mut snapshots = Vec::new();

        // Provided metrics claim their identity first so the live path never reports them.
        for (metric, provider) in &self.providers {
            if !seen.insert(Arc::as_ptr(metric)) {
                continue;
            }
            match provider.value() {
                Some(value) => {
                    snapshots.push(MetricSnapshot::from_metric(metric, value, timestamp, Arc::clone(&self.tags)))
                }
                None => trace!(metric = %metric.name(), "Metric does not have a value. Not sending it."),
            }
        }

        let live = self.metrics.iter().cloned().chain(self.buckets.iter().flat_map(|bucket| bucket.metrics()));
        for metric in live {
            if !seen.insert(Arc::as_ptr(&metric)) {
                continue;
            }
            if self.config.send_only_recently_updated
                && !metric.updated_within(now, self.config.collect_frequency)
            {
                trace!(metric = %metric.name(), "Metric was not updated recently. Not sending it.");
                continue;
            }

            let value = if self.should_reset(metric.metric_type()) { metric.get_and_reset() } else { metric.get() };
            snapshots.push(MetricSnapshot::from_metric(&metric, value, timestamp, Arc::clone(&self.tags)));
        }

        for registry in &self.registries {
            snapshots.extend(
                registry.metrics().into_iter().map(|value| value.into_snapshot(timestamp, Arc::clone(&self.tags))),
            );
        }

        snapshots
    }

    fn should_reset(&self, metric_type: MetricType) -> bool {
        !metric_type.is_counter() || self.config.counter_reset == CounterReset::Agent
    }

    /// Starts collecting on a background thread.
    ///
    /// The first cycle runs immediately, then one every `collect_frequency`.  A cycle that overruns
    /// the period delays the next one rather than stacking up.
    ///
    /// # Errors
    ///
    /// If the scheduler thread could not be spawned, an error variant will be returned.
    pub fn start(self) -> Result<AgentHandle, AgentError> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let client = Arc::clone(&self.client);

        info!(frequency = ?self.config.collect_frequency, "Starting metric agent.");
        let handle = std::thread::Builder::new()
            .name(SCHEDULER_THREAD_NAME.to_string())
            .spawn(move || {
                let frequency = self.config.collect_frequency;
                let mut next_cycle = Instant::now();
                loop {
                    self.run_cycle();

                    next_cycle += frequency;
                    let now = Instant::now();
                    if next_cycle < now {
                        debug!(overrun = ?now.duration_since(next_cycle), "Collection cycle overran its period.");
                        next_cycle = now;
                    }

                    match stop_rx.recv_timeout(next_cycle.saturating_duration_since(now)) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
            .map_err(|source| AgentError::Spawn { name: SCHEDULER_THREAD_NAME.to_string(), source })?;

        Ok(AgentHandle { stop: Some(stop_tx), thread: Some(handle), client })
    }
}

/// Handle to a running [`MetricAgent`].
///
/// Dropping the handle stops the agent.
pub struct AgentHandle {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
    client: Arc<dyn BufferedClient>,
}

impl AgentHandle {
    /// Stops the agent.
    ///
    /// Waits for the cycle in progress, if any, then shuts the client down.  Snapshots still
    /// queued in the client are dropped.
    pub fn stop(mut self) {
        self.stop_inner();
    }

    fn stop_inner(&mut self) {
        let Some(stop) = self.stop.take() else {
            return;
        };

        info!("Stopping metric agent.");
        let _ = stop.try_send(());
        drop(stop);

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Metric agent scheduler thread panicked.");
            }
        }
        self.client.shutdown();
    }
}

impl Drop for AgentHandle {
    fn drop(&mut self) {
        self.stop_inner();
    }
}
