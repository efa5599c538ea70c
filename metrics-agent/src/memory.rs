use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use metrics_core::MetricSnapshot;
use parking_lot::Mutex;

use crate::config::{PublisherConfig, PublisherKind};
use crate::error::{ConfigError, PublishError};
use crate::publisher::Publisher;

#[derive(Debug, Default)]
struct Inner {
    batches: Mutex<Vec<Vec<MetricSnapshot>>>,
    attempts: AtomicUsize,
    failing: AtomicBool,
    shutdown: AtomicBool,
}

/// Reads what a [`MemoryPublisher`] has recorded.
#[derive(Clone, Debug)]
pub struct Snapshotter {
    inner: Arc<Inner>,
}

impl Snapshotter {
    /// Gets every batch published so far, in order.
    pub fn batches(&self) -> Vec<Vec<MetricSnapshot>> {
        self.inner.batches.lock().clone()
    }

    /// Gets every snapshot published so far, flattened across batches.
    pub fn snapshots(&self) -> Vec<MetricSnapshot> {
        self.inner.batches.lock().iter().flatten().cloned().collect()
    }

    /// Gets the number of publish calls made, including failed ones.
    pub fn attempts(&self) -> usize {
        self.inner.attempts.load(Ordering::Acquire)
    }

    /// Whether or not the publisher has been shut down.
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Makes subsequent publish calls fail, or succeed again.
    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::Release);
    }

    /// Forgets everything recorded so far.
    pub fn clear(&self) {
        self.inner.batches.lock().clear();
        self.inner.attempts.store(0, Ordering::Release);
    }
}

/// A publisher that records every batch in memory.
///
/// Useful for testing, or for inspecting what an agent would publish.  Recorded batches are read
/// through a [`Snapshotter`].
#[derive(Debug)]
pub struct MemoryPublisher {
    config: PublisherConfig,
    inner: Arc<Inner>,
}

impl MemoryPublisher {
    /// Creates a memory publisher named `name` with otherwise default settings.
    pub fn new<N: Into<String>>(name: N) -> MemoryPublisher {
        MemoryPublisher {
            config: PublisherConfig::new(name, PublisherKind::Memory),
            inner: Arc::default(),
        }
    }

    /// Creates a memory publisher from configuration.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid or is not meant for a memory publisher, an error variant
    /// will be returned.
    pub fn from_config(config: PublisherConfig) -> Result<MemoryPublisher, ConfigError> {
        config.validate()?;
        config.expect_kind(PublisherKind::Memory)?;
        Ok(MemoryPublisher { config, inner: Arc::default() })
    }

    /// Gets a `Snapshotter` attached to this publisher.
    pub fn snapshotter(&self) -> Snapshotter {
        Snapshotter { inner: Arc::clone(&self.inner) }
    }
}

impl Publisher for MemoryPublisher {
    fn config(&self) -> &PublisherConfig {
        &self.config
    }

    fn publish(&self, batch: &[MetricSnapshot]) -> Result<(), PublishError> {
        self.inner.attempts.fetch_add(1, Ordering::AcqRel);
        if self.inner.failing.load(Ordering::Acquire) {
            return Err(PublishError::Other(format!("publisher '{}' is set to fail", self.config.name)));
        }
        self.inner.batches.lock().push(batch.to_vec());
        Ok(())
    }

    fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryPublisher;
    use crate::config::{PublisherConfig, PublisherKind};
    use crate::publisher::Publisher;
    use metrics_core::{MetricLabels, MetricSnapshot, MetricType};
    use std::sync::Arc;

    fn snapshot(name: &str) -> MetricSnapshot {
        MetricSnapshot::new(MetricLabels::new(name), MetricType::Count, 1.0, 0, Arc::default())
    }

    #[test]
    fn records_batches() {
        let publisher = MemoryPublisher::new("memory");
        let snapshotter = publisher.snapshotter();

        publisher.publish(&[snapshot("a"), snapshot("b")]).unwrap();
        publisher.publish(&[snapshot("c")]).unwrap();

        assert_eq!(snapshotter.batches().len(), 2);
        let names = snapshotter.snapshots().iter().map(|s| s.name().to_string()).collect::<Vec<_>>();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(snapshotter.attempts(), 2);

        snapshotter.clear();
        assert!(snapshotter.snapshots().is_empty());
        assert_eq!(snapshotter.attempts(), 0);
    }

    #[test]
    fn failure_injection_and_shutdown() {
        let publisher = MemoryPublisher::new("memory");
        let snapshotter = publisher.snapshotter();

        snapshotter.set_failing(true);
        assert!(publisher.publish(&[snapshot("a")]).is_err());
        assert_eq!(snapshotter.attempts(), 1);
        assert!(snapshotter.snapshots().is_empty());

        publisher.shutdown();
        assert!(snapshotter.is_shutdown());
    }

    #[test]
    fn from_config_checks_kind() {
        assert!(MemoryPublisher::from_config(PublisherConfig::new("m", PublisherKind::Memory)).is_ok());
        assert!(MemoryPublisher::from_config(PublisherConfig::new("m", PublisherKind::Graphite)).is_err());
        assert!(MemoryPublisher::from_config(PublisherConfig::new("", PublisherKind::Memory)).is_err());
    }
}
