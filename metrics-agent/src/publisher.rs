use metrics_core::MetricSnapshot;

use crate::config::PublisherConfig;
use crate::error::PublishError;

/// A backend-specific sink for batches of snapshots.
///
/// Publishers are shared between the worker threads executing publish calls, so `publish` takes
/// `&self`.  Failures are returned rather than logged: the dispatcher wrapping every call decides
/// whether to retry, count the failure against the circuit breaker, or drop the batch.
pub trait Publisher: Send + Sync {
    /// Gets the configuration of this publisher.
    fn config(&self) -> &PublisherConfig;

    /// Publishes a batch of snapshots.
    ///
    /// Batches never exceed the configured batch size and have already been filtered.
    ///
    /// # Errors
    ///
    /// If the backend could not be reached or refused the batch, an error variant will be returned.
    fn publish(&self, batch: &[MetricSnapshot]) -> Result<(), PublishError>;

    /// Releases any resources held by the publisher.
    ///
    /// Called once, after the last publish call.
    fn shutdown(&self) {}
}
