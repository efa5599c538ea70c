use std::sync::Arc;

use crate::{MetricLabels, MetricSnapshot, MetricType, Tags};

/// A pull-based source of a metric's value.
///
/// Providers are invoked once per collection cycle.  Returning `None` means the metric has nothing
/// to report this cycle and is skipped.
pub trait ValueProvider: Send + Sync {
    /// Gets the current value, if any.
    fn value(&self) -> Option<f64>;
}

impl<F> ValueProvider for F
where
    F: Fn() -> Option<f64> + Send + Sync,
{
    fn value(&self) -> Option<f64> {
        (self)()
    }
}

/// A value reported by an external registry, already named, typed and computed.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricSnapshotValue {
    /// Name of the value.
    pub labels: MetricLabels,
    /// Type of the value.
    pub metric_type: MetricType,
    /// The value itself.
    pub value: f64,
}

impl MetricSnapshotValue {
    /// Creates a value.
    pub fn new<L: Into<MetricLabels>>(labels: L, metric_type: MetricType, value: f64) -> Self {
        MetricSnapshotValue { labels: labels.into(), metric_type, value }
    }

    /// Stamps this value into a snapshot.
    pub fn into_snapshot(self, timestamp: u64, tags: Arc<Tags>) -> MetricSnapshot {
        MetricSnapshot::new(self.labels, self.metric_type, self.value, timestamp, tags)
    }
}

/// An external registry whose values are reported as-is.
///
/// Registries compute their own values (quantiles, rates and so on); the collection cycle pulls
/// them once per cycle and never resets anything on their behalf.
pub trait MetricRegistry: Send + Sync {
    /// Gets every value the registry currently exposes.
    fn metrics(&self) -> Vec<MetricSnapshotValue>;
}

#[cfg(test)]
mod tests {
    use super::{MetricRegistry, MetricSnapshotValue, ValueProvider};
    use crate::MetricType;
    use std::sync::Arc;

    struct Timers;

    impl MetricRegistry for Timers {
        fn metrics(&self) -> Vec<MetricSnapshotValue> {
            vec![
                MetricSnapshotValue::new("db.query", MetricType::P99, 42.0),
                MetricSnapshotValue::new("db.query", MetricType::from_name("mean"), 7.5),
            ]
        }
    }

    #[test]
    fn closures_are_providers() {
        let present = || Some(123.0);
        let absent = || None;

        assert_eq!(present.value(), Some(123.0));
        assert_eq!(absent.value(), None);

        let boxed: Box<dyn ValueProvider> = Box::new(|| Some(1.0));
        assert_eq!(boxed.value(), Some(1.0));
    }

    #[test]
    fn registry_values_become_snapshots() {
        let snapshots = Timers
            .metrics()
            .into_iter()
            .map(|v| v.into_snapshot(5, Arc::default()))
            .collect::<Vec<_>>();

        assert_eq!(snapshots[0].full_name(), "db.query.p99");
        assert_eq!(snapshots[1].full_name(), "db.query.avg");
        assert_eq!(snapshots[1].value(), 7.5);
    }
}
