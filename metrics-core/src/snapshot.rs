use std::sync::Arc;

use crate::{Metric, MetricLabels, MetricType, Tags};

/// An immutable value harvested from a metric at send time.
///
/// Snapshots, not live metrics, are what publishers receive.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricSnapshot {
    name: String,
    labels: MetricLabels,
    metric_type: MetricType,
    value: f64,
    timestamp: u64,
    tags: Arc<Tags>,
}

impl MetricSnapshot {
    /// Creates a snapshot.
    ///
    /// `timestamp` is in seconds since the Unix epoch.
    pub fn new(
        labels: MetricLabels,
        metric_type: MetricType,
        value: f64,
        timestamp: u64,
        tags: Arc<Tags>,
    ) -> MetricSnapshot {
        MetricSnapshot { name: labels.format('.'), labels, metric_type, value, timestamp, tags }
    }

    /// Creates a snapshot of `metric` carrying `value`.
    pub fn from_metric(metric: &Metric, value: f64, timestamp: u64, tags: Arc<Tags>) -> MetricSnapshot {
        MetricSnapshot::new(metric.labels().clone(), metric.metric_type(), value, timestamp, tags)
    }

    /// Gets the rendered name, without the type suffix.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the rendered name followed by the type suffix, if the type has one.
    pub fn full_name(&self) -> String {
        let suffix = self.metric_type.as_str();
        if suffix.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.name, suffix)
        }
    }

    /// Gets the labels the name was rendered from.
    pub fn labels(&self) -> &MetricLabels {
        &self.labels
    }

    /// Gets the metric type.
    pub fn metric_type(&self) -> MetricType {
        self.metric_type
    }

    /// Gets the value.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Gets the timestamp, in seconds since the Unix epoch.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Gets the process tags attached to this value.
    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Consumes this snapshot, returning a copy carrying `value` instead.
    pub fn with_value(mut self, value: f64) -> MetricSnapshot {
        self.value = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::MetricSnapshot;
    use crate::{Metric, MetricLabels, MetricType, Tags};
    use std::sync::Arc;

    #[test]
    fn names() {
        let tags = Arc::new(Tags::new().with_env("prod"));
        let labels = MetricLabels::new("requests").with_post_label("status", "ok");
        let snapshot = MetricSnapshot::new(labels, MetricType::Count, 3.0, 1_700_000_000, tags);

        assert_eq!(snapshot.name(), "requests.ok");
        assert_eq!(snapshot.full_name(), "requests.ok.count");
        assert_eq!(snapshot.tags().env(), Some("prod"));

        let gauge = MetricSnapshot::new("depth".into(), MetricType::Gauge, 1.0, 0, Arc::default());
        assert_eq!(gauge.full_name(), "depth");
    }

    #[test]
    fn from_metric() {
        let metric = Metric::with_value("latency", MetricType::Max, 12.0);
        let snapshot = MetricSnapshot::from_metric(&metric, metric.get(), 10, Arc::default());

        assert_eq!(snapshot.metric_type(), MetricType::Max);
        assert_eq!(snapshot.value(), 12.0);
        assert_eq!(snapshot.timestamp(), 10);
        assert_eq!(snapshot.clone().with_value(2.0).value(), 2.0);
    }
}
