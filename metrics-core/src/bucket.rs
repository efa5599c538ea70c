use std::fmt;
use std::sync::Arc;

use crate::{Metric, MetricLabels, MetricType};

/// A concurrent registry of metrics sharing a base name.
///
/// A bucket is created with a base name, an optional prefix label name and a list of suffix label
/// names.  Metrics are materialized lazily the first time a combination of label values is asked
/// for, and exactly one [`Metric`] ever exists per combination: concurrent first access from any
/// number of threads resolves to the same instance.
///
/// ```rust
/// # use metrics_core::{MetricBucket, MetricType};
/// let bucket = MetricBucket::with_post_labels("requests", MetricType::Count, ["status"]);
/// bucket.metric("succeeded").increment();
///
/// let metric = bucket.metric("succeeded");
/// assert_eq!(metric.name(), "requests.succeeded");
/// assert_eq!(metric.get(), 1.0);
/// ```
pub struct MetricBucket {
    parent: MetricLabels,
    metric_type: MetricType,
    metrics: scc::HashMap<MetricLabels, Arc<Metric>>,
}

impl MetricBucket {
    /// Creates a bucket with no label names.
    pub fn new<N: Into<String>>(name: N, metric_type: MetricType) -> MetricBucket {
        MetricBucket::from_labels(MetricLabels::new(name), metric_type)
    }

    /// Creates a bucket whose metrics are distinguished by suffix labels.
    pub fn with_post_labels<N, I, S>(name: N, metric_type: MetricType, post_label_names: I) -> MetricBucket
    where
        N: Into<String>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        MetricBucket::from_labels(
            MetricLabels::new(name).with_post_label_names(post_label_names),
            metric_type,
        )
    }

    /// Creates a bucket whose metrics are distinguished by a prefix label and suffix labels.
    pub fn with_labels<N, P, I, S>(
        name: N,
        metric_type: MetricType,
        pre_label_name: P,
        post_label_names: I,
    ) -> MetricBucket
    where
        N: Into<String>,
        P: Into<String>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        MetricBucket::from_labels(
            MetricLabels::new(name)
                .with_pre_label_name(pre_label_name)
                .with_post_label_names(post_label_names),
            metric_type,
        )
    }

    /// Creates a bucket from parent labels carrying label names but no values.
    pub fn from_labels(parent: MetricLabels, metric_type: MetricType) -> MetricBucket {
        MetricBucket { parent, metric_type, metrics: scc::HashMap::new() }
    }

    /// Gets the parent labels of this bucket.
    pub fn labels(&self) -> &MetricLabels {
        &self.parent
    }

    /// Gets the type shared by every metric in this bucket.
    pub fn metric_type(&self) -> MetricType {
        self.metric_type
    }

    /// Gets the metric named after the bucket itself, with no label values.
    pub fn parent_metric(&self) -> Arc<Metric> {
        self.get_or_create(self.parent.clone())
    }

    /// Gets the metric for a single suffix value.
    pub fn metric<S: ToString>(&self, suffix: S) -> Arc<Metric> {
        let labels = self.parent.clone().with_post_label_values([suffix.to_string()]);
        self.get_or_create(labels)
    }

    /// Gets the metric for a list of suffix values.
    pub fn metric_with_suffixes<I, S>(&self, suffixes: I) -> Arc<Metric>
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        let labels = self
            .parent
            .clone()
            .with_post_label_values(suffixes.into_iter().map(|s| s.to_string()));
        self.get_or_create(labels)
    }

    /// Gets the metric for a prefix value.
    pub fn metric_with_prefix<P: ToString>(&self, prefix: P) -> Arc<Metric> {
        let labels = self.parent.clone().with_pre_label_value(prefix.to_string());
        self.get_or_create(labels)
    }

    /// Gets the metric for a prefix value and a list of suffix values.
    pub fn metric_with_labels<P, I, S>(&self, prefix: P, suffixes: I) -> Arc<Metric>
    where
        P: ToString,
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        let labels = self
            .parent
            .clone()
            .with_pre_label_value(prefix.to_string())
            .with_post_label_values(suffixes.into_iter().map(|s| s.to_string()));
        self.get_or_create(labels)
    }

    /// Gets every metric materialized so far.
    pub fn metrics(&self) -> Vec<Arc<Metric>> {
        let mut metrics = Vec::with_capacity(self.metrics.len());
        self.metrics.scan(|_, metric| metrics.push(Arc::clone(metric)));
        metrics
    }

    /// Gets the number of metrics materialized so far.
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// Whether or not no metric has been materialized yet.
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    fn get_or_create(&self, labels: MetricLabels) -> Arc<Metric> {
        let labels = labels.normalize();

        // Fast path: the metric already exists, so only a shared read is needed.
        if let Some(metric) = self.metrics.read(&labels, |_, metric| Arc::clone(metric)) {
            return metric;
        }

        let metric_type = self.metric_type;
        let entry = self
            .metrics
            .entry(labels.clone())
            .or_insert_with(|| Arc::new(Metric::new(labels, metric_type)));
        Arc::clone(entry.get())
    }
}

impl fmt::Debug for MetricBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricBucket")
            .field("parent", &self.parent)
            .field("metric_type", &self.metric_type)
            .field("len", &self.metrics.len())
            .finish()
    }
}
