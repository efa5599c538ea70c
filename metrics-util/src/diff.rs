use std::collections::HashMap;

use metrics_core::{MetricLabels, MetricSnapshot};

/// Turns cumulative counter values into per-observation deltas.
///
/// Each publisher that wants deltas owns its own `CounterDiff`, so several publishers reading the
/// same cumulative counter each see deltas relative to their own last observation.  Only
/// [`Count`](metrics_core::MetricType::Count) snapshots are rewritten; everything else passes
/// through untouched.  The first observation of a counter is reported relative to zero.
#[derive(Debug, Default)]
pub struct CounterDiff {
    previous: HashMap<MetricLabels, f64>,
}

impl CounterDiff {
    /// Creates an empty differ.
    pub fn new() -> CounterDiff {
        CounterDiff::default()
    }

    /// Rewrites `snapshot` to carry the delta since the last observation of the same counter.
    pub fn apply(&mut self, snapshot: MetricSnapshot) -> MetricSnapshot {
        if !snapshot.metric_type().is_counter() {
            return snapshot;
        }

        let current = snapshot.value();
        let previous = self.previous.insert(snapshot.labels().clone(), current).unwrap_or(0.0);
        snapshot.with_value(current - previous)
    }

    /// Gets the number of counters observed so far.
    pub fn len(&self) -> usize {
        self.previous.len()
    }

    /// Whether or not no counter has been observed yet.
    pub fn is_empty(&self) -> bool {
        self.previous.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::CounterDiff;
    use metrics_core::{MetricLabels, MetricSnapshot, MetricType};
    use std::sync::Arc;

    fn snapshot(name: &str, metric_type: MetricType, value: f64) -> MetricSnapshot {
        MetricSnapshot::new(MetricLabels::new(name), metric_type, value, 0, Arc::default())
    }

    #[test]
    fn counters_become_deltas() {
        let mut diff = CounterDiff::new();

        assert_eq!(diff.apply(snapshot("requests", MetricType::Count, 5.0)).value(), 5.0);
        assert_eq!(diff.apply(snapshot("requests", MetricType::Count, 8.0)).value(), 3.0);
        assert_eq!(diff.apply(snapshot("requests", MetricType::Count, 8.0)).value(), 0.0);
        assert_eq!(diff.apply(snapshot("errors", MetricType::Count, 2.0)).value(), 2.0);
        assert_eq!(diff.len(), 2);
    }

    #[test]
    fn other_types_pass_through() {
        let mut diff = CounterDiff::new();

        assert_eq!(diff.apply(snapshot("latency", MetricType::Avg, 5.0)).value(), 5.0);
        assert_eq!(diff.apply(snapshot("latency", MetricType::Avg, 7.0)).value(), 7.0);
        assert!(diff.is_empty());
    }

    #[test]
    fn differs_are_independent() {
        let mut first = CounterDiff::new();
        let mut second = CounterDiff::new();

        first.apply(snapshot("requests", MetricType::Count, 10.0));
        assert_eq!(first.apply(snapshot("requests", MetricType::Count, 12.0)).value(), 2.0);
        assert_eq!(second.apply(snapshot("requests", MetricType::Count, 12.0)).value(), 12.0);
    }
}
