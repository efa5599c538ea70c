use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::atomics::AtomicF64;
use crate::{MetricLabels, MetricType};

#[derive(Debug, Default)]
struct Average {
    sum: f64,
    count: u64,
}

impl Average {
    fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Per-type accumulator state.
///
/// Extremes start out as `None`, which stands in for the positive/negative infinity identity and is
/// reported as zero.
#[derive(Debug)]
enum Accumulator {
    Count(AtomicF64),
    Min(Mutex<Option<f64>>),
    Max(Mutex<Option<f64>>),
    Avg(Mutex<Average>),
    Simple(AtomicF64),
}

impl Accumulator {
    fn new(metric_type: MetricType) -> Accumulator {
        match metric_type {
            MetricType::Count => Accumulator::Count(AtomicF64::new(0.0)),
            MetricType::Min => Accumulator::Min(Mutex::new(None)),
            MetricType::Max => Accumulator::Max(Mutex::new(None)),
            MetricType::Avg => Accumulator::Avg(Mutex::new(Average::default())),
            _ => Accumulator::Simple(AtomicF64::new(0.0)),
        }
    }
}

/// A named, typed, thread-safe accumulator.
///
/// Values are recorded with [`track`](Metric::track), read with [`get`](Metric::get), and harvested
/// with [`get_and_reset`](Metric::get_and_reset), which hands back the current value and restores
/// the identity value for the metric's type in one step:
///
/// - [`Count`](MetricType::Count) sums tracked values and resets to zero.
/// - [`Min`](MetricType::Min) and [`Max`](MetricType::Max) keep the extreme value, reporting zero
///   when nothing was tracked since the last reset.
/// - [`Avg`](MetricType::Avg) reports the mean of tracked values since the last reset.
/// - Every other type keeps the last tracked value and resets to zero.
///
/// Metrics are shared as `Arc<Metric>`; the allocation itself is the metric's identity.
#[derive(Debug)]
pub struct Metric {
    labels: MetricLabels,
    metric_type: MetricType,
    accumulator: Accumulator,
    last_update: AtomicU64,
}

impl Metric {
    /// Creates a new metric.
    pub fn new<L: Into<MetricLabels>>(labels: L, metric_type: MetricType) -> Metric {
        Metric {
            labels: labels.into(),
            metric_type,
            accumulator: Accumulator::new(metric_type),
            last_update: AtomicU64::new(0),
        }
    }

    /// Creates a new metric that has already tracked `value` once.
    pub fn with_value<L: Into<MetricLabels>>(labels: L, metric_type: MetricType, value: f64) -> Metric {
        let metric = Metric::new(labels, metric_type);
        metric.track(value);
        metric
    }

    /// Gets the labels of this metric.
    pub fn labels(&self) -> &MetricLabels {
        &self.labels
    }

    /// Gets the rendered wire name of this metric, without the type suffix.
    pub fn name(&self) -> String {
        self.labels.format('.')
    }

    /// Gets the type of this metric.
    pub fn metric_type(&self) -> MetricType {
        self.metric_type
    }

    /// Records a value.
    pub fn track(&self, value: f64) {
        match &self.accumulator {
            Accumulator::Count(sum) => sum.add(value),
            Accumulator::Min(min) => {
                let mut min = min.lock();
                if min.map_or(true, |current| value < current) {
                    *min = Some(value);
                }
            }
            Accumulator::Max(max) => {
                let mut max = max.lock();
                if max.map_or(true, |current| value > current) {
                    *max = Some(value);
                }
            }
            Accumulator::Avg(avg) => {
                let mut avg = avg.lock();
                avg.sum += value;
                avg.count += 1;
            }
            Accumulator::Simple(last) => last.store(value),
        }

        self.last_update.store(now_millis(), Ordering::Release);
    }

    /// Increments a counter by one.
    pub fn increment(&self) {
        self.track(1.0);
    }

    /// Adds `delta` to a counter.
    pub fn add(&self, delta: f64) {
        self.track(delta);
    }

    /// Gets the current value without modifying it.
    pub fn get(&self) -> f64 {
        match &self.accumulator {
            Accumulator::Count(sum) => sum.load(),
            Accumulator::Min(extreme) | Accumulator::Max(extreme) => extreme.lock().unwrap_or(0.0),
            Accumulator::Avg(avg) => avg.lock().mean(),
            Accumulator::Simple(last) => last.load(),
        }
    }

    /// Gets the current value and resets the metric to its identity value.
    pub fn get_and_reset(&self) -> f64 {
        match &self.accumulator {
            Accumulator::Count(sum) => sum.swap(0.0),
            Accumulator::Min(extreme) | Accumulator::Max(extreme) => {
                extreme.lock().take().unwrap_or(0.0)
            }
            Accumulator::Avg(avg) => std::mem::take(&mut *avg.lock()).mean(),
            Accumulator::Simple(last) => last.swap(0.0),
        }
    }

    /// Gets the wall-clock time of the last [`track`](Metric::track), if any.
    pub fn last_update(&self) -> Option<SystemTime> {
        match self.last_update.load(Ordering::Acquire) {
            0 => None,
            millis => Some(UNIX_EPOCH + Duration::from_millis(millis)),
        }
    }

    /// Whether or not this metric was tracked within `window` of `now`.
    pub fn updated_within(&self, now: SystemTime, window: Duration) -> bool {
        match self.last_update() {
            Some(last) => now.duration_since(last).map_or(true, |elapsed| elapsed <= window),
            None => false,
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
        .max(1)
}
