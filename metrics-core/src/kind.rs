use std::fmt;

/// Metric type.
///
/// Defines how a [`Metric`](crate::Metric) accumulates tracked values and what it resets to.  The
/// first five variants are produced by application code; the remaining ones are pass-through types
/// that only external registries emit, carrying values they have already computed.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub enum MetricType {
    /// Running sum, reset to zero.
    Count,
    /// Smallest tracked value since the last reset.
    Min,
    /// Largest tracked value since the last reset.
    Max,
    /// Arithmetic mean of tracked values since the last reset.
    Avg,
    /// Last tracked value.
    Gauge,
    /// Standard deviation.
    StdDev,
    /// 50th percentile.
    P50,
    /// 75th percentile.
    P75,
    /// 95th percentile.
    P95,
    /// 98th percentile.
    P98,
    /// 99th percentile.
    P99,
    /// 99.9th percentile.
    P999,
    /// One-minute rate.
    Rate1,
    /// Five-minute rate.
    Rate5,
    /// Fifteen-minute rate.
    Rate15,
    /// Mean rate.
    MeanRate,
}

impl MetricType {
    /// Gets the suffix appended to a metric name on the wire.
    ///
    /// Gauges have no suffix.
    pub const fn as_str(&self) -> &'static str {
        match self {
            MetricType::Count => "count",
            MetricType::Min => "min",
            MetricType::Max => "max",
            MetricType::Avg => "avg",
            MetricType::Gauge => "",
            MetricType::StdDev => "stddev",
            MetricType::P50 => "p50",
            MetricType::P75 => "p75",
            MetricType::P95 => "p95",
            MetricType::P98 => "p98",
            MetricType::P99 => "p99",
            MetricType::P999 => "p999",
            MetricType::Rate1 => "rate_1",
            MetricType::Rate5 => "rate_5",
            MetricType::Rate15 => "rate_15",
            MetricType::MeanRate => "mean_rate",
        }
    }

    /// Classifies an attribute name reported by an external registry.
    ///
    /// `mean` maps to [`Avg`](MetricType::Avg), `max` to [`Max`](MetricType::Max) and `count` to
    /// [`Count`](MetricType::Count).  Everything else is treated as a gauge.
    pub fn from_name(name: &str) -> MetricType {
        match name.trim().to_ascii_lowercase().as_str() {
            "mean" => MetricType::Avg,
            "max" => MetricType::Max,
            "count" => MetricType::Count,
            _ => MetricType::Gauge,
        }
    }

    /// Whether or not values of this type are cumulative.
    pub const fn is_counter(&self) -> bool {
        matches!(self, MetricType::Count)
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
