use indexmap::IndexMap;
use metrics_core::MetricType;
use parking_lot::Mutex;
use tracing::warn;

use crate::formatting::{write_metric_line, write_type_line};

/// Prometheus metric type of a family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FamilyKind {
    /// Monotonic counter.
    Counter,
    /// Arbitrary value.
    Gauge,
}

impl FamilyKind {
    /// Maps an agent metric type onto a Prometheus type.
    pub fn from_metric_type(metric_type: MetricType) -> FamilyKind {
        if metric_type.is_counter() {
            FamilyKind::Counter
        } else {
            FamilyKind::Gauge
        }
    }

    /// Gets the name used on `# TYPE` lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            FamilyKind::Counter => "counter",
            FamilyKind::Gauge => "gauge",
        }
    }
}

type LabelSet = Vec<(String, String)>;

#[derive(Debug)]
struct Family {
    kind: FamilyKind,
    samples: IndexMap<LabelSet, f64>,
}

/// Latest value of every sample received, grouped by family.
///
/// Families and samples render in the order they were first seen.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    families: Mutex<IndexMap<String, Family>>,
}

impl Registry {
    /// Stores `value` as the latest value of the sample, replacing any previous one.
    pub fn update(&self, name: String, kind: FamilyKind, labels: LabelSet, value: f64) {
        let mut families = self.families.lock();
        let family = families.entry(name).or_insert_with(|| Family { kind, samples: IndexMap::new() });
        if family.kind != kind {
            warn!(
                from = family.kind.as_str(),
                to = kind.as_str(),
                "Metric family changed type. Dropping previous samples."
            );
            family.kind = kind;
            family.samples.clear();
        }
        family.samples.insert(labels, value);
    }

    /// Gets the number of distinct samples.
    pub fn len(&self) -> usize {
        self.families.lock().values().map(|family| family.samples.len()).sum()
    }

    /// Forgets every sample.
    pub fn clear(&self) {
        self.families.lock().clear();
    }

    /// Renders every family in the text exposition format.
    pub fn render(&self) -> String {
        let families = self.families.lock();
        let mut output = String::new();
        for (name, family) in families.iter() {
            write_type_line(&mut output, name, family.kind.as_str());
            for (labels, value) in &family.samples {
                write_metric_line(&mut output, name, labels, *value);
            }
            output.push('\n');
        }
        output
    }
}
