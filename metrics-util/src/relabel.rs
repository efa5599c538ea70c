use std::collections::BTreeMap;

use metrics_core::MetricLabels;
use regex::Regex;

/// Extracts label values out of a metric's base name.
///
/// The regular expression must match the entire base name.  Each configured capture group becomes
/// a suffix label named after the mapped label name, and the captured text is cut out of the name.
#[derive(Clone, Debug)]
pub struct RelabelRule {
    regex: Regex,
    groups: BTreeMap<usize, String>,
}

impl RelabelRule {
    /// Creates a rule from a regular expression and a map of capture group index to label name.
    pub fn new(pattern: &str, groups: BTreeMap<usize, String>) -> Result<RelabelRule, regex::Error> {
        let regex = Regex::new(&format!("^(?:{})$", pattern))?;
        Ok(RelabelRule { regex, groups })
    }

    /// Gets the map of capture group index to label name.
    pub fn groups(&self) -> &BTreeMap<usize, String> {
        &self.groups
    }
}

/// Applies a list of relabel rules to metric labels.
#[derive(Clone, Debug, Default)]
pub struct Relabeler {
    rules: Vec<RelabelRule>,
}

impl Relabeler {
    /// Creates a relabeler from the given rules, applied in order.
    pub fn new(rules: Vec<RelabelRule>) -> Relabeler {
        Relabeler { rules }
    }

    /// Whether or not there are no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Relabels `labels`, returning `None` if no rule captured anything.
    ///
    /// Every rule is matched against the original base name.  Captured spans are removed from the
    /// name, which is then cleaned of repeated, leading and trailing dots.
    pub fn apply(&self, labels: &MetricLabels) -> Option<MetricLabels> {
        let name = labels.metric_name();
        let mut relabeled = labels.clone();
        let mut cuts = Vec::new();

        for rule in &self.rules {
            let Some(captures) = rule.regex.captures(name) else {
                continue;
            };
            for (index, label_name) in &rule.groups {
                if let Some(group) = captures.get(*index) {
                    relabeled = relabeled.with_post_label(label_name.as_str(), group.as_str());
                    cuts.push(group.range());
                }
            }
        }

        if cuts.is_empty() {
            return None;
        }

        cuts.sort_by_key(|range| range.start);
        let mut remaining = String::with_capacity(name.len());
        let mut position = 0;
        for cut in cuts {
            if cut.start >= position {
                remaining.push_str(&name[position..cut.start]);
            }
            position = position.max(cut.end);
        }
        remaining.push_str(&name[position..]);

        Some(relabeled.with_metric_name(collapse_dots(&remaining)))
    }
}

fn collapse_dots(name: &str) -> String {
    name.split('.').filter(|segment| !segment.is_empty()).collect::<Vec<_>>().join(".")
}
