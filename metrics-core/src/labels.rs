use std::fmt;

/// Structural identity of a metric.
///
/// A metric name is made of a base name, an optional prefix label, and an ordered list of suffix
/// labels.  Each label has a name and a value; the names describe what a segment means, while the
/// values are what end up in the rendered wire name.  Two `MetricLabels` are equal only if all of
/// their components are equal, which makes them suitable as registry keys.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct MetricLabels {
    metric_name: String,
    pre_label_name: Option<String>,
    pre_label_value: Option<String>,
    post_label_names: Vec<String>,
    post_label_values: Vec<String>,
}

impl MetricLabels {
    /// Creates labels consisting of only a base name.
    pub fn new<N: Into<String>>(metric_name: N) -> MetricLabels {
        MetricLabels { metric_name: metric_name.into(), ..Default::default() }
    }

    /// Replaces the base name.
    pub fn with_metric_name<N: Into<String>>(mut self, metric_name: N) -> Self {
        self.metric_name = metric_name.into();
        self
    }

    /// Sets the name of the prefix label.
    pub fn with_pre_label_name<N: Into<String>>(mut self, name: N) -> Self {
        self.pre_label_name = Some(name.into());
        self
    }

    /// Sets the value of the prefix label.
    pub fn with_pre_label_value<V: Into<String>>(mut self, value: V) -> Self {
        self.pre_label_value = Some(value.into());
        self
    }

    /// Sets both the name and value of the prefix label.
    pub fn with_pre_label<N, V>(self, name: N, value: V) -> Self
    where
        N: Into<String>,
        V: Into<String>,
    {
        self.with_pre_label_name(name).with_pre_label_value(value)
    }

    /// Replaces the suffix label names.
    pub fn with_post_label_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.post_label_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the suffix label values.
    pub fn with_post_label_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.post_label_values = values.into_iter().map(Into::into).collect();
        self
    }

    /// Appends a suffix label.
    pub fn with_post_label<N, V>(mut self, name: N, value: V) -> Self
    where
        N: Into<String>,
        V: Into<String>,
    {
        self.post_label_names.push(name.into());
        self.post_label_values.push(value.into());
        self
    }

    /// Gets the base name.
    pub fn metric_name(&self) -> &str {
        &self.metric_name
    }

    /// Gets the name of the prefix label, if any.
    pub fn pre_label_name(&self) -> Option<&str> {
        self.pre_label_name.as_deref()
    }

    /// Gets the value of the prefix label, if any.
    pub fn pre_label_value(&self) -> Option<&str> {
        self.pre_label_value.as_deref()
    }

    /// Gets the suffix label names.
    pub fn post_label_names(&self) -> &[String] {
        &self.post_label_names
    }

    /// Gets the suffix label values.
    pub fn post_label_values(&self) -> &[String] {
        &self.post_label_values
    }

    /// Iterates over the label pairs that have both a name and a value.
    ///
    /// The prefix label comes first, followed by the suffix labels in order.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        let pre = match (&self.pre_label_name, &self.pre_label_value) {
            (Some(name), Some(value)) => Some((name.as_str(), value.as_str())),
            _ => None,
        };
        let post = self
            .post_label_names
            .iter()
            .zip(self.post_label_values.iter())
            .map(|(name, value)| (name.as_str(), value.as_str()));
        pre.into_iter().chain(post)
    }

    /// Drops a prefix label that has a name but no value.
    ///
    /// Such labels describe a slot rather than a concrete metric, and would otherwise produce keys
    /// that no lookup can ever reach.
    pub fn normalize(self) -> MetricLabels {
        if self.pre_label_name.is_some() && self.pre_label_value.is_none() {
            return MetricLabels { pre_label_name: None, ..self };
        }
        self
    }

    /// Renders the wire name: `[preValue<d>]metricName[<d>postValue]...`.
    pub fn format(&self, delimiter: char) -> String {
        let mut out = String::with_capacity(self.metric_name.len() + 16);
        if let Some(value) = &self.pre_label_value {
            out.push_str(value);
            out.push(delimiter);
        }
        out.push_str(&self.metric_name);
        for value in &self.post_label_values {
            out.push(delimiter);
            out.push_str(value);
        }
        out
    }

    /// Renders the name with the label names interleaved in front of their values.
    pub fn format_with_names(&self, delimiter: char) -> String {
        let mut out = String::with_capacity(self.metric_name.len() + 32);
        for segment in self.pre_label_name.iter().chain(self.pre_label_value.iter()) {
            out.push_str(segment);
            out.push(delimiter);
        }
        out.push_str(&self.metric_name);
        for (i, value) in self.post_label_values.iter().enumerate() {
            if let Some(name) = self.post_label_names.get(i) {
                out.push(delimiter);
                out.push_str(name);
            }
            out.push(delimiter);
            out.push_str(value);
        }
        out
    }
}

impl From<&str> for MetricLabels {
    fn from(name: &str) -> Self {
        MetricLabels::new(name)
    }
}

impl From<String> for MetricLabels {
    fn from(name: String) -> Self {
        MetricLabels::new(name)
    }
}

impl fmt::Display for MetricLabels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format('.'))
    }
}
