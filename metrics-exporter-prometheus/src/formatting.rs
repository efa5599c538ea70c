//! Helpers for naming samples and rendering them in the Prometheus text exposition format.

use metrics_core::{MetricLabels, MetricType};

/// Builds the family name of a sample: `[app_]<name>[_<type suffix>]`.
///
/// Spaces, dashes and dots become underscores; anything else Prometheus does not accept in a
/// metric name is replaced as well.  Label values without a label name cannot become Prometheus
/// labels, so they stay part of the name.
pub fn family_name(app_name: Option<&str>, labels: &MetricLabels, metric_type: MetricType) -> String {
    let mut name = String::with_capacity(labels.metric_name().len() + 16);
    if let Some(app) = app_name.filter(|app| !app.trim().is_empty()) {
        name.push_str(app);
        name.push('_');
    }

    if labels.pre_label_name().is_none() {
        if let Some(value) = labels.pre_label_value() {
            name.push_str(value);
            name.push('_');
        }
    }
    name.push_str(labels.metric_name());
    for value in labels.post_label_values().iter().skip(labels.post_label_names().len()) {
        name.push('_');
        name.push_str(value);
    }

    let suffix = metric_type.as_str();
    if !suffix.is_empty() {
        name.push('_');
        name.push_str(suffix);
    }

    sanitize_metric_name(&name.replace([' ', '-', '.'], "_"))
}

/// Collects the named labels of a sample as sanitized Prometheus label pairs.
pub fn label_pairs(labels: &MetricLabels) -> Vec<(String, String)> {
    labels.pairs().map(|(name, value)| (sanitize_label_key(name), value.to_string())).collect()
}

/// Writes a `# TYPE` line.
pub fn write_type_line(buffer: &mut String, name: &str, metric_type: &str) {
    buffer.push_str("# TYPE ");
    buffer.push_str(name);
    buffer.push(' ');
    buffer.push_str(metric_type);
    buffer.push('\n');
}

/// Writes a sample line: `name{label="value",...} value`.
pub fn write_metric_line(buffer: &mut String, name: &str, labels: &[(String, String)], value: f64) {
    buffer.push_str(name);

    if !labels.is_empty() {
        buffer.push('{');
        for (i, (key, value)) in labels.iter().enumerate() {
            if i > 0 {
                buffer.push(',');
            }
            buffer.push_str(key);
            buffer.push_str("=\"");
            buffer.push_str(&sanitize_label_value(value));
            buffer.push('"');
        }
        buffer.push('}');
    }

    buffer.push(' ');
    write_value(buffer, value);
    buffer.push('\n');
}

fn write_value(buffer: &mut String, value: f64) {
    if value.is_nan() {
        buffer.push_str("NaN");
    } else if value.is_infinite() {
        buffer.push_str(if value.is_sign_positive() { "+Inf" } else { "-Inf" });
    } else {
        buffer.push_str(&value.to_string());
    }
}

/// Sanitizes a metric name to be valid under the Prometheus [data model].
///
/// [data model]: https://prometheus.io/docs/concepts/data_model/#metric-names-and-labels
pub fn sanitize_metric_name(name: &str) -> String {
    // The first character must be [a-zA-Z_:], and all subsequent characters must be [a-zA-Z0-9_:].
    name.chars()
        .enumerate()
        .map(|(i, c)| {
            if i == 0 && valid_metric_name_start_character(c)
                || i != 0 && valid_metric_name_character(c)
            {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Sanitizes a label key to be valid under the Prometheus [data model].
///
/// [data model]: https://prometheus.io/docs/concepts/data_model/#metric-names-and-labels
pub fn sanitize_label_key(key: &str) -> String {
    // The first character must be [a-zA-Z_], and all subsequent characters must be [a-zA-Z0-9_].
    key.chars()
        .enumerate()
        .map(|(i, c)| {
            if i == 0 && valid_label_key_start_character(c) || i != 0 && valid_label_key_character(c) {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Escapes backslashes, double quotes and line feeds in a label value.
pub fn sanitize_label_value(value: &str) -> String {
    let mut sanitized = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => sanitized.push_str("\\\\"),
            '"' => sanitized.push_str("\\\""),
            '\n' => sanitized.push_str("\\n"),
            c => sanitized.push(c),
        }
    }
    sanitized
}

#[inline]
fn valid_metric_name_start_character(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == ':'
}

#[inline]
fn valid_metric_name_character(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == ':'
}

#[inline]
fn valid_label_key_start_character(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

#[inline]
fn valid_label_key_character(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}
