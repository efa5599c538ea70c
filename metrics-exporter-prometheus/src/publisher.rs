use std::sync::Arc;

use metrics_agent::{ConfigError, PublishError, Publisher, PublisherConfig, PublisherKind};
use metrics_core::MetricSnapshot;
use metrics_util::Relabeler;
use tracing::{debug, trace};

use crate::formatting::{family_name, label_pairs};
use crate::registry::{FamilyKind, Registry};

/// Handle for reading what a [`PrometheusPublisher`] has received.
///
/// Cheap to clone; typically handed to whatever serves the scrape endpoint.
#[derive(Clone, Debug)]
pub struct PrometheusHandle {
    registry: Arc<Registry>,
}

impl PrometheusHandle {
    /// Renders the latest value of every sample in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.registry.render()
    }

    /// Gets the number of distinct samples held.
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    /// Whether or not no sample has been received yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets every sample received so far.
    pub fn clear(&self) {
        self.registry.clear();
    }
}

/// Publishes snapshots into an in-process registry for Prometheus to scrape.
///
/// Each snapshot replaces the previous value of its sample.  Relabel rules run first, turning
/// parts of the base name into labels; the family name is then built from the application tag,
/// the metric name and the type suffix.
#[derive(Debug)]
pub struct PrometheusPublisher {
    config: PublisherConfig,
    relabeler: Relabeler,
    registry: Arc<Registry>,
}

impl PrometheusPublisher {
    /// Creates a Prometheus publisher from configuration.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, has a malformed relabel pattern, or is not meant for a
    /// Prometheus publisher, an error variant will be returned.
    pub fn from_config(config: PublisherConfig) -> Result<PrometheusPublisher, ConfigError> {
        config.validate()?;
        config.expect_kind(PublisherKind::Prometheus)?;
        let relabeler = config.relabeler()?;

        Ok(PrometheusPublisher { config, relabeler, registry: Arc::default() })
    }

    /// Gets a handle for rendering the registry.
    pub fn handle(&self) -> PrometheusHandle {
        PrometheusHandle { registry: Arc::clone(&self.registry) }
    }

    fn record(&self, snapshot: &MetricSnapshot) {
        let relabeled = self.relabeler.apply(snapshot.labels());
        let labels = relabeled.as_ref().unwrap_or_else(|| snapshot.labels());

        let tags = self.config.tags.as_ref().unwrap_or_else(|| snapshot.tags());
        let name = family_name(tags.app_name(), labels, snapshot.metric_type());
        trace!(publisher = %self.config.name, metric = %name, value = snapshot.value(), "Recording sample.");

        self.registry.update(
            name,
            FamilyKind::from_metric_type(snapshot.metric_type()),
            label_pairs(labels),
            snapshot.value(),
        );
    }
}

impl Publisher for PrometheusPublisher {
    fn config(&self) -> &PublisherConfig {
        &self.config
    }

    fn publish(&self, batch: &[MetricSnapshot]) -> Result<(), PublishError> {
        for snapshot in batch {
            self.record(snapshot);
        }
        debug!(publisher = %self.config.name, batch_len = batch.len(), "Recorded metrics.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::PrometheusPublisher;
    use metrics_agent::{Publisher, PublisherConfig, PublisherKind, RelabelConfig};
    use metrics_core::{MetricLabels, MetricSnapshot, MetricType, Tags};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn snapshot(labels: MetricLabels, metric_type: MetricType, value: f64) -> MetricSnapshot {
        MetricSnapshot::new(labels, metric_type, value, 0, Arc::new(Tags::new().with_app_name("shop")))
    }

    #[test]
    fn renders_latest_samples() {
        let publisher =
            PrometheusPublisher::from_config(PublisherConfig::new("prometheus", PublisherKind::Prometheus)).unwrap();
        let handle = publisher.handle();

        let ok = MetricLabels::new("requests").with_post_label("status", "ok");
        publisher.publish(&[snapshot(ok.clone(), MetricType::Count, 1.0)]).unwrap();
        publisher
            .publish(&[snapshot(ok, MetricType::Count, 4.0), snapshot("latency".into(), MetricType::Avg, 2.5)])
            .unwrap();

        assert_eq!(handle.len(), 2);
        assert_eq!(
            handle.render(),
            "# TYPE shop_requests_count counter\n\
             shop_requests_count{status=\"ok\"} 4\n\
             \n\
             # TYPE shop_latency_avg gauge\n\
             shop_latency_avg 2.5\n\
             \n"
        );
    }

    #[test]
    fn relabels_before_recording() {
        let mut config = PublisherConfig::new("prometheus", PublisherKind::Prometheus);
        config.tags = Some(Tags::new());
        config.relabel.push(RelabelConfig {
            pattern: r"db\.([^.]+)\.table\.([^.]+)\.inserts".into(),
            groups: BTreeMap::from([(1, "database".to_string()), (2, "table".to_string())]),
        });
        let publisher = PrometheusPublisher::from_config(config).unwrap();
        let handle = publisher.handle();

        publisher
            .publish(&[snapshot("db.database1.table.users.inserts".into(), MetricType::Count, 1.0)])
            .unwrap();

        assert_eq!(
            handle.render(),
            "# TYPE db_table_inserts_count counter\n\
             db_table_inserts_count{database=\"database1\",table=\"users\"} 1\n\
             \n"
        );
    }

    #[test]
    fn rejects_bad_configuration() {
        let mut config = PublisherConfig::new("prometheus", PublisherKind::Prometheus);
        config.relabel.push(RelabelConfig { pattern: "(".into(), groups: BTreeMap::new() });
        assert!(PrometheusPublisher::from_config(config).is_err());

        let config = PublisherConfig::new("prometheus", PublisherKind::Graphite);
        assert!(PrometheusPublisher::from_config(config).is_err());
    }
}
