//! Runs an agent publishing to a local Carbon endpoint and to memory.
//!
//! Start something listening on port 2003 first, for example `nc -lk 2003`.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use metrics_agent::{AgentConfig, MemoryPublisher, MetricAgent, PublisherConfig, PublisherKind, TagsConfig};
use metrics_core::{Metric, MetricBucket, MetricType};
use metrics_exporter_graphite::GraphitePublisher;

fn main() {
    tracing_subscriber::fmt::init();

    let mut graphite = PublisherConfig::new("graphite", PublisherKind::Graphite);
    graphite.host = "127.0.0.1".into();
    graphite.block_list = Some(vec!["*.debug".into()]);
    let graphite = GraphitePublisher::from_config(graphite).expect("invalid graphite configuration");

    let memory = MemoryPublisher::new("memory");
    let snapshotter = memory.snapshotter();

    let requests = Arc::new(MetricBucket::with_post_labels("requests", MetricType::Count, ["status"]));
    let latency = Arc::new(MetricBucket::new("latency", MetricType::Avg));
    let queue_depth = Arc::new(Metric::new("queue.depth", MetricType::Gauge));
    let depth = Arc::new(AtomicU64::new(0));

    let provided_depth = Arc::clone(&depth);
    let config = AgentConfig {
        collect_frequency: Duration::from_secs(2),
        ..Default::default()
    };
    let tags = TagsConfig { env: Some("dev".into()), app_name: Some("demo".into()), ..Default::default() }.to_tags();

    let handle = MetricAgent::builder(config)
        .with_bucket(Arc::clone(&requests))
        .with_bucket(Arc::clone(&latency))
        .with_value_provider(queue_depth, move || Some(provided_depth.load(Ordering::Relaxed) as f64))
        .with_tags(tags)
        .with_publisher(Arc::new(graphite))
        .with_publisher(Arc::new(memory))
        .build()
        .expect("invalid agent configuration")
        .start()
        .expect("failed to start agent");

    for i in 0..50u64 {
        let status = if i % 7 == 0 { "failed" } else { "ok" };
        requests.metric(status).increment();
        latency.parent_metric().track((i % 13) as f64);
        depth.store(i % 5, Ordering::Relaxed);
        thread::sleep(Duration::from_millis(100));
    }

    handle.stop();
    println!("published {} snapshots to memory", snapshotter.snapshots().len());
}
