use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics_agent::{AgentConfig, MetricAgent, PublisherConfig, PublisherKind};
use metrics_core::{MetricBucket, MetricType, Tags};
use metrics_exporter_prometheus::{PrometheusHandle, PrometheusPublisher};

fn wait_for_samples(handle: &PrometheusHandle, expected: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while handle.len() < expected && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn agent_cycle_is_exposed_for_scraping() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let mut config = PublisherConfig::new("prometheus", PublisherKind::Prometheus);
    config.block_list = Some(vec!["internal.*".into()]);
    let publisher = PrometheusPublisher::from_config(config).expect("valid config");
    let handle = publisher.handle();

    let requests = Arc::new(MetricBucket::with_post_labels("http.requests", MetricType::Count, ["status"]));
    let internal = Arc::new(MetricBucket::new("internal.queue", MetricType::Max));
    requests.metric("200").add(3.0);
    requests.metric("500").increment();
    internal.parent_metric().track(9.0);

    let agent = MetricAgent::builder(AgentConfig {
        collect_frequency: Duration::from_millis(100),
        send_only_recently_updated: false,
        ..Default::default()
    })
    .with_bucket(requests)
    .with_bucket(internal)
    .with_tags(Tags::new().with_app_name("web"))
    .with_publisher(Arc::new(publisher))
    .build()
    .expect("valid agent");

    agent.run_cycle();
    wait_for_samples(&handle, 2);

    let output = handle.render();
    assert!(output.contains("# TYPE web_http_requests_count counter\n"), "{}", output);
    assert!(output.contains("web_http_requests_count{status=\"200\"} 3\n"), "{}", output);
    assert!(output.contains("web_http_requests_count{status=\"500\"} 1\n"), "{}", output);
    assert!(!output.contains("internal"), "{}", output);
}
