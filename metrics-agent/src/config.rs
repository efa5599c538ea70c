//! Configuration value objects.
//!
//! Every struct carries its defaults through `Default` and is checked with `validate` by the
//! constructors that consume it, so invalid configuration fails fast instead of surfacing later as
//! silently dropped metrics.
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use metrics_core::Tags;
use metrics_util::{AllowList, BlockList, FilterChain, RelabelRule, Relabeler};
use tracing::warn;

use crate::error::ConfigError;

/// Batch size used when a publisher is configured with a batch size of zero.
pub const DEFAULT_BATCH_SIZE: usize = 500;

const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_WAIT_TIME: Duration = Duration::from_secs(20);
const DEFAULT_SUCCESS_THRESHOLD: u32 = 3;
const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
const DEFAULT_CONNECT_WAIT_TIME: Duration = Duration::from_secs(1);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_COLLECT_FREQUENCY: Duration = Duration::from_secs(60);
const DEFAULT_WORKER_THREADS: usize = 4;

/// Retry policy for a publisher.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicyConfig {
    /// Whether or not failed publishes are retried.
    ///
    /// Defaults to `true`.
    pub enabled: bool,

    /// Number of retries after the first failed attempt.
    ///
    /// Defaults to 3.  Must be positive.
    pub retry_attempts: u32,

    /// Delay between attempts.
    ///
    /// Defaults to 20 seconds.  A zero delay retries immediately.
    pub retry_wait_time: Duration,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        RetryPolicyConfig {
            enabled: true,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_wait_time: DEFAULT_RETRY_WAIT_TIME,
        }
    }
}

impl RetryPolicyConfig {
    /// Checks that the policy is usable.
    ///
    /// # Errors
    ///
    /// If `retry_attempts` is zero, an error variant will be returned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry_attempts == 0 {
            return Err(ConfigError::invalid("retry.retry_attempts", "must be a positive number"));
        }
        Ok(())
    }
}

/// Circuit breaker policy for a publisher.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Whether or not a circuit breaker guards the publisher.
    ///
    /// Defaults to `true`.
    pub enabled: bool,

    /// Consecutive successes needed, while half-open, to close the circuit again.
    ///
    /// Defaults to 3.  Must be positive.
    pub success_threshold: u32,

    /// Consecutive failures needed to open the circuit.
    ///
    /// Defaults to 3.  Must be positive.
    pub failure_threshold: u32,

    /// Time the circuit stays open before the next call is let through as a probe.
    ///
    /// Defaults to 1 second.
    pub connect_wait_time: Duration,

    /// Calls taking longer than this are counted as failures.
    ///
    /// Defaults to 1 second.  Zero disables the check.
    pub request_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerConfig {
            enabled: true,
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            connect_wait_time: DEFAULT_CONNECT_WAIT_TIME,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl CircuitBreakerConfig {
    /// Checks that the policy is usable.
    ///
    /// # Errors
    ///
    /// If either threshold is zero, an error variant will be returned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.success_threshold == 0 {
            return Err(ConfigError::invalid(
                "circuit_breaker.success_threshold",
                "must be a positive number",
            ));
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid(
                "circuit_breaker.failure_threshold",
                "must be a positive number",
            ));
        }
        Ok(())
    }
}

/// Kind of backend a publisher talks to.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PublisherKind {
    /// Graphite plaintext protocol over TCP.
    Graphite,
    /// In-process Prometheus registry.
    Prometheus,
    /// In-memory recording, for tests.
    Memory,
}

impl PublisherKind {
    /// Gets the configuration tag of this kind.
    pub const fn as_str(&self) -> &'static str {
        match self {
            PublisherKind::Graphite => "graphite",
            PublisherKind::Prometheus => "prometheus",
            PublisherKind::Memory => "memory",
        }
    }
}

impl fmt::Display for PublisherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PublisherKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "graphite" => Ok(PublisherKind::Graphite),
            "prometheus" => Ok(PublisherKind::Prometheus),
            "memory" => Ok(PublisherKind::Memory),
            _ => Err(ConfigError::UnknownPublisherKind(s.to_string())),
        }
    }
}

/// A relabel rule as configured: a regular expression plus capture group to label name mappings.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RelabelConfig {
    /// Regular expression that must match the entire base metric name.
    pub pattern: String,

    /// Capture group index to label name.
    pub groups: BTreeMap<usize, String>,
}

/// Configuration of a single publisher.
#[derive(Clone, Debug, PartialEq)]
pub struct PublisherConfig {
    /// Name of the publisher, used in logs.  Must not be blank.
    pub name: String,

    /// Kind of backend.
    pub kind: PublisherKind,

    /// Backend host, for network publishers.
    pub host: String,

    /// Backend port, for network publishers.  `None` uses the backend's default.
    pub port: Option<u16>,

    /// Maximum number of snapshots per publish call.
    ///
    /// Defaults to 500.  Zero means the default.
    pub batch_size: usize,

    /// Socket timeout for network publishers.
    ///
    /// Defaults to 10 seconds.
    pub socket_timeout: Duration,

    /// Tags overriding the process tags carried by each snapshot.
    pub tags: Option<Tags>,

    /// Patterns of which at least one must match.  `None` disables the allow-list.
    pub allow_list: Option<Vec<String>>,

    /// Patterns of which none may match.  `None` disables the block-list.
    pub block_list: Option<Vec<String>>,

    /// Relabel rules, applied in order by publishers that support labels.
    pub relabel: Vec<RelabelConfig>,

    /// Whether or not counters are sent as deltas since this publisher's previous observation.
    ///
    /// Defaults to `false`.
    pub reset_counters: bool,

    /// Retry policy.
    pub retry: RetryPolicyConfig,

    /// Circuit breaker policy.
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        PublisherConfig {
            name: String::new(),
            kind: PublisherKind::Memory,
            host: String::new(),
            port: None,
            batch_size: DEFAULT_BATCH_SIZE,
            socket_timeout: DEFAULT_SOCKET_TIMEOUT,
            tags: None,
            allow_list: None,
            block_list: None,
            relabel: Vec::new(),
            reset_counters: false,
            retry: RetryPolicyConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl PublisherConfig {
    /// Creates a configuration with default settings.
    pub fn new<N: Into<String>>(name: N, kind: PublisherKind) -> PublisherConfig {
        PublisherConfig { name: name.into(), kind, ..Default::default() }
    }

    /// Checks that the configuration is usable.
    ///
    /// # Errors
    ///
    /// If the name is blank, a policy is invalid, or a relabel pattern does not compile, an error
    /// variant will be returned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::invalid("name", "must not be blank"));
        }
        self.retry.validate()?;
        self.circuit_breaker.validate()?;
        self.relabeler().map(|_| ())
    }

    /// Ensures this configuration is meant for a publisher of `expected` kind.
    ///
    /// # Errors
    ///
    /// If the configured kind differs, an error variant will be returned.
    pub fn expect_kind(&self, expected: PublisherKind) -> Result<(), ConfigError> {
        if self.kind != expected {
            return Err(ConfigError::KindMismatch {
                name: self.name.clone(),
                expected: expected.as_str(),
                actual: self.kind.as_str(),
            });
        }
        Ok(())
    }

    /// Gets the batch size, substituting the default for zero.
    pub fn effective_batch_size(&self) -> usize {
        if self.batch_size == 0 {
            DEFAULT_BATCH_SIZE
        } else {
            self.batch_size
        }
    }

    /// Builds the filter chain described by the allow-list and block-list.
    pub fn filters(&self) -> FilterChain {
        let mut chain = FilterChain::new();
        if let Some(patterns) = &self.allow_list {
            if patterns.iter().all(|p| p.trim().is_empty()) {
                warn!(publisher = %self.name, "Allow-list has no usable patterns; no metrics will be published.");
            }
            chain.push(AllowList::new(patterns));
        }
        if let Some(patterns) = &self.block_list {
            chain.push(BlockList::new(patterns));
        }
        chain
    }

    /// Compiles the relabel rules.
    ///
    /// # Errors
    ///
    /// If a pattern is not a valid regular expression, an error variant will be returned.
    pub fn relabeler(&self) -> Result<Relabeler, ConfigError> {
        let rules = self
            .relabel
            .iter()
            .map(|rule| {
                RelabelRule::new(&rule.pattern, rule.groups.clone()).map_err(|source| {
                    ConfigError::InvalidRelabelPattern { pattern: rule.pattern.clone(), source }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Relabeler::new(rules))
    }
}

/// Where cumulative counters are turned into per-cycle values.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum CounterReset {
    /// Counters are never reset by the agent; each publisher with
    /// [`reset_counters`](PublisherConfig::reset_counters) enabled diffs them against its own previous
    /// observation.
    ///
    /// This stays correct when several publishers read the same counter.
    #[default]
    Publisher,

    /// The agent resets counters every cycle, so every publisher receives per-cycle values.
    ///
    /// Only correct with a single consumer of each counter.
    Agent,
}

/// Configuration of the collection agent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentConfig {
    /// Period between collection cycles.
    ///
    /// Defaults to 60 seconds.  Must be non-zero.
    pub collect_frequency: Duration,

    /// Whether or not metrics not tracked within the last period are skipped.
    ///
    /// Defaults to `true`.
    pub send_only_recently_updated: bool,

    /// Where counters are reset.
    ///
    /// Defaults to [`CounterReset::Publisher`].
    pub counter_reset: CounterReset,

    /// Number of threads executing publish calls.
    ///
    /// Defaults to 4.  Must be positive.
    pub worker_threads: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            collect_frequency: DEFAULT_COLLECT_FREQUENCY,
            send_only_recently_updated: true,
            counter_reset: CounterReset::default(),
            worker_threads: DEFAULT_WORKER_THREADS,
        }
    }
}

impl AgentConfig {
    /// Checks that the configuration is usable.
    ///
    /// # Errors
    ///
    /// If the frequency or the worker count is zero, an error variant will be returned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.collect_frequency.is_zero() {
            return Err(ConfigError::invalid("collect_frequency", "must be non-zero"));
        }
        if self.worker_threads == 0 {
            return Err(ConfigError::invalid("worker_threads", "must be a positive number"));
        }
        Ok(())
    }
}

/// Process identity used to build [`Tags`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TagsConfig {
    /// Environment, such as `prod`.
    pub env: Option<String>,
    /// Application name.
    pub app_name: Option<String>,
    /// Region.
    pub region: Option<String>,
    /// Cluster.
    pub cluster: Option<String>,
    /// Whether or not the short hostname of the machine is included.
    ///
    /// Defaults to `true`.
    pub use_hostname: bool,
}

impl Default for TagsConfig {
    fn default() -> Self {
        TagsConfig { env: None, app_name: None, region: None, cluster: None, use_hostname: true }
    }
}

impl TagsConfig {
    /// Builds the tags, looking up the hostname if requested.
    ///
    /// A hostname that cannot be resolved is left out rather than failing.
    pub fn to_tags(&self) -> Tags {
        let hostname = if self.use_hostname { short_hostname() } else { None };
        self.to_tags_with_hostname(hostname)
    }

    fn to_tags_with_hostname(&self, hostname: Option<String>) -> Tags {
        let mut tags = Tags::new();
        if let Some(env) = &self.env {
            tags = tags.with_env(env.as_str());
        }
        if let Some(app_name) = &self.app_name {
            tags = tags.with_app_name(app_name.as_str());
        }
        if let Some(region) = &self.region {
            tags = tags.with_region(region.as_str());
        }
        if let Some(cluster) = &self.cluster {
            tags = tags.with_cluster(cluster.as_str());
        }
        if let Some(hostname) = hostname {
            tags = tags.with_hostname(hostname);
        }
        tags
    }
}

fn short_hostname() -> Option<String> {
    match nix::unistd::gethostname() {
        Ok(name) => match name.into_string() {
            Ok(name) => truncate_hostname(&name),
            Err(name) => {
                warn!(hostname = ?name, "Hostname is not valid UTF-8; leaving it out of tags.");
                None
            }
        },
        Err(e) => {
            warn!(error = %e, "Failed to resolve hostname; leaving it out of tags.");
            None
        }
    }
}

fn truncate_hostname(name: &str) -> Option<String> {
    let short = name.split('.').next().unwrap_or_default().trim();
    if short.is_empty() {
        None
    } else {
        Some(short.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_core::{MetricLabels, MetricSnapshot, MetricType};
    use metrics_util::MetricFilter;
    use std::sync::Arc;

    #[test]
    fn defaults() {
        let publisher = PublisherConfig::default();
        assert_eq!(publisher.batch_size, 500);
        assert_eq!(publisher.socket_timeout, Duration::from_secs(10));
        assert!(!publisher.reset_counters);
        assert_eq!(publisher.retry.retry_attempts, 3);
        assert_eq!(publisher.retry.retry_wait_time, Duration::from_secs(20));
        assert_eq!(publisher.circuit_breaker.success_threshold, 3);
        assert_eq!(publisher.circuit_breaker.failure_threshold, 3);
        assert_eq!(publisher.circuit_breaker.connect_wait_time, Duration::from_secs(1));
        assert_eq!(publisher.circuit_breaker.request_timeout, Duration::from_secs(1));

        let agent = AgentConfig::default();
        assert_eq!(agent.collect_frequency, Duration::from_secs(60));
        assert!(agent.send_only_recently_updated);
        assert_eq!(agent.counter_reset, CounterReset::Publisher);
    }

    #[test]
    fn validation() {
        assert!(PublisherConfig::default().validate().is_err());
        assert!(PublisherConfig::new("  ", PublisherKind::Memory).validate().is_err());
        assert!(PublisherConfig::new("graphite", PublisherKind::Graphite).validate().is_ok());

        let mut config = PublisherConfig::new("graphite", PublisherKind::Graphite);
        config.retry.retry_attempts = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "retry.retry_attempts", .. }));

        let mut config = PublisherConfig::new("graphite", PublisherKind::Graphite);
        config.circuit_breaker.failure_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = PublisherConfig::new("graphite", PublisherKind::Graphite);
        config.retry.retry_wait_time = Duration::ZERO;
        config.circuit_breaker.request_timeout = Duration::ZERO;
        assert!(config.validate().is_ok());

        let config = AgentConfig { collect_frequency: Duration::ZERO, ..Default::default() };
        assert!(config.validate().is_err());
        let config = AgentConfig { worker_threads: 0, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_relabel_pattern() {
        let mut config = PublisherConfig::new("prometheus", PublisherKind::Prometheus);
        config.relabel.push(RelabelConfig { pattern: "requests.(".into(), groups: BTreeMap::new() });

        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRelabelPattern { .. }));
    }

    #[test]
    fn publisher_kinds() {
        assert_eq!("graphite".parse::<PublisherKind>().unwrap(), PublisherKind::Graphite);
        assert_eq!(" Prometheus ".parse::<PublisherKind>().unwrap(), PublisherKind::Prometheus);
        assert_eq!("memory".parse::<PublisherKind>().unwrap(), PublisherKind::Memory);
        assert!(matches!(
            "opentsdb".parse::<PublisherKind>(),
            Err(ConfigError::UnknownPublisherKind(kind)) if kind == "opentsdb"
        ));

        let config = PublisherConfig::new("graphite", PublisherKind::Graphite);
        assert!(config.expect_kind(PublisherKind::Graphite).is_ok());
        assert!(matches!(
            config.expect_kind(PublisherKind::Prometheus),
            Err(ConfigError::KindMismatch { expected: "prometheus", actual: "graphite", .. })
        ));
    }

    #[test]
    fn batch_size_zero_means_default() {
        let mut config = PublisherConfig::new("graphite", PublisherKind::Graphite);
        config.batch_size = 0;
        assert_eq!(config.effective_batch_size(), 500);
        config.batch_size = 7;
        assert_eq!(config.effective_batch_size(), 7);
    }

    #[test]
    fn filters_from_lists() {
        let snapshot = |name: &str| {
            MetricSnapshot::new(MetricLabels::new(name), MetricType::Count, 1.0, 0, Arc::default())
        };

        let config = PublisherConfig::new("graphite", PublisherKind::Graphite);
        assert!(config.filters().is_empty());
        assert!(config.filters().is_allowed(&snapshot("anything")));

        let mut config = PublisherConfig::new("graphite", PublisherKind::Graphite);
        config.allow_list = Some(vec!["requests".into()]);
        config.block_list = Some(vec!["*.failed*".into()]);
        let filters = config.filters();
        assert!(filters.is_allowed(&snapshot("requests.ok")));
        assert!(!filters.is_allowed(&snapshot("requests.failed")));
        assert!(!filters.is_allowed(&snapshot("latency")));

        let mut config = PublisherConfig::new("graphite", PublisherKind::Graphite);
        config.allow_list = Some(Vec::new());
        assert!(!config.filters().is_allowed(&snapshot("requests")));
    }

    #[test]
    fn tags_from_config() {
        let config = TagsConfig {
            env: Some("prod".into()),
            app_name: Some("api".into()),
            region: None,
            cluster: Some(" ".into()),
            use_hostname: true,
        };

        let tags = config.to_tags_with_hostname(truncate_hostname("web01.us-east.example.com"));
        assert_eq!(tags.prefix('.'), "prod.api.web01");

        let tags = config.to_tags_with_hostname(truncate_hostname(".example.com"));
        assert_eq!(tags.hostname(), None);

        let without_host = TagsConfig { use_hostname: false, ..config };
        assert_eq!(without_host.to_tags().hostname(), None);
    }
}
