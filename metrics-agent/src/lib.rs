//! A background agent that harvests metrics and publishes them.
//!
//! The agent runs a fixed-rate collection cycle on its own thread.  Each cycle reads the registered
//! [`Metric`](metrics_core::Metric)s and [`MetricBucket`](metrics_core::MetricBucket)s, applies
//! value providers and the recency policy, resets what needs resetting, and hands the resulting
//! snapshots to a [`BufferedClient`].  The client fans snapshots out to every [`Publisher`] on a
//! worker pool, with each publish call guarded by a [`Dispatcher`] that retries failures and opens
//! a circuit breaker around backends that keep failing.
//!
//! Nothing on the publishing path ever reaches the instrumented application: failures are logged
//! through `tracing` and the affected batch is dropped.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use metrics_agent::{AgentConfig, MemoryPublisher, MetricAgent, TagsConfig};
//! use metrics_core::{MetricBucket, MetricType};
//!
//! let requests = Arc::new(MetricBucket::with_post_labels("requests", MetricType::Count, ["status"]));
//! requests.metric("ok").increment();
//!
//! let tags = TagsConfig { env: Some("prod".into()), ..Default::default() }.to_tags();
//! let handle = MetricAgent::builder(AgentConfig::default())
//!     .with_bucket(requests)
//!     .with_tags(tags)
//!     .with_publisher(Arc::new(MemoryPublisher::new("memory")))
//!     .build()
//!     .expect("invalid agent configuration")
//!     .start()
//!     .expect("failed to start agent");
//!
//! // ... later, on shutdown:
//! handle.stop();
//! ```
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod agent;
pub use self::agent::{AgentHandle, MetricAgent, MetricAgentBuilder};

mod client;
pub use self::client::{BufferedClient, MetricClient};

mod config;
pub use self::config::{
    AgentConfig, CircuitBreakerConfig, CounterReset, PublisherConfig, PublisherKind, RelabelConfig,
    RetryPolicyConfig, TagsConfig, DEFAULT_BATCH_SIZE,
};

mod dispatcher;
pub use self::dispatcher::{CircuitState, Dispatched, Dispatcher};

mod error;
pub use self::error::{AgentError, ConfigError, PublishError};

mod memory;
pub use self::memory::{MemoryPublisher, Snapshotter};

mod pool;

mod publisher;
pub use self::publisher::Publisher;
