//! Metric accumulators, labels and buckets.
//!
//! This crate holds the value model of the metrics agent:
//!
//! - [`Metric`]: a typed, thread-safe accumulator with type-specific reset semantics
//! - [`MetricLabels`]: the structural identity of a metric name
//! - [`MetricBucket`]: a concurrent registry that lazily creates exactly one metric per label
//!   combination
//! - [`MetricSnapshot`]: the immutable value handed to publishers
//! - [`ValueProvider`] and [`MetricRegistry`]: pull-based sources of values
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod atomics;

mod bucket;
pub use self::bucket::MetricBucket;

mod kind;
pub use self::kind::MetricType;

mod labels;
pub use self::labels::MetricLabels;

mod metric;
pub use self::metric::Metric;

mod provider;
pub use self::provider::{MetricRegistry, MetricSnapshotValue, ValueProvider};

mod snapshot;
pub use self::snapshot::MetricSnapshot;

mod tags;
pub use self::tags::Tags;
