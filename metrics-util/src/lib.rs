//! Helper types used by metrics agent publishers.
//!
//! - [`filter`]: allow-lists and block-lists deciding which metrics a publisher receives
//! - [`CounterDiff`]: per-publisher conversion of cumulative counters into deltas
//! - [`RelabelRule`] and [`Relabeler`]: extraction of label values out of metric names
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

pub mod filter;
pub use filter::{AllowList, BlockList, FilterChain, MetricFilter};

mod diff;
pub use diff::CounterDiff;

mod relabel;
pub use relabel::{RelabelRule, Relabeler};
