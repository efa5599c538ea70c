//! A metrics agent publisher that exposes the latest published values to Prometheus.
//!
//! Prometheus pulls rather than receives, so this publisher keeps the most recent value of every
//! sample it is handed in an in-process registry.  A [`PrometheusHandle`] renders that registry in
//! the text exposition format, ready to be served from whatever HTTP endpoint the application
//! already runs.
//!
//! # Naming
//!
//! The family name is `[<app>_]<metric name>[_<type suffix>]`, with spaces, dashes and dots turned
//! into underscores.  Named prefix and suffix labels become Prometheus labels.  Counters are
//! exposed as `counter` families, every other type as `gauge`.
//!
//! # Relabeling
//!
//! Relabel rules extract label values out of dotted names.  With the pattern
//! `db\.([^.]+)\.table\.([^.]+)\.inserts` mapping group 1 to `database` and group 2 to `table`,
//! `db.database1.table.users.inserts` is exposed as
//! `db_table_inserts_count{database="database1",table="users"}`.
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

pub mod formatting;

mod publisher;
pub use self::publisher::{PrometheusHandle, PrometheusPublisher};

mod registry;
pub use self::registry::FamilyKind;
