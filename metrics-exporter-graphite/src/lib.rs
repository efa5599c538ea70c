//! A metrics agent publisher that writes the Graphite plaintext protocol over TCP.
//!
//! Every batch is written over a fresh TCP connection to the configured Carbon endpoint, one line
//! per snapshot:
//!
//! ```text
//! <tags>.<name>[.<type suffix>] <value> <unix seconds>
//! ```
//!
//! The tags prefix is built from the publisher's configured [`Tags`] if any, otherwise from the
//! tags carried by the snapshot.  Values are rendered with two decimals.
//!
//! # Usage
//!
//! ```no_run
//! use metrics_agent::{PublisherConfig, PublisherKind};
//! use metrics_exporter_graphite::GraphitePublisher;
//!
//! let mut config = PublisherConfig::new("graphite", PublisherKind::Graphite);
//! config.host = "carbon.example.com".into();
//! let publisher = GraphitePublisher::from_config(config).expect("invalid graphite configuration");
//! ```
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]
use std::io::{self, BufWriter, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use metrics_agent::{ConfigError, PublishError, Publisher, PublisherConfig, PublisherKind};
use metrics_core::{MetricSnapshot, Tags};
use tracing::{debug, error, trace};

/// Default Carbon plaintext port.
pub const DEFAULT_PORT: u16 = 2003;

/// Publishes snapshots to Graphite.
#[derive(Debug)]
pub struct GraphitePublisher {
    config: PublisherConfig,
    port: u16,
}

impl GraphitePublisher {
    /// Creates a Graphite publisher from configuration.
    ///
    /// The port defaults to [`DEFAULT_PORT`].
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, has no host, or is not meant for a Graphite publisher, an
    /// error variant will be returned.
    pub fn from_config(config: PublisherConfig) -> Result<GraphitePublisher, ConfigError> {
        config.validate()?;
        config.expect_kind(PublisherKind::Graphite)?;
        if config.host.trim().is_empty() {
            return Err(ConfigError::InvalidValue { field: "host", reason: "must not be blank".into() });
        }

        let port = config.port.unwrap_or(DEFAULT_PORT);
        Ok(GraphitePublisher { config, port })
    }

    fn connect(&self) -> io::Result<TcpStream> {
        let timeout = non_zero(self.config.socket_timeout);
        let mut last_error = None;

        for addr in (self.config.host.as_str(), self.port).to_socket_addrs()? {
            match connect_to(&addr, timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no address found for '{}'", self.config.host))
        }))
    }

    fn write_batch(&self, batch: &[MetricSnapshot]) -> io::Result<()> {
        let stream = self.connect()?;
        let mut writer = BufWriter::new(stream);
        let mut line = String::with_capacity(128);

        for snapshot in batch {
            line.clear();
            let tags = self.config.tags.as_ref().unwrap_or_else(|| snapshot.tags());
            format_line(&mut line, tags, snapshot);
            writer.write_all(line.as_bytes())?;
            trace!(publisher = %self.config.name, line = line.trim_end(), "Wrote metric.");
        }

        writer.flush()
    }
}

impl Publisher for GraphitePublisher {
    fn config(&self) -> &PublisherConfig {
        &self.config
    }

    fn publish(&self, batch: &[MetricSnapshot]) -> Result<(), PublishError> {
        debug!(
            publisher = %self.config.name,
            host = %self.config.host,
            port = self.port,
            batch_len = batch.len(),
            "Sending metrics."
        );

        self.write_batch(batch).map_err(|e| {
            error!(publisher = %self.config.name, error = %e, "Error sending metrics.");
            PublishError::Io(e)
        })
    }
}

fn connect_to(addr: &SocketAddr, timeout: Option<Duration>) -> io::Result<TcpStream> {
    let stream = match timeout {
        Some(timeout) => TcpStream::connect_timeout(addr, timeout)?,
        None => TcpStream::connect(addr)?,
    };
    stream.set_write_timeout(timeout)?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

// Socket timeouts reject a zero duration; zero means "no timeout" here.
fn non_zero(timeout: Duration) -> Option<Duration> {
    (!timeout.is_zero()).then_some(timeout)
}

/// Appends the plaintext line for `snapshot`, newline included, to `out`.
fn format_line(out: &mut String, tags: &Tags, snapshot: &MetricSnapshot) {
    use std::fmt::Write as _;

    for tag in tags.values() {
        out.push_str(tag);
        out.push('.');
    }
    out.push_str(&snapshot.full_name());
    out.push(' ');
    // Writing into a `String` cannot fail.
    let _ = write!(out, "{:.2}", snapshot.value());
    out.push(' ');
    let mut timestamp = itoa::Buffer::new();
    out.push_str(timestamp.format(snapshot.timestamp()));
    out.push('\n');
}
