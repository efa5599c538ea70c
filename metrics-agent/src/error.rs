use std::io;

use thiserror::Error;

/// Errors that could occur while validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration field holds a value outside of its accepted range.
    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue {
        /// Name of the offending field.
        field: &'static str,
        /// Details about why the value was rejected.
        reason: String,
    },

    /// The publisher kind tag is not recognized.
    #[error("unknown publisher kind `{0}` (expected `graphite`, `prometheus` or `memory`)")]
    UnknownPublisherKind(String),

    /// A publisher was built from a configuration meant for another kind of publisher.
    #[error("publisher `{name}` is configured as `{actual}` but was built as `{expected}`")]
    KindMismatch {
        /// Name of the publisher.
        name: String,
        /// Kind the publisher was built as.
        expected: &'static str,
        /// Kind found in the configuration.
        actual: &'static str,
    },

    /// A relabel rule has an invalid regular expression.
    #[error("invalid relabel pattern `{pattern}`: {source}")]
    InvalidRelabelPattern {
        /// The pattern as configured.
        pattern: String,
        /// The underlying parse failure.
        #[source]
        source: regex::Error,
    },
}

impl ConfigError {
    pub(crate) fn invalid<R: Into<String>>(field: &'static str, reason: R) -> ConfigError {
        ConfigError::InvalidValue { field, reason: reason.into() }
    }
}

/// Errors returned by a publisher when a batch could not be published.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The transport failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The backend refused the batch.
    #[error("backend rejected metrics (status {status}): {reason}")]
    Rejected {
        /// Status reported by the backend.
        status: u16,
        /// Details reported by the backend.
        reason: String,
    },

    /// Any other failure.
    #[error("{0}")]
    Other(String),
}

/// Errors that could occur while building or starting the agent.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Failed to spawn a background thread.
    #[error("failed to spawn background thread `{name}`: {source}")]
    Spawn {
        /// Name of the thread.
        name: String,
        /// The underlying failure.
        #[source]
        source: io::Error,
    },
}
