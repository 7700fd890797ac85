//! Error types for solarkv.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// The main error type for all solarkv operations.
///
/// Every failure is returned to the caller. The only thing the core tolerates
/// silently is a malformed stored record met during a range scan, which is
/// skipped on its own without failing the query.
#[derive(Error, Debug)]
pub enum Error {
    /// Admission denied by a rate limiter. The rejected hit is still counted.
    #[error("rate limit exceeded for '{name}': {hits} hits in window (max {max_hits})")]
    RateLimitExceeded {
        /// The limiter name that was hit.
        name: String,
        /// The number of hits counted in the window, including this one.
        hits: u64,
        /// The configured maximum.
        max_hits: u64,
    },

    /// The queried entity has no entry.
    #[error("{what} not found")]
    NotFound {
        /// Description of what was looked up.
        what: String,
    },

    /// A caller-supplied parameter violates a stated bound.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The key-value store failed or rejected a batch.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// The operation's deadline elapsed before the store answered.
    #[error("operation canceled after {elapsed:?}")]
    Canceled {
        /// How long the operation ran before it was abandoned.
        elapsed: Duration,
    },

    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    /// Returns `true` if this is a [`Error::RateLimitExceeded`].
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimitExceeded { .. })
    }

    /// Returns `true` if this is a [`Error::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidRequest(reason.into())
    }
}

/// Errors raised by a key-value store backend while executing a batch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The connection was closed.
    #[error("connection is closed")]
    Closed,

    /// A command was applied to a key holding a different kind of value.
    #[error("wrong type for key '{key}': expected {expected}")]
    WrongType {
        /// The offending key.
        key: String,
        /// The value kind the command required.
        expected: &'static str,
    },

    /// An increment targeted a value that is not an integer.
    #[error("value at '{key}' is not an integer")]
    NotAnInteger {
        /// The offending key.
        key: String,
    },

    /// A score argument was NaN.
    #[error("score for '{key}' is not a number")]
    InvalidScore {
        /// The offending key.
        key: String,
    },

    /// The reply at a slot did not have the expected shape.
    #[error("unexpected reply at slot {slot}: expected {expected}")]
    UnexpectedReply {
        /// The slot index within the batch.
        slot: usize,
        /// The expected reply kind.
        expected: &'static str,
    },

    /// The batch produced fewer replies than commands.
    #[error("missing reply for slot {slot}")]
    MissingReply {
        /// The slot index within the batch.
        slot: usize,
    },

    /// Backend-specific failure (network, protocol, ...).
    #[error("backend failure: {0}")]
    Backend(String),
}

/// Errors that can occur while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config '{}': {source}", path.display())]
    Read {
        /// The config file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for [`crate::Config`].
    #[error("failed to parse config '{}': {source}", path.display())]
    Parse {
        /// The config file path.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// An environment variable held an unparsable value.
    #[error("invalid value for {var}: '{value}'")]
    InvalidEnv {
        /// The variable name.
        var: String,
        /// The raw value.
        value: String,
    },

    /// A setting is out of range.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// What is wrong.
        reason: String,
    },
}

/// Type alias for `Result<T, solarkv::Error>`.
pub type Result<T> = std::result::Result<T, Error>;
