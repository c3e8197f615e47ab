//! Error types returned from this crate.
//!
//! Mirrors the taxonomy in the specification's error handling design: every
//! blocking operation either succeeds, fails with a retryable transient
//! error, or fails with one of the named outcome types below that the
//! caller is expected to branch on (`FailoverSuccess`,
//! `TransactionResolutionUnknown`, `FailoverFailed`, ...).

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::host_info::HostInfo;

/// A specialized `Result` type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type returned by this crate's public API.
///
/// Wraps an [`ErrorKind`] together with an optional source error from the
/// underlying driver, so that the original message is never discarded.
#[derive(Debug, Clone, Error)]
#[error("{kind}")]
pub struct Error {
    kind: Box<ErrorKind>,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind: Box::new(kind),
        }
    }

    /// True if this error represents a network-level failure (connection
    /// refused, reset, timed out while establishing) as opposed to an
    /// application-level or authentication failure.
    pub fn is_network_error(&self) -> bool {
        matches!(
            *self.kind,
            ErrorKind::Network { .. } | ErrorKind::Timeout { .. }
        )
    }

    /// True if this error represents an authentication/authorization
    /// failure. Login errors are never retried (spec.md §7).
    pub fn is_login_error(&self) -> bool {
        matches!(*self.kind, ErrorKind::Login { .. })
    }

    pub fn is_failover_success(&self) -> bool {
        matches!(*self.kind, ErrorKind::FailoverSuccess { .. })
    }

    pub fn is_failover_failed(&self) -> bool {
        matches!(*self.kind, ErrorKind::FailoverFailed { .. })
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal {
            message: message.into(),
        })
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

/// The kind of error, named per spec.md §6/§7 rather than structurally.
#[derive(Debug, Clone, Error)]
pub enum ErrorKind {
    /// A transient network failure talking to a host. Recoverable locally
    /// via retry or failover.
    #[error("network error contacting {host}: {message}")]
    Network { host: String, message: String },

    /// Authentication or authorization failed. Never retried.
    #[error("login failed for {host}: {message}")]
    Login { host: String, message: String },

    /// The dialect's topology query failed or returned an unparsable
    /// result.
    #[error("topology query failed against {host}: {message}")]
    TopologyQuery { host: String, message: String },

    /// A blocking operation exceeded its deadline.
    #[error("operation timed out against {host:?} after {elapsed:?}")]
    Timeout {
        host: Option<String>,
        elapsed: Duration,
    },

    /// Connection was swapped to a new host; the caller may safely retry
    /// their statement because no transaction was open.
    #[error("connection failed over to {new_host} (outside a transaction); retry the statement")]
    FailoverSuccess { new_host: Arc<HostInfo> },

    /// Connection was swapped to a new host while a transaction was open;
    /// the caller must decide whether the transaction committed.
    #[error("connection failed over to {new_host} during an open transaction; durability unknown")]
    TransactionResolutionUnknown { new_host: Arc<HostInfo> },

    /// No healthy host could be found within the failover deadline.
    #[error("failover failed after {elapsed:?}: no healthy host available")]
    FailoverFailed { elapsed: Duration },

    /// A host was found to be persistently unhealthy by the EFM monitor and
    /// the caller's connection to it was aborted.
    #[error("host {host} is unavailable: {message}")]
    UnavailableHost { host: String, message: String },

    /// A configuration value was invalid (bad weight, malformed pattern,
    /// unknown dialect/strategy code, ...). Thrown eagerly, not a retryable
    /// runtime condition.
    #[error("illegal argument: {message}")]
    IllegalArgument { message: String },

    /// A plugin-pipeline method was invoked that no plugin or the terminal
    /// handler supports.
    #[error("unsupported method: {method}")]
    UnsupportedMethod { method: String },

    /// Catch-all for conditions internal to this crate that should never be
    /// observed by a correctly configured caller.
    #[error("internal error: {message}")]
    Internal { message: String },
}
