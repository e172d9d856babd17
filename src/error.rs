//! Error taxonomy for ACME operations.

use time::OffsetDateTime;
use url::Url;

use crate::problem::Problem;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised by the ACME client core.
///
/// Only two conditions are recovered internally: a rejected nonce is retried
/// once, and an expired directory cache is re-fetched. Everything else is
/// surfaced to the caller with full context.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport-level failure (DNS, TLS, connection reset).
    ///
    /// Retriable at the application layer.
    #[error("network error: {0}")]
    Network(#[source] Box<ureq::Transport>),

    /// Malformed server response or a violated protocol expectation.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server answered with a problem document.
    #[error("server error ({status}): {problem}")]
    Server { status: u16, problem: Problem },

    /// The server rejected the request nonce twice in a row.
    #[error("bad nonce ({status}): {problem}")]
    BadNonce { status: u16, problem: Problem },

    /// The server asked the client to come back later.
    ///
    /// Not strictly a failure. The resource state has already been updated
    /// from the response body when this is raised.
    #[error("{message}, retry after {instant}")]
    RetryAfter {
        instant: OffsetDateTime,
        message: String,
    },

    /// The server demands manual action, usually agreement to new terms of
    /// service.
    #[error("user action required: {problem}")]
    UserActionRequired {
        problem: Problem,
        /// Terms-of-service document the user must visit, if the server
        /// linked one.
        tos: Option<Url>,
    },

    /// Caller contract violation.
    #[error("illegal argument: {0}")]
    IllegalArgument(String),
}

impl Error {
    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    pub(crate) fn illegal_argument(msg: impl Into<String>) -> Self {
        Error::IllegalArgument(msg.into())
    }

    /// Returns the instant carried by a [`Error::RetryAfter`], if that is
    /// what this error is.
    pub fn retry_after(&self) -> Option<OffsetDateTime> {
        match self {
            Error::RetryAfter { instant, .. } => Some(*instant),
            _ => None,
        }
    }

    /// Returns the problem document attached to this error, if any.
    pub fn problem(&self) -> Option<&Problem> {
        match self {
            Error::Server { problem, .. }
            | Error::BadNonce { problem, .. }
            | Error::UserActionRequired { problem, .. } => Some(problem),
            _ => None,
        }
    }
}

impl From<ureq::Transport> for Error {
    fn from(err: ureq::Transport) -> Self {
        Error::Network(Box::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Protocol(format!("malformed JSON: {err}"))
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::Protocol(format!("malformed URL: {err}"))
    }
}
