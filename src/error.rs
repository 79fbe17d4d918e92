//! Error types for connections and client bootstrap.
//!
//! `ConnectionError` is what flows out of a wrapper chain for a single request.
//! `BootstrapError` is what the orchestrator surfaces; transport and handshake
//! failures are carried through it unchanged so callers see the original message.

use crate::identity::IdentityError;

/// HTTP statuses that the retry wrapper treats as transient.
pub const RETRYABLE_STATUSES: [u16; 4] = [500, 502, 503, 504];

/// Failure of one request travelling through a connection.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionError {
    /// The request never produced a response (DNS, TCP, TLS, dial timeout).
    #[error("request to {url} failed: {message}")]
    Transport {
        /// Target of the failed request.
        url: String,
        /// Underlying transport message.
        message: String,
    },
    /// A URL could not be parsed.
    #[error("invalid URL '{url}': {message}")]
    InvalidUrl {
        /// The offending input.
        url: String,
        /// Parser message.
        message: String,
    },
    /// The server answered with a non-success status.
    #[error("unexpected response status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body as text.
        body: String,
    },
    /// The server rejected the access token.
    #[error("invalid auth token: {0}")]
    InvalidToken(String),
    /// A response body did not match the expected shape.
    #[error("failed to decode response: {0}")]
    Decode(String),
    /// A token could not be obtained or refreshed.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    /// The client has not been targeted at an API yet.
    #[error("client is not targeted at an API endpoint")]
    NotTargeted,
}

impl ConnectionError {
    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::InvalidToken(_) => Some(401),
            _ => None,
        }
    }

    /// True when the server answered with one of [`RETRYABLE_STATUSES`].
    pub fn is_retryable_status(&self) -> bool {
        self.status().is_some_and(|s| RETRYABLE_STATUSES.contains(&s))
    }

    /// True when no response was received at all.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

impl From<IdentityError> for ConnectionError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::Connection(inner) => inner,
            other => ConnectionError::Unauthenticated(other.to_string()),
        }
    }
}

/// Errors surfaced by the client bootstrap.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum BootstrapError {
    /// No target URL is configured; the user has not run `api`/`login`.
    #[error(
        "No API endpoint set. Use '{binary_name} login' to log in, or '{binary_name} api' to set an endpoint."
    )]
    NoApiSet {
        /// Name of the running binary, used in the hint.
        binary_name: String,
    },
    /// The platform was reached but did not advertise an identity provider.
    #[error("No identity endpoint found; the targeted API may be misconfigured.")]
    IdentityEndpointNotFound,
    /// Transport or handshake failure while targeting, unchanged.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    /// Failure while setting up the identity client, unchanged.
    #[error(transparent)]
    Identity(#[from] IdentityError),
}

impl BootstrapError {
    /// True for the "not targeted / not logged in" configuration error.
    pub fn is_no_api_set(&self) -> bool {
        matches!(self, Self::NoApiSet { .. })
    }

    /// True for the "platform misconfigured" protocol-shape error.
    pub fn is_identity_endpoint_not_found(&self) -> bool {
        matches!(self, Self::IdentityEndpointNotFound)
    }
}
