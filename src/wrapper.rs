//! Connection wrappers: request/response decorators stacked around a base transport.
//!
//! A wrapper list is applied in order, each one around the previous result, so the
//! last-added wrapper is outermost and sees a request first. Clients are built with
//! loggers first, then authentication, then retry: the loggers sit next to the wire and
//! record the bytes actually sent, and every re-send from the retrier passes back
//! through authentication.

/// Authentication wrapper with a late-bound identity client.
pub mod auth;
/// Request/response dump wrappers.
pub mod logger;
/// Transient-failure retry wrapper.
pub mod retry;

use crate::connection::Connection;
use std::any::Any;
use std::sync::Arc;

pub use auth::{AuthenticationLayer, AuthenticationService, AuthenticationWrapper};
pub use logger::{
    FileLogOutput, MemoryLogOutput, RequestLogOutput, RequestLoggerLayer, RequestLoggerService,
    TerminalLogOutput,
};
pub use retry::{RetryLayer, RetryService};

/// What a wrapper does; used to inspect a client's chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WrapperKind {
    /// Dumps requests and responses to the terminal.
    TerminalLogger,
    /// Dumps requests and responses to a file.
    FileLogger,
    /// Injects credentials and refreshes expired tokens.
    Authentication,
    /// Re-sends requests that failed transiently.
    Retry,
}

impl WrapperKind {
    /// True for either logger kind.
    pub fn is_logger(self) -> bool {
        matches!(self, Self::TerminalLogger | Self::FileLogger)
    }
}

/// A decorator that can be stacked on a [`Connection`].
///
/// Construction never fails; errors only appear when requests flow through.
pub trait ConnectionWrapper: Send + Sync {
    /// Kind of decoration applied.
    fn kind(&self) -> WrapperKind;

    /// Wrap `inner`, returning the decorated connection.
    fn wrap(&self, inner: Connection) -> Connection;

    /// Provide access to the concrete type for downcasting.
    fn as_any(&self) -> &dyn Any;
}

/// Apply `wrappers` in order around `base`; the last one ends up outermost.
pub fn build_chain(base: Connection, wrappers: &[Arc<dyn ConnectionWrapper>]) -> Connection {
    wrappers.iter().fold(base, |conn, wrapper| wrapper.wrap(conn))
}

/// Kinds of `wrappers`, in list order.
pub fn kinds(wrappers: &[Arc<dyn ConnectionWrapper>]) -> Vec<WrapperKind> {
    wrappers.iter().map(|w| w.kind()).collect()
}

/// Number of logger wrappers in `wrappers`.
pub fn logger_count(wrappers: &[Arc<dyn ConnectionWrapper>]) -> usize {
    wrappers.iter().filter(|w| w.kind().is_logger()).count()
}

/// First authentication wrapper in `wrappers`, if any.
pub fn find_authentication(wrappers: &[Arc<dyn ConnectionWrapper>]) -> Option<&AuthenticationWrapper> {
    wrappers.iter().find_map(|w| w.as_any().downcast_ref::<AuthenticationWrapper>())
}
