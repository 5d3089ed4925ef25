//! Error taxonomy.
//!
//! Two layers: [`ClientError`] is raised synchronously to the caller
//! (configuration and lifecycle problems), while [`DispatchError`] travels
//! inside a [`Failure`](crate::Failure) to ERROR callbacks and never
//! surfaces on the submitting thread.

use crate::transport::TransportError;

/// Errors returned directly by [`Client`](crate::Client) operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// `run` was called with no callback registered for any event
    #[error("no callbacks registered")]
    NoListeners,

    /// The shared store was accessed while disabled
    #[error("the shared store is disabled (use_store = false)")]
    StoreNotSupported,

    /// The client has finished running and no longer accepts requests
    #[error("client is no longer accepting requests")]
    Terminated,

    /// Invalid configuration detected at startup
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Errors delivered to ERROR callbacks as the `error` field of a
/// [`Failure`](crate::Failure).
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The transport failed before producing an HTTP response
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Non-2xx completion, only produced with `classify_by_status`
    #[error("upstream returned status {0}")]
    Status(u16),

    /// The request was abandoned because shutdown was requested
    #[error("request abandoned during shutdown")]
    Shutdown,
}
