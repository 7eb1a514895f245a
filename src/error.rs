//! The error taxonomy shared by every layer of the connection fabric.

use thiserror::Error;

/// The result type returned throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while mediating a session with the broker.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration was missing or malformed. Fatal at startup, never during steady state.
    #[error("configuration error: {0}")]
    Config(String),

    /// No address candidate for a host/port pair could be connected to.
    #[error("no reachable address for {host}:{port}")]
    TransportUnavailable {
        /// Host that could not be reached.
        host: String,
        /// Port that could not be reached.
        port: u16,
    },

    /// The peer closed the connection, or the socket errored mid-operation.
    #[error("connection lost: {0}")]
    ConnectionLost(#[source] std::io::Error),

    /// An outbound payload could not be serialized to JSON.
    #[error("failed to encode outbound message: {0}")]
    Encoding(#[source] serde_json::Error),

    /// Inbound bytes were not valid JSON within the buffering bounds the transport allows.
    #[error("failed to decode inbound message: {0}")]
    Decoding(#[source] serde_json::Error),

    /// An inbound envelope violated the shape the protocol requires (e.g. missing `status`).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The broker rejected a request (`status == false`).
    #[error("request rejected: {error_code}: {error_descr}")]
    RequestRejected {
        /// The broker's machine-readable error code.
        error_code: String,
        /// The broker's human-readable error description.
        error_descr: String,
    },

    /// A connection or subscription cap was reached.
    #[error("capacity exhausted: {0}")]
    CapacityExhausted(String),

    /// The operation was attempted on an object that has already been deleted.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl Error {
    /// Whether this error should drive a reconnect attempt at the Session/StreamSession boundary.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::TransportUnavailable { .. } | Error::ConnectionLost(_)
        )
    }
}
