//! Transport traits implemented per wire protocol.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Transport error.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connect failed: {0}")]
    ConnectFailed(String),
    #[error("Connect timed out after {0:?}")]
    Timeout(Duration),
    #[error("Connection closed")]
    Closed,
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One live, already-open connection.
///
/// `recv` must be cancel-safe: the connection task polls it inside
/// `tokio::select!` alongside outbound traffic.
#[async_trait]
pub trait Link: Send + 'static {
    /// Messages received from the peer.
    type Inbound: Send + 'static;
    /// Messages sent to the peer.
    type Outbound: Send + 'static;

    /// Send one message.
    async fn send(&mut self, msg: Self::Outbound) -> Result<(), TransportError>;

    /// Receive the next message.
    ///
    /// Returns `None` once the peer has closed the connection.
    async fn recv(&mut self) -> Option<Result<Self::Inbound, TransportError>>;

    /// Close the connection. Errors are not reported.
    async fn close(&mut self);
}

/// Factory for links to an endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Link type produced by this connector.
    type Link: Link;

    /// Open a new link to `endpoint`.
    async fn connect(&self, endpoint: &str) -> Result<Self::Link, TransportError>;
}
