//! WebSocket transport for remote consoles.

use async_trait::async_trait;
use fleet_live_core::{
    ConsoleConfig, Frame,
    traits::{Connector, Link, TransportError},
};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{self, Message},
};

use crate::bridge::{ConsoleBridge, ConsoleError, TerminalSink};

/// Connector opening WebSocket client connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    type Link = WsLink;

    async fn connect(&self, endpoint: &str) -> Result<Self::Link, TransportError> {
        let (stream, response) = connect_async(endpoint)
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        tracing::debug!(status = %response.status(), "WebSocket handshake complete");
        Ok(WsLink { stream })
    }
}

/// An open WebSocket client connection.
pub struct WsLink {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Link for WsLink {
    type Inbound = Frame;
    type Outbound = Frame;

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let msg = match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(bytes) => Message::Binary(bytes.into()),
        };
        self.stream.send(msg).await.map_err(into_transport)
    }

    async fn recv(&mut self) -> Option<Result<Frame, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(Frame::Text(text.as_str().to_owned()))),
                Ok(Message::Binary(bytes)) => return Some(Ok(Frame::Binary(bytes.to_vec()))),
                Ok(Message::Close(frame)) => {
                    tracing::debug!(?frame, "Close frame received");
                    return None;
                }
                // Ping/pong are answered by tungstenite itself.
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Err(tungstenite::Error::ConnectionClosed) => return None,
                Err(e) => return Some(Err(into_transport(e))),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!("WebSocket close: {e}");
        }
    }
}

fn into_transport(e: tungstenite::Error) -> TransportError {
    match e {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            TransportError::Closed
        }
        tungstenite::Error::Io(io) => TransportError::Io(io),
        other => TransportError::Protocol(other.to_string()),
    }
}

impl ConsoleBridge {
    /// Connect to the console over a WebSocket.
    ///
    /// # Errors
    /// Returns error if the auth payload cannot be encoded.
    pub fn connect_ws<S: TerminalSink>(config: &ConsoleConfig, sink: S) -> Result<Self, ConsoleError> {
        Self::connect(WsConnector, config, sink)
    }
}
