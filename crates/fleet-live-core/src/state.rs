//! Connection state and raw frames.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a persistent connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No live connection; a reconnect may be pending.
    #[default]
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// The connection is open and accepting outbound messages.
    Connected,
}

impl ConnectionState {
    /// Whether outbound messages are currently accepted.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Label for a two-valued status indicator.
    ///
    /// A connect attempt in flight still renders as disconnected.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Connected => "Connected",
            Self::Disconnected | Self::Connecting => "Disconnected",
        }
    }
}

/// A single message-oriented frame (WebSocket-class transports).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
}

impl Frame {
    /// Create a text frame.
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// Length of the frame payload in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(s) => s.len(),
            Self::Binary(b) => b.len(),
        }
    }

    /// Whether the frame payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connecting_renders_as_disconnected() {
        assert_eq!(ConnectionState::Connected.label(), "Connected");
        assert_eq!(ConnectionState::Connecting.label(), "Disconnected");
        assert_eq!(ConnectionState::Disconnected.label(), "Disconnected");
        assert!(!ConnectionState::Connecting.is_connected());
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&ConnectionState::Connected).unwrap();
        assert_eq!(json, "\"connected\"");
    }

    #[test]
    fn test_frame_len() {
        assert_eq!(Frame::text("abc").len(), 3);
        assert!(Frame::Binary(Vec::new()).is_empty());
    }
}
