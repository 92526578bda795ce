//! Remote console bridge for device live views.
//!
//! Provides:
//! - Console wire protocol (auth payload, streaming frame decode)
//! - `ConsoleBridge` - keystrokes upstream, remote output to a `TerminalSink`
//! - WebSocket connector (feature: websocket)
//! - Key event to raw input mapping (feature: tui)

pub mod bridge;
pub mod protocol;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(feature = "tui")]
pub mod keys;

pub use bridge::{ChannelSink, ConsoleBridge, ConsoleError, TerminalSink};
pub use protocol::{AuthPayload, FrameDecoder, OutputChunk};
