//! Console wire protocol.
//!
//! Upstream the console speaks raw text: one JSON auth frame right after
//! open, then keystrokes exactly as typed. Downstream frames are opaque
//! terminal output, either text or UTF-8 bytes.

use std::fmt;

use fleet_live_core::{ConsoleConfig, Frame};
use serde::{Deserialize, Serialize};

/// Authentication frame sent immediately after the socket opens.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthPayload {
    pub api_key: String,
    pub instance_id: String,
}

impl AuthPayload {
    /// Build the payload from console configuration.
    #[must_use]
    pub fn from_config(config: &ConsoleConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            instance_id: config.instance_id.clone(),
        }
    }

    /// Encode as a JSON text frame.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn to_frame(&self) -> Result<Frame, serde_json::Error> {
        serde_json::to_string(self).map(Frame::Text)
    }
}

impl fmt::Debug for AuthPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthPayload")
            .field("api_key", &"<redacted>")
            .field("instance_id", &self.instance_id)
            .finish()
    }
}

/// Decoded console output, handed to the renderer unparsed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputChunk(String);

impl OutputChunk {
    /// Borrow the text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Take the text.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }

    /// Whether the chunk has no text.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for OutputChunk {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Streaming decoder from inbound frames to output chunks.
///
/// Text frames pass through unchanged. Binary frames are decoded as UTF-8;
/// a multi-byte sequence cut off at the end of a frame is held back and
/// completed by the next frame, invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending: Vec<u8>,
}

impl FrameDecoder {
    /// Create a decoder with no buffered bytes.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    /// Decode one frame.
    pub fn decode(&mut self, frame: Frame) -> OutputChunk {
        match frame {
            Frame::Text(text) if self.pending.is_empty() => OutputChunk(text),
            Frame::Text(text) => {
                // A text frame ends any binary sequence left unfinished.
                let mut out = String::from_utf8_lossy(&std::mem::take(&mut self.pending)).into_owned();
                out.push_str(&text);
                OutputChunk(out)
            }
            Frame::Binary(bytes) => {
                let mut buf = std::mem::take(&mut self.pending);
                buf.extend_from_slice(&bytes);
                OutputChunk(self.decode_bytes(&buf))
            }
        }
    }

    /// Number of bytes held back waiting for the rest of a sequence.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn decode_bytes(&mut self, mut rest: &[u8]) -> String {
        let mut out = String::with_capacity(rest.len());
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    return out;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[bad..];
                        }
                        None => {
                            self.pending = after.to_vec();
                            return out;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_payload_wire_shape() {
        let payload = AuthPayload {
            api_key: "k".to_string(),
            instance_id: "94232b97".to_string(),
        };
        let Frame::Text(json) = payload.to_frame().unwrap() else {
            panic!("auth must be a text frame");
        };
        assert_eq!(json, r#"{"api_key":"k","instance_id":"94232b97"}"#);
        assert!(!format!("{payload:?}").contains("\"k\""));
    }

    #[test]
    fn test_text_and_binary_decode_identically() {
        let s = "\x1b[32mok\x1b[0m \u{2713} done\r\n";
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.decode(Frame::text(s)).as_str(), s);
        assert_eq!(decoder.decode(Frame::Binary(s.as_bytes().to_vec())).as_str(), s);
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_split_multibyte_sequence_is_joined() {
        let bytes = "€uro".as_bytes();
        let mut decoder = FrameDecoder::new();

        let first = decoder.decode(Frame::Binary(bytes[..2].to_vec()));
        assert!(first.is_empty());
        assert_eq!(decoder.pending_len(), 2);

        let second = decoder.decode(Frame::Binary(bytes[2..].to_vec()));
        assert_eq!(second.as_str(), "€uro");
    }

    #[test]
    fn test_invalid_bytes_become_replacement() {
        let mut decoder = FrameDecoder::new();
        let chunk = decoder.decode(Frame::Binary(vec![b'a', 0xff, b'b']));
        assert_eq!(chunk.as_str(), "a\u{fffd}b");
    }

    #[test]
    fn test_text_flushes_unfinished_sequence() {
        let mut decoder = FrameDecoder::new();
        decoder.decode(Frame::Binary(vec![0xe2, 0x82]));
        let chunk = decoder.decode(Frame::text("x"));
        assert_eq!(chunk.as_str(), "\u{fffd}x");
        assert_eq!(decoder.pending_len(), 0);
    }
}
