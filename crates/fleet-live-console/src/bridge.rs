//! Console bridge: raw keystrokes up, remote output down, no local echo.

use fleet_live_core::{
    ConnectOptions, ConnectionManager, ConnectionState, ConsoleConfig, Frame, LinkEvent,
    traits::{Connector, Link},
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

use crate::protocol::{AuthPayload, FrameDecoder, OutputChunk};

/// Console bridge error.
#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    #[error("Failed to encode auth payload: {0}")]
    Auth(#[from] serde_json::Error),
}

/// Renderer collaborator that owns display and scrollback.
///
/// The bridge never parses control sequences; it only hands over text that
/// came back from the remote peer.
pub trait TerminalSink: Send + 'static {
    /// Write remote output.
    fn write(&mut self, chunk: &OutputChunk);

    /// Re-fit the renderer to its container after a layout change.
    fn fit(&mut self) {}
}

/// Sink forwarding output chunks into a channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<OutputChunk>,
}

impl ChannelSink {
    /// Create a sink and the receiver for its output.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutputChunk>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl TerminalSink for ChannelSink {
    fn write(&mut self, chunk: &OutputChunk) {
        let _ = self.tx.send(chunk.clone());
    }
}

enum SinkCommand {
    Fit,
}

/// Streams a remote console over a persistent connection.
pub struct ConsoleBridge {
    manager: ConnectionManager<Frame>,
    commands: mpsc::UnboundedSender<SinkCommand>,
    pump: Option<JoinHandle<()>>,
}

impl ConsoleBridge {
    /// Connect to the console and start feeding `sink`.
    ///
    /// The auth payload is sent after every (re)connect.
    ///
    /// # Errors
    /// Returns error if the auth payload cannot be encoded.
    pub fn connect<C, S>(connector: C, config: &ConsoleConfig, sink: S) -> Result<Self, ConsoleError>
    where
        C: Connector,
        C::Link: Link<Inbound = Frame, Outbound = Frame>,
        S: TerminalSink,
    {
        let handshake = AuthPayload::from_config(config).to_frame()?;
        let options = ConnectOptions::default()
            .with_reconnect(config.reconnect)
            .with_handshake(handshake);

        let (manager, events) = ConnectionManager::connect(connector, config.url.clone(), options);
        let (commands, command_rx) = mpsc::unbounded_channel();
        let pump = tokio::spawn(pump(events, command_rx, sink));

        Ok(Self {
            manager,
            commands,
            pump: Some(pump),
        })
    }

    /// Forward a keystroke to the remote console, verbatim.
    ///
    /// Nothing is written to the sink here; output only ever comes back from
    /// the peer. Dropped silently while disconnected.
    pub fn on_keystroke(&self, data: &str) {
        self.manager.send(Frame::text(data));
    }

    /// Forward raw input bytes (text frame when valid UTF-8).
    pub fn send_input(&self, data: &[u8]) {
        let frame = match std::str::from_utf8(data) {
            Ok(text) => Frame::text(text),
            Err(_) => Frame::Binary(data.to_vec()),
        };
        self.manager.send(frame);
    }

    /// Ask the renderer to re-fit after a layout change.
    pub fn resize(&self) {
        let _ = self.commands.send(SinkCommand::Fit);
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    /// Receiver for status-indicator updates.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.manager.watch_state()
    }

    /// "Connected" or "Disconnected".
    #[must_use]
    pub fn status_label(&self) -> &'static str {
        self.state().label()
    }

    /// Close the socket, cancel any pending reconnect and stop the output
    /// pump.
    pub async fn close(&mut self) {
        self.manager.close().await;
        if let Some(pump) = self.pump.take() {
            let _ = pump.await;
        }
    }
}

async fn pump<S: TerminalSink>(
    mut events: mpsc::UnboundedReceiver<LinkEvent<Frame>>,
    mut commands: mpsc::UnboundedReceiver<SinkCommand>,
    mut sink: S,
) {
    let mut decoder = FrameDecoder::new();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(LinkEvent::Message(frame)) => {
                    let chunk = decoder.decode(frame);
                    if !chunk.is_empty() {
                        sink.write(&chunk);
                    }
                }
                Some(LinkEvent::Opened) => {
                    decoder = FrameDecoder::new();
                }
                Some(LinkEvent::Closed { reason }) => {
                    tracing::debug!(?reason, "Console link closed");
                }
                // Connection task finished.
                None => break,
            },
            Some(SinkCommand::Fit) = commands.recv() => sink.fit(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    use fleet_live_core::{ReconnectPolicy, mock::MockConnector};

    use super::*;

    #[derive(Clone, Default)]
    struct RecordingSink {
        written: Arc<Mutex<Vec<String>>>,
        fits: Arc<Mutex<usize>>,
    }

    impl TerminalSink for RecordingSink {
        fn write(&mut self, chunk: &OutputChunk) {
            self.written.lock().unwrap().push(chunk.as_str().to_string());
        }

        fn fit(&mut self) {
            *self.fits.lock().unwrap() += 1;
        }
    }

    fn config() -> ConsoleConfig {
        ConsoleConfig {
            url: "ws://console.test/api/ws/console".to_string(),
            api_key: "key".to_string(),
            instance_id: "instance".to_string(),
            reconnect: ReconnectPolicy::fixed(Duration::from_millis(3000)),
        }
    }

    async fn connected(bridge: &ConsoleBridge) {
        bridge
            .watch_state()
            .wait_for(|s| s.is_connected())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_then_raw_keystrokes() {
        let (connector, mut acceptor) = MockConnector::<Frame, Frame>::new();
        let bridge = ConsoleBridge::connect(connector, &config(), RecordingSink::default()).unwrap();

        let mut peer = acceptor.accept().await;
        connected(&bridge).await;
        bridge.on_keystroke("l");
        bridge.on_keystroke("\x03");
        bridge.on_keystroke("\x1b[A");

        assert_eq!(
            peer.next_sent().await,
            Some(Frame::text(r#"{"api_key":"key","instance_id":"instance"}"#))
        );
        assert_eq!(peer.next_sent().await, Some(Frame::text("l")));
        assert_eq!(peer.next_sent().await, Some(Frame::text("\x03")));
        assert_eq!(peer.next_sent().await, Some(Frame::text("\x1b[A")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_local_echo() {
        let (connector, mut acceptor) = MockConnector::<Frame, Frame>::new();
        let sink = RecordingSink::default();
        let bridge = ConsoleBridge::connect(connector, &config(), sink.clone()).unwrap();

        let mut peer = acceptor.accept().await;
        connected(&bridge).await;
        for key in ["e", "c", "h", "o", "\r"] {
            bridge.on_keystroke(key);
        }
        // auth + five keystrokes reached the peer
        for _ in 0..6 {
            peer.next_sent().await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(sink.written.lock().unwrap().is_empty());

        peer.deliver(Frame::text("echo\r\n"));
        peer.deliver(Frame::Binary("$ ".as_bytes().to_vec()));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(*sink.written.lock().unwrap(), vec!["echo\r\n", "$ "]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keystrokes_while_disconnected_are_dropped() {
        let (connector, mut acceptor) = MockConnector::<Frame, Frame>::new();
        connector.refuse_next(1);
        let bridge = ConsoleBridge::connect(connector, &config(), RecordingSink::default()).unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(bridge.status_label(), "Disconnected");
        bridge.on_keystroke("lost");

        tokio::time::sleep(Duration::from_millis(3000)).await;
        let mut peer = acceptor.accept().await;
        connected(&bridge).await;
        assert_eq!(bridge.status_label(), "Connected");
        bridge.on_keystroke("kept");

        peer.next_sent().await.unwrap(); // auth
        assert_eq!(peer.next_sent().await, Some(Frame::text("kept")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_resent_after_reconnect() {
        let (connector, mut acceptor) = MockConnector::<Frame, Frame>::new();
        let bridge = ConsoleBridge::connect(connector, &config(), RecordingSink::default()).unwrap();

        let mut first = acceptor.accept().await;
        assert!(first.next_sent().await.is_some());
        first.hang_up();

        let mut second = acceptor.accept().await;
        connected(&bridge).await;
        let Some(Frame::Text(auth)) = second.next_sent().await else {
            panic!("expected auth frame");
        };
        assert!(auth.contains("api_key"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resize_requests_fit() {
        let (connector, _acceptor) = MockConnector::<Frame, Frame>::new();
        let sink = RecordingSink::default();
        let bridge = ConsoleBridge::connect(connector, &config(), sink.clone()).unwrap();

        bridge.resize();
        bridge.resize();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(*sink.fits.lock().unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_stops_reconnects() {
        let (connector, mut acceptor) = MockConnector::<Frame, Frame>::new();
        let attempts = connector.clone();
        let mut bridge =
            ConsoleBridge::connect(connector, &config(), RecordingSink::default()).unwrap();

        acceptor.accept().await.hang_up();
        tokio::time::sleep(Duration::from_millis(10)).await;
        bridge.close().await;

        tokio::time::sleep(Duration::from_millis(10_000)).await;
        assert_eq!(attempts.attempts(), 1);
        assert_eq!(bridge.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_sink_streams_output() {
        let (connector, mut acceptor) = MockConnector::<Frame, Frame>::new();
        let (sink, mut output) = ChannelSink::new();
        let _bridge = ConsoleBridge::connect(connector, &config(), sink).unwrap();

        let peer = acceptor.accept().await;
        peer.deliver(Frame::Binary(vec![0xe2, 0x82]));
        peer.deliver(Frame::Binary(vec![0xac]));
        assert_eq!(output.recv().await.unwrap().as_str(), "€");
    }
}
