//! Persistent connection with automatic reconnect.
//!
//! One task per connection owns the link. It opens the link, sends the
//! optional handshake, shuttles messages in both directions and, after any
//! close or error that the owner did not request, waits out the reconnect
//! delay before trying again. The owner sees lifecycle changes as
//! [`LinkEvent`]s and the current [`ConnectionState`] through a watch channel.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

use crate::{
    ConnectionState, ReconnectPolicy,
    traits::{Connector, Link, TransportError},
};

type Inbound<C> = <<C as Connector>::Link as Link>::Inbound;
type Outbound<C> = <<C as Connector>::Link as Link>::Outbound;

/// Lifecycle event delivered to the owner of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent<M> {
    /// The link is open and the handshake (if any) is queued first.
    Opened,
    /// A message arrived from the peer.
    Message(M),
    /// The link closed or a connect attempt failed; a reconnect is scheduled.
    Closed { reason: Option<String> },
}

/// Connection options.
#[derive(Debug, Clone)]
pub struct ConnectOptions<O> {
    /// Delay schedule between a close and the next attempt.
    pub reconnect: ReconnectPolicy,
    /// Connect attempts longer than this count as failed.
    pub connect_timeout: Option<Duration>,
    /// Sent once, immediately after every successful open.
    pub handshake: Option<O>,
}

impl<O> Default for ConnectOptions<O> {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::Fixed { delay_ms: 3000 },
            connect_timeout: None,
            handshake: None,
        }
    }
}

impl<O> ConnectOptions<O> {
    /// Set the reconnect policy.
    #[must_use]
    pub const fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Set the connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the handshake message sent after every open.
    #[must_use]
    pub fn with_handshake(mut self, handshake: O) -> Self {
        self.handshake = Some(handshake);
        self
    }
}

/// Owner-side handle of a persistent connection.
///
/// Dropping the manager has the same effect as [`ConnectionManager::close`]
/// without waiting for the connection task to finish.
pub struct ConnectionManager<O> {
    sender: OutboundSender<O>,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

/// Cloneable sending half of a [`ConnectionManager`].
///
/// Follows the same rule as the manager: messages are accepted only while
/// the connection is up.
#[derive(Debug)]
pub struct OutboundSender<O> {
    endpoint: Arc<str>,
    outbound: mpsc::UnboundedSender<O>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl<O> Clone for OutboundSender<O> {
    fn clone(&self) -> Self {
        Self {
            endpoint: Arc::clone(&self.endpoint),
            outbound: self.outbound.clone(),
            state_rx: self.state_rx.clone(),
        }
    }
}

impl<O> OutboundSender<O> {
    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Send a message on the live link.
    ///
    /// Silently dropped when not connected: never queued for a later link.
    pub fn send(&self, msg: O) {
        if !self.state().is_connected() {
            tracing::debug!(endpoint = %self.endpoint, "Dropping outbound message: not connected");
            return;
        }
        if self.outbound.send(msg).is_err() {
            tracing::debug!(endpoint = %self.endpoint, "Dropping outbound message: connection task gone");
        }
    }
}

impl<O: Send + 'static> ConnectionManager<O> {
    /// Start connecting to `endpoint` in a background task.
    ///
    /// Returns the manager and the stream of lifecycle events. Must be
    /// called from within a Tokio runtime.
    pub fn connect<C>(
        connector: C,
        endpoint: impl Into<String>,
        options: ConnectOptions<O>,
    ) -> (Self, mpsc::UnboundedReceiver<LinkEvent<Inbound<C>>>)
    where
        C: Connector,
        C::Link: Link<Outbound = O>,
        O: Clone + Sync,
    {
        let endpoint = endpoint.into();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = Worker {
            connector,
            endpoint: endpoint.clone(),
            options,
            outbound_rx,
            events_tx,
            state_tx,
            shutdown_rx,
        };
        let task = tokio::spawn(worker.run());

        let manager = Self {
            sender: OutboundSender {
                endpoint: endpoint.into(),
                outbound: outbound_tx,
                state_rx,
            },
            shutdown_tx,
            task: Some(task),
        };
        (manager, events_rx)
    }

    /// Endpoint this manager connects to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.sender.endpoint
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.sender.state()
    }

    /// Receiver that observes every state change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.sender.state_rx.clone()
    }

    /// Send a message on the live link.
    ///
    /// Silently dropped when not connected: never queued for a later link.
    pub fn send(&self, msg: O) {
        self.sender.send(msg);
    }

    /// Cloneable handle for sending from other tasks.
    #[must_use]
    pub fn sender(&self) -> OutboundSender<O> {
        self.sender.clone()
    }

    /// Whether `close` has been requested.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Close the connection and cancel any pending reconnect.
    ///
    /// Waits for the connection task to finish. Idempotent.
    pub async fn close(&mut self) {
        self.shutdown_tx.send_replace(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(endpoint = %self.sender.endpoint, "Connection task failed: {e}");
            }
        }
    }
}

impl<O> Drop for ConnectionManager<O> {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

enum Served {
    Shutdown,
    Closed(Option<String>),
}

struct Worker<C: Connector> {
    connector: C,
    endpoint: String,
    options: ConnectOptions<Outbound<C>>,
    outbound_rx: mpsc::UnboundedReceiver<Outbound<C>>,
    events_tx: mpsc::UnboundedSender<LinkEvent<Inbound<C>>>,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<C> Worker<C>
where
    C: Connector,
    Outbound<C>: Clone + Sync,
{
    async fn run(mut self) {
        // Attempts since the last successful open.
        let mut attempt: u32 = 0;

        loop {
            self.state_tx.send_replace(ConnectionState::Connecting);
            tracing::debug!(endpoint = %self.endpoint, "Connecting");

            let opened = tokio::select! {
                biased;
                () = shutdown_requested(&mut self.shutdown_rx) => break,
                result = open(&self.connector, &self.endpoint, self.options.connect_timeout) => result,
            };

            let reason = match opened {
                Ok(link) => {
                    attempt = 0;
                    match self.serve(link).await {
                        Served::Shutdown => break,
                        Served::Closed(reason) => reason,
                    }
                }
                Err(e) => {
                    tracing::warn!(endpoint = %self.endpoint, "Connect failed: {e}");
                    Some(e.to_string())
                }
            };

            self.state_tx.send_replace(ConnectionState::Disconnected);
            self.discard_pending();
            let _ = self.events_tx.send(LinkEvent::Closed { reason });

            attempt = attempt.saturating_add(1);
            let delay = self.options.reconnect.delay(attempt);
            tracing::info!(endpoint = %self.endpoint, ?delay, "Connection lost, reconnect scheduled");

            tokio::select! {
                biased;
                () = shutdown_requested(&mut self.shutdown_rx) => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.state_tx.send_replace(ConnectionState::Disconnected);
        tracing::debug!(endpoint = %self.endpoint, "Connection task stopped");
    }

    async fn serve(&mut self, mut link: C::Link) -> Served {
        // Anything queued before this link existed belongs to no connection.
        self.discard_pending();
        self.state_tx.send_replace(ConnectionState::Connected);
        tracing::info!(endpoint = %self.endpoint, "Connected");
        let _ = self.events_tx.send(LinkEvent::Opened);

        if let Some(handshake) = self.options.handshake.clone() {
            if let Err(e) = link.send(handshake).await {
                tracing::warn!(endpoint = %self.endpoint, "Handshake failed: {e}");
                return Served::Closed(Some(e.to_string()));
            }
        }

        loop {
            tokio::select! {
                biased;
                () = shutdown_requested(&mut self.shutdown_rx) => {
                    // Messages accepted while connected go out before the close.
                    while let Ok(msg) = self.outbound_rx.try_recv() {
                        if link.send(msg).await.is_err() {
                            break;
                        }
                    }
                    link.close().await;
                    return Served::Shutdown;
                }
                Some(msg) = self.outbound_rx.recv() => {
                    if let Err(e) = link.send(msg).await {
                        tracing::warn!(endpoint = %self.endpoint, "Send failed: {e}");
                        link.close().await;
                        return Served::Closed(Some(e.to_string()));
                    }
                }
                inbound = link.recv() => match inbound {
                    Some(Ok(msg)) => {
                        let _ = self.events_tx.send(LinkEvent::Message(msg));
                    }
                    Some(Err(e)) => {
                        tracing::warn!(endpoint = %self.endpoint, "Connection error: {e}");
                        link.close().await;
                        return Served::Closed(Some(e.to_string()));
                    }
                    None => {
                        tracing::info!(endpoint = %self.endpoint, "Connection closed by peer");
                        return Served::Closed(None);
                    }
                },
            }
        }
    }

    fn discard_pending(&mut self) {
        let mut dropped = 0_usize;
        while self.outbound_rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            tracing::debug!(endpoint = %self.endpoint, dropped, "Discarded messages sent while disconnected");
        }
    }
}

async fn open<C: Connector>(
    connector: &C,
    endpoint: &str,
    timeout: Option<Duration>,
) -> Result<C::Link, TransportError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, connector.connect(endpoint))
            .await
            .map_err(|_| TransportError::Timeout(limit))?,
        None => connector.connect(endpoint).await,
    }
}

/// Resolves once shutdown is requested or the owner is gone.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|closed| *closed).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        Frame,
        mock::{MockConnector, MockPeer},
    };

    const DELAY: Duration = Duration::from_millis(3000);

    fn options() -> ConnectOptions<Frame> {
        ConnectOptions::default().with_reconnect(ReconnectPolicy::fixed(DELAY))
    }

    async fn wait_for_state(manager: &ConnectionManager<Frame>, want: ConnectionState) {
        let mut rx = manager.watch_state();
        rx.wait_for(|s| *s == want).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_connects_and_sends_handshake_first() {
        let (connector, mut acceptor) = MockConnector::<Frame, Frame>::new();
        let (manager, mut events) = ConnectionManager::connect(
            connector,
            "ws://console",
            options().with_handshake(Frame::text("auth")),
        );

        let mut peer: MockPeer<Frame, Frame> = acceptor.accept().await;
        assert_eq!(events.recv().await, Some(LinkEvent::Opened));
        assert_eq!(manager.state(), ConnectionState::Connected);

        manager.send(Frame::text("ls\r"));
        assert_eq!(peer.next_sent().await, Some(Frame::text("auth")));
        assert_eq!(peer.next_sent().await, Some(Frame::text("ls\r")));

        peer.deliver(Frame::text("output"));
        assert_eq!(
            events.recv().await,
            Some(LinkEvent::Message(Frame::text("output")))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_while_disconnected_is_dropped() {
        let (connector, mut acceptor) = MockConnector::<Frame, Frame>::new();
        connector.refuse_next(1);
        let (manager, mut events) = ConnectionManager::connect(connector, "ws://console", options());

        assert!(matches!(events.recv().await, Some(LinkEvent::Closed { .. })));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        manager.send(Frame::text("lost"));

        tokio::time::sleep(DELAY).await;
        let mut peer = acceptor.accept().await;
        wait_for_state(&manager, ConnectionState::Connected).await;
        manager.send(Frame::text("kept"));

        // Only the message sent while connected reaches the peer.
        assert_eq!(peer.next_sent().await, Some(Frame::text("kept")));
        assert_eq!(peer.try_sent(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_close_reconnects_once_after_delay() {
        let (connector, mut acceptor) = MockConnector::<Frame, Frame>::new();
        let attempts = connector.clone();
        let (manager, mut events) = ConnectionManager::connect(connector, "ws://console", options());

        let peer = acceptor.accept().await;
        assert_eq!(events.recv().await, Some(LinkEvent::Opened));
        peer.hang_up();
        assert_eq!(events.recv().await, Some(LinkEvent::Closed { reason: None }));
        assert_eq!(attempts.attempts(), 1);

        tokio::time::sleep(DELAY - Duration::from_millis(1)).await;
        assert_eq!(attempts.attempts(), 1);

        tokio::time::sleep(Duration::from_millis(2)).await;
        let _peer = acceptor.accept().await;
        wait_for_state(&manager, ConnectionState::Connected).await;

        // Well past another delay window: still exactly one reconnect.
        tokio::time::sleep(DELAY * 3).await;
        assert_eq!(attempts.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_converges_after_each_forced_close() {
        let (connector, mut acceptor) = MockConnector::<Frame, Frame>::new();
        let (manager, _events) = ConnectionManager::connect(connector, "ws://console", options());

        for _ in 0..4 {
            let peer = acceptor.accept().await;
            wait_for_state(&manager, ConnectionState::Connected).await;
            let closed_at = tokio::time::Instant::now();
            peer.fail("reset by peer");

            let next = acceptor.accept().await;
            wait_for_state(&manager, ConnectionState::Connected).await;
            assert!(closed_at.elapsed() <= DELAY + Duration::from_millis(1));
            next.hang_up();
            wait_for_state(&manager, ConnectionState::Disconnected).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_pending_reconnect() {
        let (connector, mut acceptor) = MockConnector::<Frame, Frame>::new();
        let attempts = connector.clone();
        let (mut manager, mut events) =
            ConnectionManager::connect(connector, "ws://console", options());

        acceptor.accept().await.hang_up();
        assert_eq!(events.recv().await, Some(LinkEvent::Opened));
        assert!(matches!(events.recv().await, Some(LinkEvent::Closed { .. })));

        manager.close().await;
        manager.close().await;
        assert!(manager.is_closed());
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        tokio::time::sleep(DELAY * 2).await;
        assert_eq!(attempts.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_shuts_live_link() {
        let (connector, mut acceptor) = MockConnector::<Frame, Frame>::new();
        let (mut manager, _events) = ConnectionManager::connect(connector, "ws://console", options());

        let mut peer = acceptor.accept().await;
        wait_for_state(&manager, ConnectionState::Connected).await;
        manager.close().await;

        // The client half is gone, so the peer sees end of stream.
        assert_eq!(peer.next_sent().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_flushes_messages_sent_while_connected() {
        let (connector, mut acceptor) = MockConnector::<Frame, Frame>::new();
        let (mut manager, _events) = ConnectionManager::connect(connector, "ws://console", options());

        let mut peer = acceptor.accept().await;
        wait_for_state(&manager, ConnectionState::Connected).await;
        manager.send(Frame::text("bye"));
        manager.close().await;

        assert_eq!(peer.next_sent().await, Some(Frame::text("bye")));
        assert_eq!(peer.next_sent().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_counts_as_failure() {
        let (connector, mut acceptor) = MockConnector::<Frame, Frame>::new();
        connector.stall_next(1);
        let (manager, mut events) = ConnectionManager::connect(
            connector,
            "ws://console",
            options().with_connect_timeout(Duration::from_millis(5000)),
        );

        match events.recv().await {
            Some(LinkEvent::Closed { reason: Some(reason) }) => assert!(reason.contains("timed out")),
            other => panic!("unexpected event: {other:?}"),
        }

        tokio::time::sleep(DELAY).await;
        let _peer = acceptor.accept().await;
        wait_for_state(&manager, ConnectionState::Connected).await;
    }
}
