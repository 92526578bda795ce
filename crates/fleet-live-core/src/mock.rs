//! In-memory connector for testing without real sockets or brokers.
//!
//! Every successful `connect` creates a fresh link and hands the remote half
//! (a [`MockPeer`]) to the test through a [`MockAcceptor`].

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::traits::{Connector, Link, TransportError};

#[derive(Debug, Default)]
struct Script {
    attempts: AtomicUsize,
    refuse: AtomicUsize,
    stall: AtomicUsize,
}

/// Connector producing in-memory links.
///
/// `I` is what the peer sends to the client, `O` what the client sends.
#[derive(Debug)]
pub struct MockConnector<I, O> {
    script: Arc<Script>,
    peers: mpsc::UnboundedSender<MockPeer<I, O>>,
}

impl<I, O> Clone for MockConnector<I, O> {
    fn clone(&self) -> Self {
        Self {
            script: Arc::clone(&self.script),
            peers: self.peers.clone(),
        }
    }
}

impl<I, O> MockConnector<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Create a connector and the acceptor that receives its peers.
    #[must_use]
    pub fn new() -> (Self, MockAcceptor<I, O>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let connector = Self {
            script: Arc::new(Script::default()),
            peers,
        };
        (connector, MockAcceptor { rx })
    }

    /// Number of connect attempts so far.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.script.attempts.load(Ordering::SeqCst)
    }

    /// Fail the next `n` connect attempts immediately.
    pub fn refuse_next(&self, n: usize) {
        self.script.refuse.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` connect attempts hang forever.
    pub fn stall_next(&self, n: usize) {
        self.script.stall.store(n, Ordering::SeqCst);
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl<I, O> Connector for MockConnector<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    type Link = MockLink<I, O>;

    async fn connect(&self, endpoint: &str) -> Result<Self::Link, TransportError> {
        self.script.attempts.fetch_add(1, Ordering::SeqCst);

        if take_one(&self.script.refuse) {
            return Err(TransportError::ConnectFailed(format!("{endpoint} refused")));
        }
        if take_one(&self.script.stall) {
            std::future::pending::<()>().await;
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let peer = MockPeer {
            tx: inbound_tx,
            rx: outbound_rx,
        };
        self.peers
            .send(peer)
            .map_err(|_| TransportError::ConnectFailed("acceptor dropped".to_string()))?;

        Ok(MockLink {
            rx: inbound_rx,
            tx: Some(outbound_tx),
        })
    }
}

/// Client half of an in-memory connection.
#[derive(Debug)]
pub struct MockLink<I, O> {
    rx: mpsc::UnboundedReceiver<Result<I, TransportError>>,
    tx: Option<mpsc::UnboundedSender<O>>,
}

#[async_trait]
impl<I, O> Link for MockLink<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    type Inbound = I;
    type Outbound = O;

    async fn send(&mut self, msg: O) -> Result<(), TransportError> {
        self.tx
            .as_ref()
            .ok_or(TransportError::Closed)?
            .send(msg)
            .map_err(|_| TransportError::Closed)
    }

    async fn recv(&mut self) -> Option<Result<I, TransportError>> {
        self.rx.recv().await
    }

    async fn close(&mut self) {
        self.tx = None;
        self.rx.close();
    }
}

/// Receives the remote half of every link a [`MockConnector`] opens.
#[derive(Debug)]
pub struct MockAcceptor<I, O> {
    rx: mpsc::UnboundedReceiver<MockPeer<I, O>>,
}

impl<I, O> MockAcceptor<I, O> {
    /// Wait for the next opened link.
    ///
    /// # Panics
    /// Panics if the connector and all its clones are gone.
    pub async fn accept(&mut self) -> MockPeer<I, O> {
        self.rx.recv().await.expect("mock connector dropped")
    }

    /// Take an already-opened link, if any.
    pub fn try_accept(&mut self) -> Option<MockPeer<I, O>> {
        self.rx.try_recv().ok()
    }
}

/// Remote half of an in-memory connection.
#[derive(Debug)]
pub struct MockPeer<I, O> {
    tx: mpsc::UnboundedSender<Result<I, TransportError>>,
    rx: mpsc::UnboundedReceiver<O>,
}

impl<I, O> MockPeer<I, O> {
    /// Deliver a message to the client.
    pub fn deliver(&self, msg: I) {
        let _ = self.tx.send(Ok(msg));
    }

    /// Wait for the next message the client sent.
    ///
    /// Returns `None` once the client closed its half.
    pub async fn next_sent(&mut self) -> Option<O> {
        self.rx.recv().await
    }

    /// Next message the client sent, without waiting.
    pub fn try_sent(&mut self) -> Option<O> {
        self.rx.try_recv().ok()
    }

    /// Close the connection cleanly from the remote side.
    pub fn hang_up(self) {}

    /// Fail the connection with a transport error.
    pub fn fail(self, reason: &str) {
        let _ = self.tx.send(Err(TransportError::Protocol(reason.to_string())));
    }
}
