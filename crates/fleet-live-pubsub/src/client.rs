//! Publish/subscribe client over a persistent connection.

use std::sync::{Arc, Mutex, PoisonError};

use fleet_live_core::{
    BrokerConfig, ConnectOptions, ConnectionManager, ConnectionState, LinkEvent, OutboundSender,
    traits::{Connector, Link},
};
use serde::Serialize;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

use crate::protocol::{Command, Delivery, Qos, topic_matches};

/// Publish/subscribe error.
#[derive(Debug, thiserror::Error)]
pub enum PubSubError {
    #[error("Failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

struct Route {
    filter: String,
    qos: Qos,
    tx: mpsc::UnboundedSender<Delivery>,
}

type Routes = Arc<Mutex<Vec<Route>>>;

fn lock(routes: &Routes) -> std::sync::MutexGuard<'_, Vec<Route>> {
    routes.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Stream of deliveries for one subscription.
#[derive(Debug)]
pub struct Subscription {
    filter: String,
    rx: mpsc::UnboundedReceiver<Delivery>,
}

impl Subscription {
    /// Topic filter this subscription was made with.
    #[must_use]
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Next delivery, in broker order.
    ///
    /// Returns `None` once the client is closed or the topic unsubscribed.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }

    /// Next delivery, without waiting.
    pub fn try_recv(&mut self) -> Option<Delivery> {
        self.rx.try_recv().ok()
    }
}

/// Publish/subscribe client.
///
/// The subscription set lives on the client, not the broker: every time the
/// connection reaches `Connected` all subscriptions are sent again.
/// Deliveries are not deduplicated.
pub struct PubSubClient {
    manager: ConnectionManager<Command>,
    routes: Routes,
    pump: Option<JoinHandle<()>>,
}

impl PubSubClient {
    /// Connect to the broker at `config.url`.
    pub fn connect<C>(connector: C, config: &BrokerConfig) -> Self
    where
        C: Connector,
        C::Link: Link<Inbound = Delivery, Outbound = Command>,
    {
        let options = ConnectOptions::default()
            .with_reconnect(config.reconnect)
            .with_connect_timeout(config.connect_timeout());
        let (manager, events) = ConnectionManager::connect(connector, config.url.clone(), options);

        let routes = Routes::default();
        let pump = tokio::spawn(pump(events, manager.sender(), Arc::clone(&routes)));

        Self {
            manager,
            routes,
            pump: Some(pump),
        }
    }

    /// Subscribe to `topic` (filters may use `+` and `#`).
    ///
    /// The subscription is sent now if connected and again after every
    /// reconnect.
    pub fn subscribe(&self, topic: impl Into<String>, qos: Qos) -> Subscription {
        let filter = topic.into();
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.routes).push(Route {
            filter: filter.clone(),
            qos,
            tx,
        });
        self.manager.send(Command::Subscribe {
            topic: filter.clone(),
            qos,
        });
        Subscription { filter, rx }
    }

    /// Drop every subscription made with `topic` and tell the broker.
    pub fn unsubscribe(&self, topic: &str) {
        lock(&self.routes).retain(|route| route.filter != topic);
        self.manager.send(Command::Unsubscribe {
            topic: topic.to_string(),
        });
    }

    /// Publish `payload` serialized as JSON text.
    ///
    /// Dropped silently while disconnected.
    ///
    /// # Errors
    /// Returns error if the payload cannot be serialized.
    pub fn publish<T: Serialize>(
        &self,
        topic: impl Into<String>,
        payload: &T,
        qos: Qos,
    ) -> Result<(), PubSubError> {
        let payload = serde_json::to_vec(payload)?;
        self.publish_raw(topic, payload, qos);
        Ok(())
    }

    /// Publish raw bytes.
    pub fn publish_raw(&self, topic: impl Into<String>, payload: Vec<u8>, qos: Qos) {
        self.manager.send(Command::Publish {
            topic: topic.into(),
            payload,
            qos,
        });
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    /// Receiver that observes every state change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.manager.watch_state()
    }

    /// Close the connection, cancel any pending reconnect and end all
    /// subscriptions.
    pub async fn close(&mut self) {
        self.manager.close().await;
        if let Some(pump) = self.pump.take() {
            let _ = pump.await;
        }
        lock(&self.routes).clear();
    }
}

async fn pump(
    mut events: mpsc::UnboundedReceiver<LinkEvent<Delivery>>,
    sender: OutboundSender<Command>,
    routes: Routes,
) {
    while let Some(event) = events.recv().await {
        match event {
            LinkEvent::Opened => {
                let mut topics: Vec<(String, Qos)> = Vec::new();
                let mut routes = lock(&routes);
                routes.retain(|route| !route.tx.is_closed());
                for route in routes.iter() {
                    if !topics.iter().any(|(t, _)| *t == route.filter) {
                        topics.push((route.filter.clone(), route.qos));
                    }
                }
                drop(routes);
                tracing::debug!(count = topics.len(), "Re-establishing subscriptions");
                for (topic, qos) in topics {
                    sender.send(Command::Subscribe { topic, qos });
                }
            }
            LinkEvent::Message(delivery) => {
                let mut routes = lock(&routes);
                routes.retain(|route| !route.tx.is_closed());
                let mut matched = false;
                for route in routes.iter().filter(|r| topic_matches(&r.filter, &delivery.topic)) {
                    matched = true;
                    let _ = route.tx.send(delivery.clone());
                }
                if !matched {
                    tracing::debug!(topic = %delivery.topic, "Delivery on a topic with no subscriber");
                }
            }
            LinkEvent::Closed { reason } => {
                tracing::debug!(?reason, "Broker link closed");
            }
        }
    }
}
