//! MQTT transport (TCP or WebSocket sub-protocol).
//!
//! Each link owns a fresh rumqttc client. rumqttc's own retry loop is not
//! used: when the event loop errors the link ends and the connection manager
//! schedules the reconnect like any other transport.

use std::time::Duration;

use async_trait::async_trait;
use fleet_live_core::{
    BrokerConfig,
    traits::{Connector, Link, TransportError},
};
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, Transport,
};
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    client::PubSubClient,
    protocol::{Command, Delivery, Qos},
};

/// Request channel capacity of each rumqttc client.
const REQUEST_CAPACITY: usize = 64;

/// How long `close` lets queued requests drain before dropping the session.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

impl From<Qos> for rumqttc::QoS {
    fn from(qos: Qos) -> Self {
        match qos {
            Qos::AtMostOnce => Self::AtMostOnce,
            Qos::AtLeastOnce => Self::AtLeastOnce,
            Qos::ExactlyOnce => Self::ExactlyOnce,
        }
    }
}

/// Connector opening MQTT sessions.
#[derive(Debug, Clone)]
pub struct MqttConnector {
    client_prefix: String,
    keep_alive: Duration,
    clean_session: bool,
}

impl MqttConnector {
    /// Connector settings from broker configuration.
    #[must_use]
    pub fn from_config(config: &BrokerConfig) -> Self {
        Self {
            client_prefix: "fleet-live".to_string(),
            // rumqttc asserts on keep-alive intervals under five seconds.
            keep_alive: Duration::from_secs(config.keep_alive_secs.max(5)),
            clean_session: config.clean_session,
        }
    }

    /// Prefix for generated client identifiers.
    #[must_use]
    pub fn with_client_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.client_prefix = prefix.into();
        self
    }

    fn options(&self, endpoint: &str) -> Result<MqttOptions, TransportError> {
        let invalid = || TransportError::InvalidEndpoint(endpoint.to_string());
        let (scheme, rest) = endpoint.split_once("://").ok_or_else(invalid)?;
        let authority = rest.split('/').next().unwrap_or_default();
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid())?),
            None => (authority, default_port(scheme).ok_or_else(invalid)?),
        };
        if host.is_empty() {
            return Err(invalid());
        }

        let client_id = format!("{}-{}", self.client_prefix, uuid::Uuid::new_v4().simple());
        let mut options = match scheme {
            // WebSocket transports take the full URL as the host.
            "ws" => {
                let mut options = MqttOptions::new(client_id, endpoint, port);
                options.set_transport(Transport::Ws);
                options
            }
            "wss" => {
                let mut options = MqttOptions::new(client_id, endpoint, port);
                options.set_transport(Transport::wss_with_default_config());
                options
            }
            "mqtt" | "tcp" => MqttOptions::new(client_id, host, port),
            _ => return Err(invalid()),
        };
        options
            .set_keep_alive(self.keep_alive)
            .set_clean_session(self.clean_session);
        Ok(options)
    }
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "ws" => Some(80),
        "wss" => Some(443),
        "mqtt" | "tcp" => Some(1883),
        _ => None,
    }
}

#[async_trait]
impl Connector for MqttConnector {
    type Link = MqttLink;

    async fn connect(&self, endpoint: &str) -> Result<Self::Link, TransportError> {
        let options = self.options(endpoint)?;
        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code != ConnectReturnCode::Success {
                        return Err(TransportError::ConnectFailed(format!(
                            "broker refused connection: {:?}",
                            ack.code
                        )));
                    }
                    break;
                }
                Ok(_) => {}
                Err(e) => return Err(TransportError::ConnectFailed(e.to_string())),
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let poller = tokio::spawn(poll_deliveries(eventloop, tx));
        Ok(MqttLink {
            client,
            deliveries: rx,
            poller,
        })
    }
}

/// Drives the rumqttc event loop (acks, pings, retransmits) and forwards
/// publishes. Ends on the first error or once a disconnect has been sent or
/// received.
async fn poll_deliveries(
    mut eventloop: EventLoop,
    tx: mpsc::UnboundedSender<Result<Delivery, TransportError>>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let delivery = Delivery {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                };
                if tx.send(Ok(delivery)).is_err() {
                    return;
                }
            }
            Ok(Event::Incoming(Packet::Disconnect) | Event::Outgoing(Outgoing::Disconnect)) => return,
            Ok(_) => {}
            Err(e) => {
                let _ = tx.send(Err(TransportError::Protocol(e.to_string())));
                return;
            }
        }
    }
}

/// An open MQTT session.
pub struct MqttLink {
    client: AsyncClient,
    deliveries: mpsc::UnboundedReceiver<Result<Delivery, TransportError>>,
    poller: JoinHandle<()>,
}

#[async_trait]
impl Link for MqttLink {
    type Inbound = Delivery;
    type Outbound = Command;

    /// Waits while the request queue is full; fails only once the session
    /// has ended.
    async fn send(&mut self, command: Command) -> Result<(), TransportError> {
        let result = match command {
            Command::Subscribe { topic, qos } => self.client.subscribe(topic, qos.into()).await,
            Command::Unsubscribe { topic } => self.client.unsubscribe(topic).await,
            Command::Publish {
                topic,
                payload,
                qos,
            } => self.client.publish(topic, qos.into(), false, payload).await,
        };
        result.map_err(|e| TransportError::Protocol(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<Delivery, TransportError>> {
        self.deliveries.recv().await
    }

    async fn close(&mut self) {
        // Requests queued before the disconnect still go out in order.
        let drained = tokio::time::timeout(CLOSE_GRACE, async {
            match self.client.disconnect().await {
                Ok(()) => {
                    let _ = (&mut self.poller).await;
                }
                Err(e) => tracing::debug!("MQTT disconnect: {e}"),
            }
        })
        .await;
        if drained.is_err() {
            tracing::debug!("MQTT disconnect did not complete in time");
        }
        self.poller.abort();
    }
}

impl Drop for MqttLink {
    fn drop(&mut self) {
        self.poller.abort();
    }
}

impl PubSubClient {
    /// Connect to an MQTT broker.
    #[must_use]
    pub fn connect_mqtt(config: &BrokerConfig) -> Self {
        Self::connect(MqttConnector::from_config(config), config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connector() -> MqttConnector {
        MqttConnector::from_config(&BrokerConfig::default())
    }

    #[test]
    fn test_websocket_endpoint_keeps_full_url() {
        let options = connector().options("ws://broker.test:9001/mqtt").unwrap();
        let (host, port) = options.broker_address();
        assert_eq!(host, "ws://broker.test:9001/mqtt");
        assert_eq!(port, 9001);
        assert!(options.client_id().starts_with("fleet-live-"));
    }

    #[test]
    fn test_tcp_endpoint_uses_host() {
        let options = connector().options("mqtt://broker.test").unwrap();
        assert_eq!(options.broker_address(), ("broker.test".to_string(), 1883));
    }

    #[test]
    fn test_client_ids_are_unique() {
        let connector = connector();
        let a = connector.options("tcp://broker.test:1883").unwrap();
        let b = connector.options("tcp://broker.test:1883").unwrap();
        assert_ne!(a.client_id(), b.client_id());
    }

    /// Link over a client whose event loop is held but never polled.
    fn stalled_link(capacity: usize) -> (MqttLink, EventLoop) {
        let options = connector().options("tcp://broker.test:1883").unwrap();
        let (client, eventloop) = AsyncClient::new(options, capacity);
        let (_tx, deliveries) = mpsc::unbounded_channel();
        let link = MqttLink {
            client,
            deliveries,
            poller: tokio::spawn(std::future::pending()),
        };
        (link, eventloop)
    }

    fn publish(n: u8) -> Command {
        Command::Publish {
            topic: "motu/tap/request".to_string(),
            payload: vec![n],
            qos: Qos::AtLeastOnce,
        }
    }

    #[tokio::test]
    async fn test_full_request_queue_waits_instead_of_failing() {
        let (mut link, _eventloop) = stalled_link(1);
        link.send(publish(1)).await.unwrap();

        let mut second = tokio_test::task::spawn(link.send(publish(2)));
        tokio_test::assert_pending!(second.poll());
        tokio_test::assert_pending!(second.poll());
    }

    #[tokio::test]
    async fn test_send_fails_once_session_is_gone() {
        let (mut link, eventloop) = stalled_link(4);
        drop(eventloop);

        assert!(matches!(
            link.send(publish(1)).await,
            Err(TransportError::Protocol(_))
        ));
    }

    #[test]
    fn test_rejects_bad_endpoints() {
        let connector = connector();
        assert!(connector.options("broker.test:1883").is_err());
        assert!(connector.options("http://broker.test").is_err());
        assert!(connector.options("ws://broker.test:port").is_err());
        assert!(connector.options("tcp://:1883").is_err());
    }
}
