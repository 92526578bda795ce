//! Publish/subscribe transport for device live views.
//!
//! Provides:
//! - Topic commands and deliveries (`Command`, `Delivery`, `Qos`)
//! - `PubSubClient` - subscriptions re-established on every reconnect
//! - MQTT connector over TCP or WebSocket (feature: mqtt)

pub mod client;
pub mod protocol;

#[cfg(feature = "mqtt")]
pub mod mqtt;

pub use client::{PubSubClient, PubSubError, Subscription};
pub use protocol::{Command, Delivery, Qos, topic_matches};
