//! Core building blocks for device live views.
//!
//! This crate provides:
//! - `ConnectionManager` - Persistent connection with fixed-delay reconnect
//! - `Connector`/`Link` - Transport seams implemented per wire protocol
//! - `ResetTimer` - Cancellable one-shot timer owned by a single component
//! - `LiveViewConfig` - Endpoint, topic and timing configuration

pub mod config;
pub mod manager;
pub mod state;
pub mod timer;
pub mod traits;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use config::{BrokerConfig, ConfigError, ConsoleConfig, LiveViewConfig, ReconnectPolicy, TapConfig};
pub use manager::{ConnectOptions, ConnectionManager, LinkEvent, OutboundSender};
pub use state::{ConnectionState, Frame};
pub use timer::ResetTimer;
pub use traits::{Connector, Link, TransportError};
