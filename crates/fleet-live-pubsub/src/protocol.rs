//! Topic commands and deliveries.

use serde::{Deserialize, Serialize};

/// Delivery guarantee for a subscription or publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Qos {
    AtMostOnce,
    /// Duplicates are possible; consumers must tolerate them.
    #[default]
    AtLeastOnce,
    ExactlyOnce,
}

/// Message from client to broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Subscribe { topic: String, qos: Qos },
    Unsubscribe { topic: String },
    Publish { topic: String, payload: Vec<u8>, qos: Qos },
}

/// Message delivered by the broker on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl Delivery {
    /// Create a delivery.
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Whether `topic` matches subscription `filter`.
///
/// `+` matches exactly one level, a trailing `#` matches the parent level and
/// everything below it.
#[must_use]
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.next().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_topic() {
        assert!(topic_matches("motu/tap/response", "motu/tap/response"));
        assert!(!topic_matches("motu/tap/response", "motu/tap/request"));
        assert!(!topic_matches("motu/tap", "motu/tap/response"));
        assert!(!topic_matches("motu/tap/response", "motu/tap"));
    }

    #[test]
    fn test_wildcards() {
        assert!(topic_matches("motu/+/response", "motu/tap/response"));
        assert!(!topic_matches("motu/+", "motu/tap/response"));
        assert!(topic_matches("motu/#", "motu/tap/response"));
        assert!(topic_matches("motu/#", "motu"));
        assert!(topic_matches("#", "anything/at/all"));
        assert!(!topic_matches("motu/#/x", "motu/a/x"));
    }

    #[test]
    fn test_default_qos_is_at_least_once() {
        assert_eq!(Qos::default(), Qos::AtLeastOnce);
    }
}
