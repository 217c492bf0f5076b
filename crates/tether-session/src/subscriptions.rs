//! Topics the session intends to receive.
//!
//! A topic enters the registry only after its `subscribe` call succeeds and
//! leaves it on `unsubscribe` or when the endpoint refuses its replay. The
//! registry outlives connections, `close()` included; every topic is
//! re-subscribed once the next connection opens.

/// Ordered set of subscribed topics. Replay follows insertion order.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    topics: Vec<String>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a topic. Returns `false` if it was already present.
    pub fn insert(&mut self, topic: &str) -> bool {
        if self.contains(topic) {
            return false;
        }
        self.topics.push(topic.to_string());
        true
    }

    /// Forget a topic. Returns `false` if it was not present.
    pub fn remove(&mut self, topic: &str) -> bool {
        let before = self.topics.len();
        self.topics.retain(|t| t != topic);
        self.topics.len() != before
    }

    /// Whether `topic` is registered.
    pub fn contains(&self, topic: &str) -> bool {
        self.topics.iter().any(|t| t == topic)
    }

    /// Snapshot of registered topics in insertion order.
    pub fn topics(&self) -> Vec<String> {
        self.topics.clone()
    }

    /// Number of registered topics.
    pub fn len(&self) -> usize {
        self.topics.len()
    }

    /// Whether no topic is registered.
    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}
