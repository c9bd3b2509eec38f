//! Topics the runtime subscribes to on every new session.

use heapless::{String, Vec};

/// Maximum length for a single topic string.
pub const MAX_TOPIC_LEN: usize = 128;

/// An owned list of topic filters.
///
/// Sessions are always clean, so the broker forgets subscriptions when the
/// connection drops. The runtime replays this list after each CONNACK.
#[derive(Debug, Default)]
pub struct TopicRegistry<const MAX_TOPICS: usize> {
    topics: Vec<String<MAX_TOPIC_LEN>, MAX_TOPICS>,
}

impl<const MAX_TOPICS: usize> TopicRegistry<MAX_TOPICS> {
    /// Create a new empty topic registry.
    pub const fn new() -> Self {
        Self { topics: Vec::new() }
    }

    /// Add a topic to the registry by copying the string.
    ///
    /// Returns `true` if the topic is now registered, `false` if the registry
    /// is full or the topic is too long. Duplicates are stored once.
    pub fn add_topic(&mut self, topic: &str) -> bool {
        if self.contains(topic) {
            return true;
        }

        let mut owned = String::new();
        if owned.push_str(topic).is_err() {
            return false;
        }

        self.topics.push(owned).is_ok()
    }

    /// Removes a topic. Returns `false` if it was not registered.
    pub fn remove_topic(&mut self, topic: &str) -> bool {
        let before = self.topics.len();
        self.topics.retain(|t| t.as_str() != topic);
        self.topics.len() != before
    }

    /// Check if `topic` is registered.
    pub fn contains(&self, topic: &str) -> bool {
        self.iter().any(|t| t == topic)
    }

    /// Get an iterator over the registered topics.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.topics.iter().map(|s| s.as_str())
    }

    /// Get the number of registered topics.
    pub fn len(&self) -> usize {
        self.topics.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// Clear all registered topics.
    pub fn clear(&mut self) {
        self.topics.clear();
    }
}
