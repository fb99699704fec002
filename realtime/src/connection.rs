use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::*;
use serde_json::Value;
use std::sync::Arc;

/// Callback invoked with the decoded JSON payload of each message on a topic.
pub type Handler = Arc<dyn Fn(Value) + Send + Sync>;

/// Unique identifier for a subscription (client-generated)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(format!("sub-{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to an active topic subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    id: SubscriptionId,
    topic: String,
}

impl Subscription {
    pub(crate) fn new(topic: &str) -> Self {
        Self {
            id: SubscriptionId::new(),
            topic: topic.to_string(),
        }
    }

    pub fn id(&self) -> &SubscriptionId {
        &self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

struct SubscriptionEntry {
    subscription: Subscription,
    handler: Handler,
}

/// Topic-keyed subscription registry: at most one subscription per topic.
pub struct SubscriptionRegistry {
    entries: DashMap<String, SubscriptionEntry>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Existing subscription for `topic`, if any.
    pub fn get(&self, topic: &str) -> Option<Subscription> {
        self.entries.get(topic).map(|e| e.subscription.clone())
    }

    /// Register `handler` for `topic` unless the topic is already taken.
    ///
    /// Returns the subscription and whether it was newly created. When the
    /// topic was already subscribed the new handler is dropped.
    pub fn insert_if_absent(&self, topic: &str, handler: Handler) -> (Subscription, bool) {
        match self.entries.entry(topic.to_string()) {
            Entry::Occupied(entry) => (entry.get().subscription.clone(), false),
            Entry::Vacant(entry) => {
                let subscription = Subscription::new(topic);
                entry.insert(SubscriptionEntry {
                    subscription: subscription.clone(),
                    handler,
                });
                (subscription, true)
            }
        }
    }

    pub fn remove(&self, topic: &str) -> Option<Subscription> {
        self.entries.remove(topic).map(|(_, e)| e.subscription)
    }

    /// Invoke the handler registered for `topic`. Returns false when nobody is
    /// subscribed.
    pub fn dispatch(&self, topic: &str, payload: Value) -> bool {
        // Clone the handler out so the shard lock is released before the
        // callback runs; handlers may subscribe or unsubscribe.
        let handler = match self.entries.get(topic) {
            Some(entry) => Arc::clone(&entry.handler),
            None => {
                debug!("Dropping message for unsubscribed topic {topic}");
                return false;
            }
        };
        handler(payload);
        true
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.entries
            .iter()
            .map(|e| e.value().subscription.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
