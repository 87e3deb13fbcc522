//! Per-channel handler bookkeeping for the bus.

use dashmap::DashMap;
use infra_api::{MessageHandler, Subscription};
use std::sync::atomic::{AtomicU64, Ordering};

/// What removing a subscription did to its channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    NotFound,
    /// Other handlers remain on the channel.
    Removed,
    /// The channel has no handlers left.
    LastRemoved,
}

/// Maps channel names to their handlers, in registration order.
#[derive(Default)]
pub struct HandlerTable {
    channels: DashMap<String, Vec<(u64, MessageHandler)>>,
    next_id: AtomicU64,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handler and reports whether it is the first one on the channel.
    pub fn add(&self, channel: &str, handler: MessageHandler) -> (Subscription, bool) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut entry = self.channels.entry(channel.to_string()).or_default();
        let first = entry.is_empty();
        entry.push((id, handler));
        (Subscription::new(channel, id), first)
    }

    pub fn remove(&self, subscription: &Subscription) -> Removal {
        let Some(mut entry) = self.channels.get_mut(subscription.channel()) else {
            return Removal::NotFound;
        };
        let before = entry.len();
        entry.retain(|(id, _)| *id != subscription.id());
        if entry.len() == before {
            return Removal::NotFound;
        }
        if !entry.is_empty() {
            return Removal::Removed;
        }
        drop(entry);
        self.channels
            .remove_if(subscription.channel(), |_, handlers| handlers.is_empty());
        Removal::LastRemoved
    }

    /// Snapshot of the handlers currently registered on `channel`.
    pub fn handlers_for(&self, channel: &str) -> Vec<MessageHandler> {
        self.channels
            .get(channel)
            .map(|handlers| handlers.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default()
    }

    /// Channels with at least one handler.
    pub fn channels(&self) -> Vec<String> {
        self.channels
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| entry.key().clone())
            .collect()
    }
}
