// Feed Transport - inbound boundary between the socket and the pipelines
// The embedding application owns the real connection and pushes payloads in

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Message received on a subscribed topic
#[derive(Clone, Debug)]
pub struct FeedMessage {
    pub topic: String,
    pub payload: String,
    /// Unix millis at which the transport accepted the payload
    pub received_at: i64,
}

impl FeedMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            received_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

impl fmt::Display for FeedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FeedMessage(topic={}, received_at={}, payload_len={})",
               self.topic, self.received_at, self.payload.len())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,
    #[error("invalid topic: '{0}'")]
    InvalidTopic(String),
}

// ============================================================================
// Subscription handle
// ============================================================================

/// Cancels one topic subscription. Cancelling happens at most once,
/// either explicitly or when the handle is dropped.
pub struct SubscriptionHandle {
    topic: String,
    cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl SubscriptionHandle {
    pub fn new(topic: impl Into<String>, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            topic: topic.into(),
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Returns true only for the call that actually cancelled
    pub fn cancel(&self) -> bool {
        let cancel = self.cancel.lock().take();
        match cancel {
            Some(cancel) => {
                cancel();
                debug!(topic = %self.topic, "Subscription cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.lock().is_none()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("topic", &self.topic)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

// ============================================================================
// Transport trait
// ============================================================================

/// Source of feed messages for a topic.
///
/// Each call yields an independent single-consumer queue; messages for a
/// topic are delivered in the order the transport received them and are
/// never discarded while the subscription is live.
pub trait FeedTransport: Send + Sync {
    fn subscribe(
        &self,
        topic: &str,
    ) -> Result<(mpsc::UnboundedReceiver<FeedMessage>, SubscriptionHandle), TransportError>;
}

// ============================================================================
// In-memory channel transport
// ============================================================================

type TopicSenders = HashMap<String, Vec<(u64, mpsc::UnboundedSender<FeedMessage>)>>;

/// Fan-out of pushed payloads to every subscriber of the topic
#[derive(Clone, Default)]
pub struct ChannelTransport {
    senders: Arc<RwLock<TopicSenders>>,
    next_id: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
    pushed: Arc<AtomicU64>,
    delivered: Arc<AtomicU64>,
}

#[derive(Debug, Clone)]
pub struct ChannelTransportStats {
    pub active_topics: usize,
    pub active_subscriptions: usize,
    pub messages_pushed: u64,
    pub messages_delivered: u64,
}

impl fmt::Display for ChannelTransportStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelTransportStats(topics={}, subs={}, pushed={}, delivered={})",
               self.active_topics, self.active_subscriptions, self.messages_pushed,
               self.messages_delivered)
    }
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a payload to every current subscriber of `topic`.
    /// Returns how many subscribers accepted it. Queues are unbounded, so a
    /// slow consumer falls behind but never loses a delta.
    pub fn push(&self, topic: &str, payload: impl Into<String>) -> Result<usize, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        let message = FeedMessage::new(topic, payload);
        self.pushed.fetch_add(1, Ordering::Relaxed);

        let senders = self.senders.read();
        let Some(subscribers) = senders.get(topic) else {
            debug!(topic = %topic, "No subscribers for topic");
            return Ok(0);
        };

        let mut accepted = 0;
        for (id, sender) in subscribers {
            match sender.send(message.clone()) {
                Ok(()) => accepted += 1,
                Err(_) => debug!(topic = %topic, subscription = id, "Subscriber queue closed"),
            }
        }
        self.delivered.fetch_add(accepted as u64, Ordering::Relaxed);
        Ok(accepted)
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.senders.read().get(topic).map_or(0, |s| s.len())
    }

    pub fn active_topics(&self) -> Vec<String> {
        self.senders.read().keys().cloned().collect()
    }

    /// Drop every sender; subscribers see their queues end
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let removed: usize = self.senders.write().drain().map(|(_, s)| s.len()).sum();
            info!(subscriptions = removed, "Channel transport closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn get_stats(&self) -> ChannelTransportStats {
        let senders = self.senders.read();
        ChannelTransportStats {
            active_topics: senders.len(),
            active_subscriptions: senders.values().map(|s| s.len()).sum(),
            messages_pushed: self.pushed.load(Ordering::Relaxed),
            messages_delivered: self.delivered.load(Ordering::Relaxed),
        }
    }
}

impl FeedTransport for ChannelTransport {
    fn subscribe(
        &self,
        topic: &str,
    ) -> Result<(mpsc::UnboundedReceiver<FeedMessage>, SubscriptionHandle), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        if !topic.starts_with('/') {
            return Err(TransportError::InvalidTopic(topic.to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.senders
            .write()
            .entry(topic.to_string())
            .or_default()
            .push((id, tx));

        info!(topic = %topic, subscription = id, "Subscribed");

        let senders = Arc::clone(&self.senders);
        let owned_topic = topic.to_string();
        let handle = SubscriptionHandle::new(topic, move || {
            let mut senders = senders.write();
            if let Some(subscribers) = senders.get_mut(&owned_topic) {
                subscribers.retain(|(sub_id, _)| *sub_id != id);
                if subscribers.is_empty() {
                    senders.remove(&owned_topic);
                }
            }
        });

        Ok((rx, handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOPIC: &str = "/sports/4093/en/cashout/B1";

    #[test]
    fn test_push_without_subscribers() {
        let transport = ChannelTransport::new();
        assert_eq!(transport.push(TOPIC, "{}").unwrap(), 0);
        assert_eq!(transport.get_stats().messages_pushed, 1);
    }

    #[test]
    fn test_subscribe_and_receive_in_order() {
        let transport = ChannelTransport::new();
        let (mut rx, _handle) = transport.subscribe(TOPIC).unwrap();

        transport.push(TOPIC, "first").unwrap();
        transport.push(TOPIC, "second").unwrap();

        assert_eq!(rx.try_recv().unwrap().payload, "first");
        assert_eq!(rx.try_recv().unwrap().payload, "second");
    }

    #[test]
    fn test_burst_is_queued_not_dropped() {
        let transport = ChannelTransport::new();
        let (mut rx, _handle) = transport.subscribe(TOPIC).unwrap();

        for i in 0..5000 {
            assert_eq!(transport.push(TOPIC, i.to_string()).unwrap(), 1);
        }

        let stats = transport.get_stats();
        assert_eq!(stats.messages_pushed, 5000);
        assert_eq!(stats.messages_delivered, 5000);
        for i in 0..5000 {
            assert_eq!(rx.try_recv().unwrap().payload, i.to_string());
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_handle_cancels_once() {
        let transport = ChannelTransport::new();
        let (_rx, handle) = transport.subscribe(TOPIC).unwrap();
        assert_eq!(transport.subscriber_count(TOPIC), 1);

        assert!(handle.cancel());
        assert!(!handle.cancel());
        assert!(handle.is_cancelled());
        assert_eq!(transport.subscriber_count(TOPIC), 0);
        assert_eq!(transport.push(TOPIC, "late").unwrap(), 0);
    }

    #[test]
    fn test_drop_handle_unsubscribes() {
        let transport = ChannelTransport::new();
        {
            let (_rx, _handle) = transport.subscribe(TOPIC).unwrap();
            assert_eq!(transport.subscriber_count(TOPIC), 1);
        }
        assert_eq!(transport.subscriber_count(TOPIC), 0);
    }

    #[test]
    fn test_closed_transport_rejects() {
        let transport = ChannelTransport::new();
        transport.close();
        assert_eq!(transport.subscribe(TOPIC).err(), Some(TransportError::Closed));
        assert_eq!(transport.push(TOPIC, "x"), Err(TransportError::Closed));
    }

    #[test]
    fn test_invalid_topic() {
        let transport = ChannelTransport::new();
        assert!(matches!(
            transport.subscribe("cashout"),
            Err(TransportError::InvalidTopic(_))
        ));
    }
}
