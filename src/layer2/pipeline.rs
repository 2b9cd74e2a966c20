// Feed Pipeline - one subscription's lifecycle
// Transport queue -> Envelope -> ContentStore -> ContentPublisher

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

use crate::core::config::{get_config, StoreConfig};
use crate::core::events::{ContentSnapshot, SnapshotEntity, StoreNotification};
use crate::core::logger::feed_span;
use crate::core::types::{BettingOffer, Cashout, EventInfo, Market};
use crate::layer1::topics::FeedTopic;
use crate::layer1::transport::{FeedMessage, FeedTransport, SubscriptionHandle, TransportError};
use crate::layer2::content_store::{ContentStore, ContentStoreStats};
use crate::layer2::envelope::{DecodeError, Envelope, MessageType};
use crate::layer2::publisher::{ContentPublisher, ObserverId, PublisherStats};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("processing task already started")]
    AlreadyStarted,
    #[error("pipeline is unsubscribed")]
    Inactive,
    #[error("no tokio runtime available")]
    NoRuntime,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Result of feeding one message through the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Applied {
        message_type: MessageType,
        changes: usize,
        /// Whether observers were notified for this message
        published: bool,
    },
    /// Message text was not a JSON object; nothing changed
    Rejected(DecodeError),
    /// Pipeline was unsubscribed; nothing changed
    Inactive,
}

impl ProcessOutcome {
    pub fn changes(&self) -> usize {
        match self {
            ProcessOutcome::Applied { changes, .. } => *changes,
            _ => 0,
        }
    }
}

/// Pipeline statistics
#[derive(Debug, Clone)]
pub struct PipelineStats {
    pub feed_id: String,
    pub is_active: bool,
    pub is_running: bool,
    pub messages_processed: u64,
    pub decode_errors: u64,
    pub initial_dumps: u64,
    pub update_batches: u64,
    pub changes_applied: u64,
    pub records_dropped: u64,
    pub store: ContentStoreStats,
    pub publisher: PublisherStats,
}

impl fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pipeline(feed={}, active={}, running={}, processed={}, errors={}, changes={})",
            self.feed_id, self.is_active, self.is_running, self.messages_processed,
            self.decode_errors, self.changes_applied
        )
    }
}

#[derive(Debug, Clone, Default)]
struct PipelineCounters {
    messages_processed: u64,
    decode_errors: u64,
    initial_dumps: u64,
    update_batches: u64,
    changes_applied: u64,
    records_dropped: u64,
}

/// State shared between the pipeline and its processing task
struct PipelineCore {
    feed_id: String,
    store: ContentStore,
    publisher: ContentPublisher,
    active: AtomicBool,
    publish_empty_batches: bool,
    // Keeps apply + publish of one message together so observers see
    // batches in the order they were applied
    processing: Mutex<()>,
    counters: RwLock<PipelineCounters>,
}

impl PipelineCore {
    fn process_envelope(&self, envelope: Envelope) -> ProcessOutcome {
        let _processing = self.processing.lock();
        if !self.active.load(Ordering::Acquire) {
            return ProcessOutcome::Inactive;
        }

        let message_type = envelope.message_type();
        let (changes, must_publish) = match envelope.initial_content() {
            Some(records) => (self.store.apply_initial_dump(records), true),
            None => {
                let updates = envelope.content_updates().unwrap_or(&[]);
                (self.store.apply_updates(updates), false)
            }
        };

        {
            let mut counters = self.counters.write();
            counters.messages_processed += 1;
            counters.changes_applied += changes.len() as u64;
            counters.records_dropped += envelope.report().records_dropped as u64;
            if envelope.is_initial_dump() {
                counters.initial_dumps += 1;
            } else {
                counters.update_batches += 1;
            }
        }

        let change_count = changes.len();
        let published = must_publish || change_count > 0 || self.publish_empty_batches;
        if published {
            self.publisher.publish(changes, self.store.snapshot());
        }

        debug!(
            feed_id = %self.feed_id,
            message_type = %message_type,
            changes = change_count,
            published = published,
            "Message processed"
        );

        ProcessOutcome::Applied {
            message_type,
            changes: change_count,
            published,
        }
    }

    fn process_message(&self, raw_message: &str) -> ProcessOutcome {
        if !self.active.load(Ordering::Acquire) {
            return ProcessOutcome::Inactive;
        }
        match Envelope::from_json(raw_message) {
            Ok(envelope) => self.process_envelope(envelope),
            Err(e) => {
                self.counters.write().decode_errors += 1;
                warn!(feed_id = %self.feed_id, error = %e, "Dropping undecodable message");
                ProcessOutcome::Rejected(e)
            }
        }
    }
}

/// Owns one feed subscription: an independent store, its publisher, the
/// transport handle and the background task draining the transport queue.
pub struct FeedPipeline {
    core: Arc<PipelineCore>,
    task: Mutex<Option<JoinHandle<()>>>,
    subscription: Mutex<Option<SubscriptionHandle>>,
}

impl FeedPipeline {
    pub fn new(feed_id: &str) -> Self {
        let store_config = get_config().read().store();
        Self::with_config(feed_id, &store_config)
    }

    pub fn with_config(feed_id: &str, config: &StoreConfig) -> Self {
        info!(feed_id = feed_id, "Creating feed pipeline");

        Self {
            core: Arc::new(PipelineCore {
                feed_id: feed_id.to_string(),
                store: ContentStore::new(feed_id),
                publisher: ContentPublisher::new(feed_id),
                active: AtomicBool::new(true),
                publish_empty_batches: config.publish_empty_batches,
                processing: Mutex::new(()),
                counters: RwLock::new(PipelineCounters::default()),
            }),
            task: Mutex::new(None),
            subscription: Mutex::new(None),
        }
    }

    /// Subscribe `topic` on `transport` and start draining it.
    /// Must be called from within a tokio runtime.
    pub fn connect(
        transport: &dyn FeedTransport,
        topic: &FeedTopic,
        operator_id: &str,
        language: &str,
    ) -> Result<Self, PipelineError> {
        let uri = topic.uri(operator_id, language);
        let pipeline = Self::new(&topic.feed_id());
        let (receiver, handle) = transport.subscribe(&uri)?;
        pipeline.start(receiver, Some(handle))?;
        Ok(pipeline)
    }

    pub fn feed_id(&self) -> &str {
        &self.core.feed_id
    }

    /// Decode, reconcile and publish one raw message synchronously
    pub fn process_message(&self, raw_message: &str) -> ProcessOutcome {
        self.core.process_message(raw_message)
    }

    pub fn process_value(&self, message: &Value) -> ProcessOutcome {
        if !self.is_active() {
            return ProcessOutcome::Inactive;
        }
        self.core.process_envelope(Envelope::from_value(message))
    }

    /// Spawn the single consumer of `receiver`. Messages are processed in
    /// the order they were queued.
    pub fn start(
        &self,
        mut receiver: mpsc::UnboundedReceiver<FeedMessage>,
        subscription: Option<SubscriptionHandle>,
    ) -> Result<(), PipelineError> {
        if !self.is_active() {
            return Err(PipelineError::Inactive);
        }

        let mut task = self.task.lock();
        if task.is_some() {
            return Err(PipelineError::AlreadyStarted);
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| PipelineError::NoRuntime)?;

        let core = Arc::clone(&self.core);
        let span = feed_span(&self.core.feed_id);
        let handle = runtime.spawn(
            async move {
                info!("Feed task started");
                while let Some(message) = receiver.recv().await {
                    if !core.active.load(Ordering::Acquire) {
                        break;
                    }
                    core.process_message(&message.payload);
                }
                info!("Feed task stopped");
            }
            .instrument(span),
        );

        *task = Some(handle);
        *self.subscription.lock() = subscription;
        Ok(())
    }

    /// Stop the subscription. After this returns the store no longer
    /// changes and observers receive nothing more. Safe to call repeatedly.
    pub fn unsubscribe(&self) {
        if !self.core.active.swap(false, Ordering::AcqRel) {
            return;
        }

        // Waits for a batch already being applied
        self.core.store.close();

        if let Some(subscription) = self.subscription.lock().take() {
            subscription.cancel();
        }
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        self.core.publisher.close();

        info!(feed_id = %self.core.feed_id, "Feed unsubscribed");
    }

    pub fn is_active(&self) -> bool {
        self.core.active.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map_or(false, |task| !task.is_finished())
    }

    // Observation

    pub fn subscribe<F>(&self, callback: F) -> ObserverId
    where
        F: Fn(StoreNotification) + Send + Sync + 'static,
    {
        self.core.publisher.subscribe(callback)
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.core.publisher.unsubscribe(id)
    }

    pub fn observe(&self) -> watch::Receiver<Arc<ContentSnapshot>> {
        self.core.publisher.observe()
    }

    pub fn notifications(&self) -> broadcast::Receiver<StoreNotification> {
        self.core.publisher.subscribe_channel()
    }

    /// Follow one entity: its current value, each change, `None` once removed
    pub fn observe_entity<E: SnapshotEntity>(&self, id: &str) -> watch::Receiver<Option<E>> {
        debug!(feed_id = %self.core.feed_id, kind = %E::KIND, id = id, "Observing entity");
        self.core.publisher.watch_entity(id)
    }

    pub fn observe_cashout(&self, id: &str) -> watch::Receiver<Option<Cashout>> {
        self.observe_entity(id)
    }

    pub fn observe_betting_offer(&self, id: &str) -> watch::Receiver<Option<BettingOffer>> {
        self.observe_entity(id)
    }

    pub fn observe_market(&self, id: &str) -> watch::Receiver<Option<Market>> {
        self.observe_entity(id)
    }

    pub fn observe_event_info(&self, id: &str) -> watch::Receiver<Option<EventInfo>> {
        self.observe_entity(id)
    }

    /// Follow every EVENT_INFO attached to `event_id`
    pub fn observe_event_infos_for_event(&self, event_id: &str) -> watch::Receiver<Vec<EventInfo>> {
        self.core.publisher.watch_event_infos(event_id)
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> Arc<ContentSnapshot> {
        self.core.publisher.current()
    }

    pub fn store(&self) -> &ContentStore {
        &self.core.store
    }

    pub fn get_stats(&self) -> PipelineStats {
        let counters = self.core.counters.read().clone();
        PipelineStats {
            feed_id: self.core.feed_id.clone(),
            is_active: self.is_active(),
            is_running: self.is_running(),
            messages_processed: counters.messages_processed,
            decode_errors: counters.decode_errors,
            initial_dumps: counters.initial_dumps,
            update_batches: counters.update_batches,
            changes_applied: counters.changes_applied,
            records_dropped: counters.records_dropped,
            store: self.core.store.get_stats(),
            publisher: self.core.publisher.get_stats(),
        }
    }
}

impl Drop for FeedPipeline {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pipeline() -> FeedPipeline {
        FeedPipeline::with_config("test-feed", &StoreConfig::default())
    }

    const DUMP: &str = r#"{
        "version": "1.0",
        "format": "AGGREGATOR",
        "messageType": "INITIAL_DUMP",
        "records": [{"_type": "CASHOUT", "id": "A", "value": 10.0, "stake": 5.0}]
    }"#;

    #[test]
    fn test_pipeline_creation() {
        let pipeline = pipeline();
        assert_eq!(pipeline.feed_id(), "test-feed");
        assert!(pipeline.is_active());
        assert!(!pipeline.is_running());
        assert!(!pipeline.snapshot().initialized);
    }

    #[test]
    fn test_initial_dump_always_publishes() {
        let pipeline = pipeline();
        let outcome = pipeline.process_message(r#"{"messageType":"INITIAL_DUMP","records":[]}"#);
        assert_eq!(
            outcome,
            ProcessOutcome::Applied {
                message_type: MessageType::InitialDump,
                changes: 0,
                published: true
            }
        );
        assert!(pipeline.snapshot().initialized);
    }

    #[test]
    fn test_empty_update_not_published_by_default() {
        let pipeline = pipeline();
        pipeline.process_message(DUMP);

        let outcome = pipeline.process_message(r#"{"messageType":"PING"}"#);
        assert!(matches!(outcome, ProcessOutcome::Applied { published: false, .. }));
        assert_eq!(pipeline.get_stats().publisher.notifications_published, 1);
    }

    #[test]
    fn test_empty_batches_published_when_configured() {
        let pipeline = FeedPipeline::with_config(
            "test-feed",
            &StoreConfig { publish_empty_batches: true },
        );
        let outcome = pipeline.process_value(&json!({"messageType": "UPDATE", "records": []}));
        assert!(matches!(outcome, ProcessOutcome::Applied { published: true, .. }));
    }

    #[test]
    fn test_invalid_json_counted() {
        let pipeline = pipeline();
        assert!(matches!(
            pipeline.process_message("not json"),
            ProcessOutcome::Rejected(DecodeError::InvalidJson(_))
        ));
        assert_eq!(pipeline.get_stats().decode_errors, 1);
        assert_eq!(pipeline.get_stats().messages_processed, 0);
    }

    #[test]
    fn test_unsubscribe_is_idempotent_and_final() {
        let pipeline = pipeline();
        pipeline.process_message(DUMP);
        let observer_calls = Arc::new(RwLock::new(0));
        let calls = Arc::clone(&observer_calls);
        pipeline.subscribe(move |_| *calls.write() += 1);

        pipeline.unsubscribe();
        pipeline.unsubscribe();

        let outcome = pipeline.process_value(&json!({
            "messageType": "UPDATE",
            "records": [{"changeType": "DELETE", "entityType": "CASHOUT", "id": "A"}]
        }));
        assert_eq!(outcome, ProcessOutcome::Inactive);
        assert!(pipeline.store().cashout("A").is_some());
        assert_eq!(*observer_calls.read(), 1);
        assert!(!pipeline.is_active());
    }

    #[test]
    fn test_observe_entity_through_batches() {
        let pipeline = pipeline();
        pipeline.process_message(DUMP);
        let mut cashout = pipeline.observe_cashout("A");
        let mut later = pipeline.observe_cashout("Z");
        assert_eq!(cashout.borrow().as_ref().and_then(|c| c.value), Some(10.0));
        assert!(later.borrow().is_none());

        pipeline.process_value(&json!({
            "messageType": "UPDATE",
            "records": [
                {"changeType": "UPDATE", "entityType": "CASHOUT", "id": "A", "changedProperties": {"value": 12.0}},
                {"changeType": "CREATE", "entityType": "CASHOUT", "id": "Z", "entity": {"value": 1.0}}
            ]
        }));
        assert_eq!(cashout.borrow_and_update().as_ref().and_then(|c| c.value), Some(12.0));
        assert_eq!(later.borrow_and_update().as_ref().map(|c| c.id.as_str()), Some("Z"));

        pipeline.process_value(&json!({
            "messageType": "UPDATE",
            "records": [{"changeType": "DELETE", "entityType": "CASHOUT", "id": "A"}]
        }));
        assert!(cashout.has_changed().unwrap());
        assert!(cashout.borrow_and_update().is_none());
        assert!(!later.has_changed().unwrap());
    }

    #[test]
    fn test_unsubscribe_closes_entity_observers() {
        let pipeline = pipeline();
        pipeline.process_message(DUMP);
        let cashout = pipeline.observe_cashout("A");

        pipeline.unsubscribe();
        assert!(cashout.has_changed().is_err());
        assert!(pipeline.observe_cashout("A").has_changed().is_err());
    }

    #[test]
    fn test_start_requires_runtime() {
        let pipeline = pipeline();
        let (_tx, rx) = mpsc::unbounded_channel();
        assert!(matches!(pipeline.start(rx, None), Err(PipelineError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let pipeline = pipeline();
        let (_tx1, rx1) = mpsc::unbounded_channel();
        let (_tx2, rx2) = mpsc::unbounded_channel();
        pipeline.start(rx1, None).unwrap();
        assert!(matches!(pipeline.start(rx2, None), Err(PipelineError::AlreadyStarted)));
        assert!(pipeline.is_running());
    }

    #[tokio::test]
    async fn test_task_drains_queue_in_order() {
        let pipeline = pipeline();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watch = pipeline.observe();
        pipeline.start(rx, None).unwrap();

        tx.send(FeedMessage::new("/t", DUMP)).unwrap();
        tx.send(FeedMessage::new(
            "/t",
            r#"{"messageType":"UPDATE","records":[
                {"changeType":"UPDATE","entityType":"CASHOUT","id":"A","changedProperties":{"value":11.0}}
            ]}"#,
        ))
        .unwrap();
        tx.send(FeedMessage::new(
            "/t",
            r#"{"messageType":"UPDATE","records":[
                {"changeType":"UPDATE","entityType":"CASHOUT","id":"A","changedProperties":{"value":12.0}}
            ]}"#,
        ))
        .unwrap();

        loop {
            watch.changed().await.unwrap();
            if watch.borrow().version == 3 {
                break;
            }
        }
        assert_eq!(pipeline.snapshot().cashout("A").unwrap().value, Some(12.0));
        assert_eq!(pipeline.get_stats().messages_processed, 3);
    }
}
