// Content Publisher - delivers reconciled state of one feed to observers
// Callbacks, a watch channel holding the latest snapshot, a broadcast
// channel of notifications, and per-entity watch channels

use parking_lot::{ReentrantMutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};
use uuid::Uuid;

use crate::core::events::{ContentSnapshot, EntityChangeEvent, SnapshotEntity, StoreNotification};
use crate::core::types::EventInfo;
use crate::layer2::entity_watch::EntityWatchers;

type ObserverCallback = Arc<dyn Fn(StoreNotification) + Send + Sync>;

const NOTIFICATION_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(Uuid);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Default)]
struct PublisherCounters {
    notifications_published: u64,
    callbacks_delivered: u64,
}

/// Snapshot of publisher statistics
#[derive(Debug, Clone)]
pub struct PublisherStats {
    pub notifications_published: u64,
    pub callbacks_delivered: u64,
    pub observer_count: usize,
    pub watch_receivers: usize,
    pub entity_watchers: usize,
    pub closed: bool,
}

impl fmt::Display for PublisherStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Publisher(published={}, delivered={}, observers={}, watchers={}, entity_watchers={}, closed={})",
               self.notifications_published, self.callbacks_delivered,
               self.observer_count, self.watch_receivers, self.entity_watchers, self.closed)
    }
}

pub struct ContentPublisher {
    feed_id: String,
    snapshot_tx: watch::Sender<Arc<ContentSnapshot>>,
    notification_tx: broadcast::Sender<StoreNotification>,
    observers: RwLock<Vec<(ObserverId, ObserverCallback)>>,
    entity_watchers: EntityWatchers,
    // Serializes subscribe against publish so a new observer sees its
    // initial snapshot before any later change. Reentrant for callbacks.
    delivery: ReentrantMutex<()>,
    closed: AtomicBool,
    counters: RwLock<PublisherCounters>,
}

impl ContentPublisher {
    pub fn new(feed_id: &str) -> Self {
        let (snapshot_tx, _) = watch::channel(Arc::new(ContentSnapshot::empty(feed_id)));
        let (notification_tx, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);

        Self {
            feed_id: feed_id.to_string(),
            snapshot_tx,
            notification_tx,
            observers: RwLock::new(Vec::new()),
            entity_watchers: EntityWatchers::new(),
            delivery: ReentrantMutex::new(()),
            closed: AtomicBool::new(false),
            counters: RwLock::new(PublisherCounters::default()),
        }
    }

    /// Latest snapshot, updated after every published batch
    pub fn current(&self) -> Arc<ContentSnapshot> {
        Arc::clone(&self.snapshot_tx.borrow())
    }

    /// Receiver starting at the current state
    pub fn observe(&self) -> watch::Receiver<Arc<ContentSnapshot>> {
        self.snapshot_tx.subscribe()
    }

    /// Notifications published from now on; lagging receivers lose the oldest
    pub fn subscribe_channel(&self) -> broadcast::Receiver<StoreNotification> {
        self.notification_tx.subscribe()
    }

    /// Current value of one entity, then a new value each time that id is
    /// created, modified or removed (`None`)
    pub fn watch_entity<E: SnapshotEntity>(&self, id: &str) -> watch::Receiver<Option<E>> {
        let _delivery = self.delivery.lock();
        let snapshot = self.current();
        if self.closed.load(Ordering::Acquire) {
            return watch::channel(snapshot.get::<E>(id).cloned()).1;
        }
        self.entity_watchers.watch_entity(id, &snapshot)
    }

    /// EVENT_INFO entries of one event, re-sent when that set changes
    pub fn watch_event_infos(&self, event_id: &str) -> watch::Receiver<Vec<EventInfo>> {
        let _delivery = self.delivery.lock();
        let snapshot = self.current();
        if self.closed.load(Ordering::Acquire) {
            return watch::channel(snapshot.event_infos_for_event(event_id)).1;
        }
        self.entity_watchers.watch_event_infos(event_id, &snapshot)
    }

    /// Register a callback. It is invoked right away with the current
    /// snapshot, then with every later change batch, in publish order.
    pub fn subscribe<F>(&self, callback: F) -> ObserverId
    where
        F: Fn(StoreNotification) + Send + Sync + 'static,
    {
        let id = ObserverId(Uuid::new_v4());
        let callback: ObserverCallback = Arc::new(callback);

        let _delivery = self.delivery.lock();
        if self.closed.load(Ordering::Acquire) {
            debug!(feed_id = %self.feed_id, observer = %id, "Subscribe on closed publisher");
            return id;
        }

        callback(StoreNotification::Snapshot(self.current()));
        self.counters.write().callbacks_delivered += 1;
        self.observers.write().push((id, callback));

        info!(feed_id = %self.feed_id, observer = %id, "Observer subscribed");
        id
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(observer_id, _)| *observer_id != id);
        let removed = observers.len() != before;
        if removed {
            debug!(feed_id = %self.feed_id, observer = %id, "Observer unsubscribed");
        }
        removed
    }

    /// Publish one reconciled batch. Returns the number of callbacks invoked.
    pub fn publish(&self, changes: Vec<EntityChangeEvent>, snapshot: ContentSnapshot) -> usize {
        let _delivery = self.delivery.lock();
        if self.closed.load(Ordering::Acquire) {
            return 0;
        }

        let snapshot = Arc::new(snapshot);
        let changes = Arc::new(changes);
        let notification = StoreNotification::Changed {
            changes: Arc::clone(&changes),
            snapshot: Arc::clone(&snapshot),
        };

        self.snapshot_tx.send_replace(Arc::clone(&snapshot));
        self.entity_watchers.refresh(&changes, &snapshot);
        // No receivers is not an error
        let _ = self.notification_tx.send(notification.clone());

        // Invoke outside the observers lock so callbacks may unsubscribe
        let callbacks: Vec<ObserverCallback> = self
            .observers
            .read()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in &callbacks {
            callback(notification.clone());
        }

        let mut counters = self.counters.write();
        counters.notifications_published += 1;
        counters.callbacks_delivered += callbacks.len() as u64;
        callbacks.len()
    }

    /// Drop every observer; later publishes are no-ops
    pub fn close(&self) {
        let _delivery = self.delivery.lock();
        if !self.closed.swap(true, Ordering::AcqRel) {
            let dropped = {
                let mut observers = self.observers.write();
                let count = observers.len();
                observers.clear();
                count
            };
            self.entity_watchers.clear();
            info!(feed_id = %self.feed_id, observers = dropped, "Publisher closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    pub fn get_stats(&self) -> PublisherStats {
        let counters = self.counters.read();
        PublisherStats {
            notifications_published: counters.notifications_published,
            callbacks_delivered: counters.callbacks_delivered,
            observer_count: self.observers.read().len(),
            watch_receivers: self.snapshot_tx.receiver_count(),
            entity_watchers: self.entity_watchers.len(),
            closed: self.is_closed(),
        }
    }
}
