// Entity Watchers - per-id and per-event observation of one feed
// Each watched key owns one watch channel shared by all of its receivers

use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use tokio::sync::watch;
use tracing::debug;

use crate::core::events::{ContentSnapshot, EntityChangeEvent, SnapshotEntity};
use crate::core::types::{ContentKind, EventInfo};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum WatchKey {
    Entity(ContentKind, String),
    EventInfosForEvent(String),
}

trait SnapshotWatcher: Send + Sync {
    /// Re-read the watched value after a published batch.
    /// Returns false once every receiver is gone.
    fn refresh(&self, changes: &[EntityChangeEvent], snapshot: &ContentSnapshot) -> bool;

    fn as_any(&self) -> &dyn Any;
}

/// Store `next` only if it differs, so receivers wake on real changes only
fn replace_if_changed<T: PartialEq>(tx: &watch::Sender<T>, next: T) -> bool {
    tx.send_if_modified(|value| {
        if *value == next {
            false
        } else {
            *value = next;
            true
        }
    })
}

struct EntityWatcher<E: SnapshotEntity> {
    id: String,
    tx: watch::Sender<Option<E>>,
}

impl<E: SnapshotEntity> SnapshotWatcher for EntityWatcher<E> {
    fn refresh(&self, changes: &[EntityChangeEvent], snapshot: &ContentSnapshot) -> bool {
        if self.tx.is_closed() {
            return false;
        }
        if changes.iter().any(|c| c.kind == E::KIND && c.id == self.id) {
            replace_if_changed(&self.tx, snapshot.get::<E>(&self.id).cloned());
        }
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct EventInfoGroupWatcher {
    event_id: String,
    tx: watch::Sender<Vec<EventInfo>>,
}

impl SnapshotWatcher for EventInfoGroupWatcher {
    fn refresh(&self, changes: &[EntityChangeEvent], snapshot: &ContentSnapshot) -> bool {
        if self.tx.is_closed() {
            return false;
        }
        // A removed entry no longer names its event, so any EVENT_INFO change re-filters
        if changes.iter().any(|c| c.kind == ContentKind::EventInfo) {
            replace_if_changed(&self.tx, snapshot.event_infos_for_event(&self.event_id));
        }
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Registry of per-entity and per-event watchers for one feed
#[derive(Default)]
pub struct EntityWatchers {
    watchers: Mutex<HashMap<WatchKey, Box<dyn SnapshotWatcher>>>,
}

impl EntityWatchers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receiver holding the current value of `id` (`None` if absent).
    /// It changes only when that entity is created, modified or removed.
    pub fn watch_entity<E: SnapshotEntity>(
        &self,
        id: &str,
        snapshot: &ContentSnapshot,
    ) -> watch::Receiver<Option<E>> {
        let current = snapshot.get::<E>(id).cloned();
        let key = WatchKey::Entity(E::KIND, id.to_string());
        let mut watchers = self.watchers.lock();

        if let Some(watcher) = watchers
            .get(&key)
            .and_then(|w| w.as_any().downcast_ref::<EntityWatcher<E>>())
        {
            replace_if_changed(&watcher.tx, current);
            return watcher.tx.subscribe();
        }

        if current.is_none() {
            debug!(kind = %E::KIND, id = id, "Watching entity not yet in store");
        }
        let (tx, rx) = watch::channel(current);
        watchers.insert(key, Box::new(EntityWatcher { id: id.to_string(), tx }));
        rx
    }

    /// Receiver holding every EVENT_INFO of `event_id`, in store order
    pub fn watch_event_infos(
        &self,
        event_id: &str,
        snapshot: &ContentSnapshot,
    ) -> watch::Receiver<Vec<EventInfo>> {
        let current = snapshot.event_infos_for_event(event_id);
        let key = WatchKey::EventInfosForEvent(event_id.to_string());
        let mut watchers = self.watchers.lock();

        if let Some(watcher) = watchers
            .get(&key)
            .and_then(|w| w.as_any().downcast_ref::<EventInfoGroupWatcher>())
        {
            replace_if_changed(&watcher.tx, current);
            return watcher.tx.subscribe();
        }

        let (tx, rx) = watch::channel(current);
        watchers.insert(
            key,
            Box::new(EventInfoGroupWatcher {
                event_id: event_id.to_string(),
                tx,
            }),
        );
        rx
    }

    /// Push a published batch to the affected watchers and forget the
    /// ones nobody listens to any more
    pub fn refresh(&self, changes: &[EntityChangeEvent], snapshot: &ContentSnapshot) {
        let mut watchers = self.watchers.lock();
        let before = watchers.len();
        watchers.retain(|_, watcher| watcher.refresh(changes, snapshot));
        let pruned = before - watchers.len();
        if pruned > 0 {
            debug!(feed_id = %snapshot.feed_id, pruned = pruned, "Released idle watchers");
        }
    }

    /// Drop every watcher; receivers observe the channel closing
    pub fn clear(&self) {
        self.watchers.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.watchers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
