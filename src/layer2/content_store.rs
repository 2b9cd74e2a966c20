// Content Store - reconciled state of one feed subscription
// One keyed store per content kind behind a single lock, so a batch is
// applied atomically and snapshots never observe half a batch

use parking_lot::RwLock;
use std::fmt;
use tracing::{debug, info};

use crate::core::events::{ChangeKind, ContentSnapshot, EntityChangeEvent};
use crate::core::types::{BettingOffer, Cashout, ContentKind, Entity, EventInfo, Market, Sport};
use crate::layer2::classifier::{ContentRecord, ContentUpdate, EntityChange};
use crate::layer2::keyed_store::KeyedStore;

/// Statistics snapshot from the content store
#[derive(Debug, Clone, Default)]
pub struct ContentStoreStats {
    pub cashout_count: usize,
    pub betting_offer_count: usize,
    pub market_count: usize,
    pub event_info_count: usize,
    pub sport_count: usize,
    pub initial_dumps: u64,
    pub update_batches: u64,
    pub updates_applied: u64,
    pub updates_ignored: u64,
    /// FieldUpdates that arrived for an id the store did not hold
    pub orphan_patches: u64,
    pub version: u64,
}

impl ContentStoreStats {
    pub fn total_entities(&self) -> usize {
        self.cashout_count
            + self.betting_offer_count
            + self.market_count
            + self.event_info_count
            + self.sport_count
    }
}

impl fmt::Display for ContentStoreStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ContentStore(cashouts={}, offers={}, markets={}, infos={}, sports={}, applied={}, ignored={}, orphans={}, v={})",
            self.cashout_count, self.betting_offer_count, self.market_count,
            self.event_info_count, self.sport_count, self.updates_applied,
            self.updates_ignored, self.orphan_patches, self.version
        )
    }
}

#[derive(Default)]
struct Counters {
    initial_dumps: u64,
    update_batches: u64,
    updates_applied: u64,
    updates_ignored: u64,
    orphan_patches: u64,
}

#[derive(Default)]
struct Stores {
    cashouts: KeyedStore<Cashout>,
    betting_offers: KeyedStore<BettingOffer>,
    markets: KeyedStore<Market>,
    event_infos: KeyedStore<EventInfo>,
    sports: KeyedStore<Sport>,
    version: u64,
    updated_at: i64,
    initialized: bool,
    closed: bool,
    counters: Counters,
}

impl Stores {
    fn touch(&mut self) {
        self.version += 1;
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }
}

/// Replace `store` wholesale, reporting the difference against its old content
fn reseed<E: Entity>(
    store: &mut KeyedStore<E>,
    kind: ContentKind,
    fresh: Vec<E>,
    events: &mut Vec<EntityChangeEvent>,
) {
    let previous = std::mem::take(store);
    store.replace_all(fresh);

    for entity in store.values() {
        match previous.get(entity.id()) {
            Some(old) if old == entity => {}
            Some(_) => events.push(EntityChangeEvent::new(kind, entity.id(), ChangeKind::Replaced)),
            None => events.push(EntityChangeEvent::new(kind, entity.id(), ChangeKind::Created)),
        }
    }
    for id in previous.ids().filter(|id| !store.contains(id)) {
        events.push(EntityChangeEvent::new(kind, id, ChangeKind::Removed));
    }
}

fn apply_change<E: Entity>(
    store: &mut KeyedStore<E>,
    kind: ContentKind,
    change: &EntityChange<E>,
    counters: &mut Counters,
    events: &mut Vec<EntityChangeEvent>,
) {
    if let EntityChange::FieldUpdate { id, .. } = change {
        if !store.contains(id) {
            counters.orphan_patches += 1;
            debug!(kind = %kind, id = %id, "Field update for unknown id ignored");
        }
    }

    match store.apply(change) {
        Some(change_kind) => {
            counters.updates_applied += 1;
            events.push(EntityChangeEvent::new(kind, change.id(), change_kind));
        }
        None => counters.updates_ignored += 1,
    }
}

/// Thread-safe reconciled content for one feed
pub struct ContentStore {
    pub feed_id: String,
    inner: RwLock<Stores>,
}

impl ContentStore {
    pub fn new(feed_id: &str) -> Self {
        Self {
            feed_id: feed_id.to_string(),
            inner: RwLock::new(Stores::default()),
        }
    }

    /// Replace every kind with the content of an INITIAL_DUMP.
    /// Kinds absent from the dump end up empty.
    pub fn apply_initial_dump(&self, records: &[ContentRecord]) -> Vec<EntityChangeEvent> {
        let mut cashouts = Vec::new();
        let mut betting_offers = Vec::new();
        let mut markets = Vec::new();
        let mut event_infos = Vec::new();
        let mut sports = Vec::new();

        for record in records {
            match record {
                ContentRecord::Cashout(e) => cashouts.push(e.clone()),
                ContentRecord::BettingOffer(e) => betting_offers.push(e.clone()),
                ContentRecord::Market(e) => markets.push(e.clone()),
                ContentRecord::EventInfo(e) => event_infos.push(e.clone()),
                ContentRecord::Sport(e) => sports.push(e.clone()),
                ContentRecord::Unknown(_) => {}
            }
        }

        let mut inner = self.inner.write();
        if inner.closed {
            return Vec::new();
        }

        let mut events = Vec::new();
        reseed(&mut inner.cashouts, ContentKind::Cashout, cashouts, &mut events);
        reseed(&mut inner.betting_offers, ContentKind::BettingOffer, betting_offers, &mut events);
        reseed(&mut inner.markets, ContentKind::Market, markets, &mut events);
        reseed(&mut inner.event_infos, ContentKind::EventInfo, event_infos, &mut events);
        reseed(&mut inner.sports, ContentKind::Sport, sports, &mut events);

        inner.initialized = true;
        inner.counters.initial_dumps += 1;
        inner.touch();

        info!(
            feed_id = %self.feed_id,
            records = records.len(),
            changes = events.len(),
            version = inner.version,
            "Initial dump applied"
        );
        events
    }

    /// Apply a delta batch in order. Later changes to the same id win.
    pub fn apply_updates(&self, updates: &[ContentUpdate]) -> Vec<EntityChangeEvent> {
        let mut guard = self.inner.write();
        if guard.closed {
            return Vec::new();
        }

        let inner = &mut *guard;
        let counters = &mut inner.counters;
        let mut events = Vec::new();

        for update in updates {
            match update {
                ContentUpdate::Cashout(c) => {
                    apply_change(&mut inner.cashouts, ContentKind::Cashout, c, counters, &mut events)
                }
                ContentUpdate::BettingOffer(c) => {
                    apply_change(&mut inner.betting_offers, ContentKind::BettingOffer, c, counters, &mut events)
                }
                ContentUpdate::Market(c) => {
                    apply_change(&mut inner.markets, ContentKind::Market, c, counters, &mut events)
                }
                ContentUpdate::EventInfo(c) => {
                    apply_change(&mut inner.event_infos, ContentKind::EventInfo, c, counters, &mut events)
                }
                ContentUpdate::Sport(c) => {
                    apply_change(&mut inner.sports, ContentKind::Sport, c, counters, &mut events)
                }
                ContentUpdate::Unknown(_) => counters.updates_ignored += 1,
            }
        }

        counters.update_batches += 1;
        if !events.is_empty() {
            inner.touch();
        }

        debug!(
            feed_id = %self.feed_id,
            updates = updates.len(),
            changes = events.len(),
            "Update batch applied"
        );
        events
    }

    /// Stop accepting mutations. Any batch already holding the lock finishes first.
    pub fn close(&self) {
        self.inner.write().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.read().closed
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.read().initialized
    }

    pub fn version(&self) -> u64 {
        self.inner.read().version
    }

    pub fn snapshot(&self) -> ContentSnapshot {
        let inner = self.inner.read();
        ContentSnapshot {
            feed_id: self.feed_id.clone(),
            version: inner.version,
            updated_at: inner.updated_at,
            initialized: inner.initialized,
            cashouts: inner.cashouts.to_vec(),
            betting_offers: inner.betting_offers.to_vec(),
            markets: inner.markets.to_vec(),
            event_infos: inner.event_infos.to_vec(),
            sports: inner.sports.to_vec(),
        }
    }

    // Accessors

    pub fn cashout(&self, id: &str) -> Option<Cashout> {
        self.inner.read().cashouts.get(id).cloned()
    }

    pub fn betting_offer(&self, id: &str) -> Option<BettingOffer> {
        self.inner.read().betting_offers.get(id).cloned()
    }

    pub fn market(&self, id: &str) -> Option<Market> {
        self.inner.read().markets.get(id).cloned()
    }

    pub fn event_info(&self, id: &str) -> Option<EventInfo> {
        self.inner.read().event_infos.get(id).cloned()
    }

    pub fn sport(&self, id: &str) -> Option<Sport> {
        self.inner.read().sports.get(id).cloned()
    }

    pub fn get_stats(&self) -> ContentStoreStats {
        let inner = self.inner.read();
        ContentStoreStats {
            cashout_count: inner.cashouts.len(),
            betting_offer_count: inner.betting_offers.len(),
            market_count: inner.markets.len(),
            event_info_count: inner.event_infos.len(),
            sport_count: inner.sports.len(),
            initial_dumps: inner.counters.initial_dumps,
            update_batches: inner.counters.update_batches,
            updates_applied: inner.counters.updates_applied,
            updates_ignored: inner.counters.updates_ignored,
            orphan_patches: inner.counters.orphan_patches,
            version: inner.version,
        }
    }
}

impl fmt::Display for ContentStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentStore({}, {})", self.feed_id, self.get_stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{CashoutPatch, MarketPatch};

    fn cashout(id: &str, value: f64, stake: f64) -> Cashout {
        Cashout {
            id: id.to_string(),
            bet_id: None,
            value: Some(value),
            stake: Some(stake),
        }
    }

    fn market(id: &str) -> Market {
        Market {
            id: id.to_string(),
            event_id: Some("e-1".to_string()),
            name: Some("Match Result".to_string()),
            betting_type_id: None,
            event_part_id: None,
            is_available: true,
            is_closed: false,
        }
    }

    fn cashout_patch(id: &str, value: f64) -> ContentUpdate {
        ContentUpdate::Cashout(EntityChange::FieldUpdate {
            id: id.to_string(),
            patch: CashoutPatch { value: Some(value), stake: None },
        })
    }

    #[test]
    fn test_store_creation() {
        let store = ContentStore::new("feed-1");
        assert!(!store.is_initialized());
        assert_eq!(store.version(), 0);
        assert_eq!(store.get_stats().total_entities(), 0);
    }

    #[test]
    fn test_initial_dump_replaces_all_kinds() {
        let store = ContentStore::new("feed-1");
        store.apply_initial_dump(&[
            ContentRecord::Cashout(cashout("A", 10.0, 5.0)),
            ContentRecord::Market(market("m-1")),
        ]);
        assert_eq!(store.get_stats().total_entities(), 2);

        let events = store.apply_initial_dump(&[ContentRecord::Cashout(cashout("B", 1.0, 1.0))]);
        let snapshot = store.snapshot();
        assert_eq!(snapshot.cashouts.len(), 1);
        assert_eq!(snapshot.cashouts[0].id, "B");
        assert!(snapshot.markets.is_empty());
        assert!(snapshot.initialized);
        assert_eq!(snapshot.version, 2);

        assert!(events.contains(&EntityChangeEvent::new(ContentKind::Cashout, "B", ChangeKind::Created)));
        assert!(events.contains(&EntityChangeEvent::new(ContentKind::Cashout, "A", ChangeKind::Removed)));
        assert!(events.contains(&EntityChangeEvent::new(ContentKind::Market, "m-1", ChangeKind::Removed)));
    }

    #[test]
    fn test_identical_redump_reports_nothing() {
        let store = ContentStore::new("feed-1");
        let records = [ContentRecord::Cashout(cashout("A", 10.0, 5.0))];
        store.apply_initial_dump(&records);
        assert!(store.apply_initial_dump(&records).is_empty());
    }

    #[test]
    fn test_updates_apply_in_order() {
        let store = ContentStore::new("feed-1");
        store.apply_initial_dump(&[ContentRecord::Cashout(cashout("A", 10.0, 5.0))]);

        let events = store.apply_updates(&[cashout_patch("A", 11.0), cashout_patch("A", 12.0)]);
        assert_eq!(events.len(), 2);
        assert_eq!(store.cashout("A").unwrap().value, Some(12.0));
        assert_eq!(store.cashout("A").unwrap().stake, Some(5.0));
    }

    #[test]
    fn test_orphan_patch_is_counted() {
        let store = ContentStore::new("feed-1");
        let events = store.apply_updates(&[
            cashout_patch("B", 1.0),
            ContentUpdate::Cashout(EntityChange::FullCreate(cashout("B", 2.0, 1.0))),
        ]);

        assert_eq!(events, vec![EntityChangeEvent::new(ContentKind::Cashout, "B", ChangeKind::Created)]);
        assert_eq!(store.cashout("B").unwrap().value, Some(2.0));

        let stats = store.get_stats();
        assert_eq!(stats.orphan_patches, 1);
        assert_eq!(stats.updates_ignored, 1);
        assert_eq!(stats.updates_applied, 1);
    }

    #[test]
    fn test_empty_batch_keeps_version() {
        let store = ContentStore::new("feed-1");
        store.apply_initial_dump(&[]);
        let version = store.version();

        assert!(store.apply_updates(&[]).is_empty());
        assert!(store.apply_updates(&[ContentUpdate::Unknown("TOURNAMENT".into())]).is_empty());
        assert_eq!(store.version(), version);
    }

    #[test]
    fn test_market_update_and_delete() {
        let store = ContentStore::new("feed-1");
        store.apply_initial_dump(&[ContentRecord::Market(market("m-1"))]);

        store.apply_updates(&[ContentUpdate::Market(EntityChange::FieldUpdate {
            id: "m-1".to_string(),
            patch: MarketPatch { is_available: None, is_closed: Some(true) },
        })]);
        assert!(!store.market("m-1").unwrap().is_tradable());

        let events = store.apply_updates(&[ContentUpdate::Market(EntityChange::Delete { id: "m-1".into() })]);
        assert_eq!(events[0].change, ChangeKind::Removed);
        assert!(store.market("m-1").is_none());
    }

    #[test]
    fn test_closed_store_rejects_mutation() {
        let store = ContentStore::new("feed-1");
        store.apply_initial_dump(&[ContentRecord::Cashout(cashout("A", 10.0, 5.0))]);
        store.close();

        assert!(store.apply_updates(&[cashout_patch("A", 99.0)]).is_empty());
        assert!(store.apply_initial_dump(&[]).is_empty());
        assert_eq!(store.cashout("A").unwrap().value, Some(10.0));
        assert!(store.is_closed());
    }
}
