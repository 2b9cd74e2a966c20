// Store Events - what the reconciler reports and the publisher re-emits
// Snapshots are immutable and shared via Arc between observers

use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::core::types::{BettingOffer, Cashout, ContentKind, Entity, EventInfo, Market, Sport};

// ============================================================================
// Change kinds
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChangeKind {
    /// FullCreate for an id that was not present
    Created,
    /// FullCreate overwriting an existing id
    Replaced,
    /// FieldUpdate that changed at least one field
    Updated,
    Removed,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// One effective mutation of a keyed store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityChangeEvent {
    pub kind: ContentKind,
    pub id: String,
    pub change: ChangeKind,
}

impl EntityChangeEvent {
    pub fn new(kind: ContentKind, id: impl Into<String>, change: ChangeKind) -> Self {
        Self {
            kind,
            id: id.into(),
            change,
        }
    }
}

impl fmt::Display for EntityChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} {}", self.kind, self.id, self.change)
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Full reconciled state of one feed, in server insertion order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContentSnapshot {
    pub feed_id: String,
    /// Bumped on every batch that changed the store
    pub version: u64,
    /// Unix millis of the last change
    pub updated_at: i64,
    /// Set once the first INITIAL_DUMP has been applied
    pub initialized: bool,
    pub cashouts: Vec<Cashout>,
    pub betting_offers: Vec<BettingOffer>,
    pub markets: Vec<Market>,
    pub event_infos: Vec<EventInfo>,
    pub sports: Vec<Sport>,
}

impl ContentSnapshot {
    pub fn empty(feed_id: &str) -> Self {
        Self {
            feed_id: feed_id.to_string(),
            ..Default::default()
        }
    }

    pub fn total_entities(&self) -> usize {
        self.cashouts.len()
            + self.betting_offers.len()
            + self.markets.len()
            + self.event_infos.len()
            + self.sports.len()
    }

    pub fn cashout(&self, id: &str) -> Option<&Cashout> {
        self.cashouts.iter().find(|c| c.id == id)
    }

    pub fn betting_offer(&self, id: &str) -> Option<&BettingOffer> {
        self.betting_offers.iter().find(|o| o.id == id)
    }

    pub fn market(&self, id: &str) -> Option<&Market> {
        self.markets.iter().find(|m| m.id == id)
    }

    pub fn event_info(&self, id: &str) -> Option<&EventInfo> {
        self.event_infos.iter().find(|i| i.id == id)
    }

    pub fn sport(&self, id: &str) -> Option<&Sport> {
        self.sports.iter().find(|s| s.id == id)
    }

    /// Lookup by id for any kind
    pub fn get<E: SnapshotEntity>(&self, id: &str) -> Option<&E> {
        E::all(self).iter().find(|entity| entity.id() == id)
    }

    /// EVENT_INFO entries attached to one event, in store order
    pub fn event_infos_for_event(&self, event_id: &str) -> Vec<EventInfo> {
        self.event_infos
            .iter()
            .filter(|info| info.event_id.as_deref() == Some(event_id))
            .cloned()
            .collect()
    }
}

/// Entity kinds that have a collection in `ContentSnapshot`
pub trait SnapshotEntity: Entity {
    const KIND: ContentKind;

    fn all(snapshot: &ContentSnapshot) -> &[Self];
}

macro_rules! snapshot_entity {
    ($entity:ty, $kind:expr, $field:ident) => {
        impl SnapshotEntity for $entity {
            const KIND: ContentKind = $kind;

            fn all(snapshot: &ContentSnapshot) -> &[Self] {
                &snapshot.$field
            }
        }
    };
}

snapshot_entity!(Cashout, ContentKind::Cashout, cashouts);
snapshot_entity!(BettingOffer, ContentKind::BettingOffer, betting_offers);
snapshot_entity!(Market, ContentKind::Market, markets);
snapshot_entity!(EventInfo, ContentKind::EventInfo, event_infos);
snapshot_entity!(Sport, ContentKind::Sport, sports);

impl fmt::Display for ContentSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Snapshot(feed={}, v={}, cashouts={}, offers={}, markets={}, infos={}, sports={})",
            self.feed_id,
            self.version,
            self.cashouts.len(),
            self.betting_offers.len(),
            self.markets.len(),
            self.event_infos.len(),
            self.sports.len()
        )
    }
}

// ============================================================================
// Notifications delivered to observers
// ============================================================================

#[derive(Debug, Clone)]
pub enum StoreNotification {
    /// Sent once, on subscribe, with all currently-known state
    Snapshot(Arc<ContentSnapshot>),
    /// Sent after each batch that changed the store
    Changed {
        changes: Arc<Vec<EntityChangeEvent>>,
        snapshot: Arc<ContentSnapshot>,
    },
}

impl StoreNotification {
    pub fn snapshot(&self) -> &Arc<ContentSnapshot> {
        match self {
            StoreNotification::Snapshot(snapshot) => snapshot,
            StoreNotification::Changed { snapshot, .. } => snapshot,
        }
    }

    pub fn changes(&self) -> &[EntityChangeEvent] {
        match self {
            StoreNotification::Snapshot(_) => &[],
            StoreNotification::Changed { changes, .. } => changes.as_slice(),
        }
    }
}
