// Keyed Store - insertion-ordered id -> entity map for one content kind
// Applies classified changes; never fails, unknown ids are no-ops

use indexmap::IndexMap;

use crate::core::events::ChangeKind;
use crate::core::types::Entity;
use crate::layer2::classifier::EntityChange;

#[derive(Debug, Clone)]
pub struct KeyedStore<E: Entity> {
    entries: IndexMap<String, E>,
}

impl<E: Entity> Default for KeyedStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> KeyedStore<E> {
    pub fn new() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }

    /// Drop everything and seed from `entities`, keeping their order.
    /// A repeated id keeps its first position with the last value.
    pub fn replace_all<I>(&mut self, entities: I)
    where
        I: IntoIterator<Item = E>,
    {
        self.entries.clear();
        for entity in entities {
            self.entries.insert(entity.id().to_string(), entity);
        }
    }

    /// Apply one change. Returns what happened, or `None` when the store
    /// did not change (patch or delete for a missing id, patch with no effect).
    pub fn apply(&mut self, change: &EntityChange<E>) -> Option<ChangeKind> {
        match change {
            EntityChange::FullCreate(entity) => {
                match self.entries.insert(entity.id().to_string(), entity.clone()) {
                    Some(_) => Some(ChangeKind::Replaced),
                    None => Some(ChangeKind::Created),
                }
            }
            EntityChange::FieldUpdate { id, patch } => {
                let existing = self.entries.get_mut(id)?;
                existing.merge(patch).then_some(ChangeKind::Updated)
            }
            EntityChange::Delete { id } => {
                // shift_remove keeps the remaining entries in server order
                self.entries.shift_remove(id).map(|_| ChangeKind::Removed)
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&E> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = &E> {
        self.entries.values()
    }

    pub fn to_vec(&self) -> Vec<E> {
        self.entries.values().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
