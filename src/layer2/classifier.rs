// Content Classifier - turns raw records into typed content
// Initial-dump records are tagged by `_type`; change records carry
// `changeType` / `entityType` / `id` plus a payload depending on the change.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

use crate::core::types::{BettingOffer, Cashout, ContentKind, Entity, EventInfo, Market, Sport};

// ============================================================================
// Classified types
// ============================================================================

/// One record of an INITIAL_DUMP envelope
#[derive(Debug, Clone, PartialEq)]
pub enum ContentRecord {
    Cashout(Cashout),
    BettingOffer(BettingOffer),
    Market(Market),
    EventInfo(EventInfo),
    Sport(Sport),
    /// Unrecognized or malformed record; carries the `_type` tag seen
    Unknown(String),
}

impl ContentRecord {
    pub fn kind(&self) -> Option<ContentKind> {
        match self {
            ContentRecord::Cashout(_) => Some(ContentKind::Cashout),
            ContentRecord::BettingOffer(_) => Some(ContentKind::BettingOffer),
            ContentRecord::Market(_) => Some(ContentKind::Market),
            ContentRecord::EventInfo(_) => Some(ContentKind::EventInfo),
            ContentRecord::Sport(_) => Some(ContentKind::Sport),
            ContentRecord::Unknown(_) => None,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            ContentRecord::Cashout(e) => Some(e.id()),
            ContentRecord::BettingOffer(e) => Some(e.id()),
            ContentRecord::Market(e) => Some(e.id()),
            ContentRecord::EventInfo(e) => Some(e.id()),
            ContentRecord::Sport(e) => Some(e.id()),
            ContentRecord::Unknown(_) => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, ContentRecord::Unknown(_))
    }
}

/// A single change to one entity
#[derive(Debug, Clone, PartialEq)]
pub enum EntityChange<E: Entity> {
    /// Merge the present fields into the existing entity
    FieldUpdate { id: String, patch: E::Patch },
    /// Insert or overwrite the whole entity
    FullCreate(E),
    Delete { id: String },
}

impl<E: Entity> EntityChange<E> {
    pub fn id(&self) -> &str {
        match self {
            EntityChange::FieldUpdate { id, .. } => id,
            EntityChange::FullCreate(entity) => entity.id(),
            EntityChange::Delete { id } => id,
        }
    }

    pub fn change_type(&self) -> ChangeType {
        match self {
            EntityChange::FieldUpdate { .. } => ChangeType::Update,
            EntityChange::FullCreate(_) => ChangeType::Create,
            EntityChange::Delete { .. } => ChangeType::Delete,
        }
    }
}

/// One record of an UPDATE envelope
#[derive(Debug, Clone, PartialEq)]
pub enum ContentUpdate {
    Cashout(EntityChange<Cashout>),
    BettingOffer(EntityChange<BettingOffer>),
    Market(EntityChange<Market>),
    EventInfo(EntityChange<EventInfo>),
    Sport(EntityChange<Sport>),
    /// Unsupported change; carries the `entityType` seen
    Unknown(String),
}

impl ContentUpdate {
    pub fn kind(&self) -> Option<ContentKind> {
        match self {
            ContentUpdate::Cashout(_) => Some(ContentKind::Cashout),
            ContentUpdate::BettingOffer(_) => Some(ContentKind::BettingOffer),
            ContentUpdate::Market(_) => Some(ContentKind::Market),
            ContentUpdate::EventInfo(_) => Some(ContentKind::EventInfo),
            ContentUpdate::Sport(_) => Some(ContentKind::Sport),
            ContentUpdate::Unknown(_) => None,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            ContentUpdate::Cashout(c) => Some(c.id()),
            ContentUpdate::BettingOffer(c) => Some(c.id()),
            ContentUpdate::Market(c) => Some(c.id()),
            ContentUpdate::EventInfo(c) => Some(c.id()),
            ContentUpdate::Sport(c) => Some(c.id()),
            ContentUpdate::Unknown(_) => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, ContentUpdate::Unknown(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Create,
    Update,
    Delete,
}

impl FromStr for ChangeType {
    type Err = ClassifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATE" => Ok(ChangeType::Create),
            "UPDATE" => Ok(ChangeType::Update),
            "DELETE" => Ok(ChangeType::Delete),
            other => Err(ClassifyError::UnknownChangeType(other.to_string())),
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeType::Create => write!(f, "CREATE"),
            ChangeType::Update => write!(f, "UPDATE"),
            ChangeType::Delete => write!(f, "DELETE"),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ClassifyError {
    /// `changeType` or `entityType` missing or not a string
    #[error("unknown update type")]
    UnknownUpdateType,
    #[error("unknown change type: {0}")]
    UnknownChangeType(String),
    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),
    #[error("{entity_type} change without id")]
    MissingId { entity_type: String },
    #[error("{entity_type} {change_type} without '{field}'")]
    MissingPayload {
        entity_type: String,
        change_type: ChangeType,
        field: &'static str,
    },
    #[error("invalid {entity_type} payload: {reason}")]
    InvalidPayload { entity_type: String, reason: String },
}

// ============================================================================
// Identifier handling
// ============================================================================

/// Ids arrive as JSON strings or numbers; numbers keep their decimal form
fn normalize_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Clone an entity payload with a string `id`, falling back to `fallback_id`
fn with_string_id(payload: &Map<String, Value>, fallback_id: Option<&str>) -> Map<String, Value> {
    let mut object = payload.clone();
    let id = object
        .get("id")
        .and_then(normalize_id)
        .or_else(|| fallback_id.map(str::to_string));
    if let Some(id) = id {
        object.insert("id".to_string(), Value::String(id));
    }
    object
}

fn decode_entity<E: Entity>(object: Map<String, Value>) -> Result<E, ClassifyError> {
    decode_as(Value::Object(object), E::ENTITY_TYPE)
}

fn decode_as<T: DeserializeOwned>(value: Value, entity_type: &str) -> Result<T, ClassifyError> {
    serde_json::from_value(value).map_err(|e| ClassifyError::InvalidPayload {
        entity_type: entity_type.to_string(),
        reason: e.to_string(),
    })
}

// ============================================================================
// Initial dump records
// ============================================================================

/// Classify one INITIAL_DUMP record by its `_type` tag.
/// Malformed payloads of a known tag degrade to `Unknown(tag)`.
pub fn classify_record(record: &Value) -> ContentRecord {
    let Some(object) = record.as_object() else {
        return ContentRecord::Unknown(String::new());
    };
    let tag = object.get("_type").and_then(Value::as_str).unwrap_or_default();

    let Ok(kind) = ContentKind::from_str(tag) else {
        return ContentRecord::Unknown(tag.to_string());
    };

    let payload = with_string_id(object, None);
    let decoded = match kind {
        ContentKind::Cashout => decode_entity(payload).map(ContentRecord::Cashout),
        ContentKind::BettingOffer => decode_entity(payload).map(ContentRecord::BettingOffer),
        ContentKind::Market => decode_entity(payload).map(ContentRecord::Market),
        ContentKind::EventInfo => decode_entity(payload).map(ContentRecord::EventInfo),
        ContentKind::Sport => decode_entity(payload).map(ContentRecord::Sport),
    };

    decoded.unwrap_or_else(|e| {
        debug!(error = %e, "Malformed initial record");
        ContentRecord::Unknown(tag.to_string())
    })
}

// ============================================================================
// Change records
// ============================================================================

fn decode_change<E: Entity>(
    change_type: ChangeType,
    id: String,
    record: &Map<String, Value>,
) -> Result<EntityChange<E>, ClassifyError> {
    match change_type {
        ChangeType::Update => {
            let properties = record
                .get("changedProperties")
                .filter(|v| v.is_object())
                .ok_or_else(|| ClassifyError::MissingPayload {
                    entity_type: E::ENTITY_TYPE.to_string(),
                    change_type,
                    field: "changedProperties",
                })?;
            let patch = decode_as::<E::Patch>(properties.clone(), E::ENTITY_TYPE)?;
            Ok(EntityChange::FieldUpdate { id, patch })
        }
        ChangeType::Create => {
            let entity = record
                .get("entity")
                .and_then(Value::as_object)
                .ok_or_else(|| ClassifyError::MissingPayload {
                    entity_type: E::ENTITY_TYPE.to_string(),
                    change_type,
                    field: "entity",
                })?;
            let entity = decode_entity::<E>(with_string_id(entity, Some(id.as_str())))?;
            Ok(EntityChange::FullCreate(entity))
        }
        ChangeType::Delete => Ok(EntityChange::Delete { id }),
    }
}

fn try_classify(
    entity_type: &str,
    change_type: &str,
    record: &Map<String, Value>,
) -> Result<ContentUpdate, ClassifyError> {
    let kind = ContentKind::from_str(entity_type)
        .map_err(|_| ClassifyError::UnknownEntityType(entity_type.to_string()))?;
    let change_type = ChangeType::from_str(change_type)?;
    let id = record
        .get("id")
        .and_then(normalize_id)
        .ok_or_else(|| ClassifyError::MissingId {
            entity_type: entity_type.to_string(),
        })?;

    Ok(match kind {
        ContentKind::Cashout => ContentUpdate::Cashout(decode_change(change_type, id, record)?),
        ContentKind::BettingOffer => {
            ContentUpdate::BettingOffer(decode_change(change_type, id, record)?)
        }
        ContentKind::Market => ContentUpdate::Market(decode_change(change_type, id, record)?),
        ContentKind::EventInfo => ContentUpdate::EventInfo(decode_change(change_type, id, record)?),
        ContentKind::Sport => ContentUpdate::Sport(decode_change(change_type, id, record)?),
    })
}

/// Classify one UPDATE record.
///
/// Fails only when `changeType` or `entityType` is missing. Every other
/// problem (unknown change or entity type, missing id, missing or malformed
/// payload) yields `Unknown(entityType)`.
pub fn classify_update(record: &Value) -> Result<ContentUpdate, ClassifyError> {
    let object = record.as_object().ok_or(ClassifyError::UnknownUpdateType)?;
    let change_type = object
        .get("changeType")
        .and_then(Value::as_str)
        .ok_or(ClassifyError::UnknownUpdateType)?;
    let entity_type = object
        .get("entityType")
        .and_then(Value::as_str)
        .ok_or(ClassifyError::UnknownUpdateType)?;

    match try_classify(entity_type, change_type, object) {
        Ok(update) => Ok(update),
        Err(e) => {
            debug!(error = %e, entity_type = %entity_type, change_type = %change_type, "Unsupported change record");
            Ok(ContentUpdate::Unknown(entity_type.to_string()))
        }
    }
}

/// Batch-facing wrapper: unclassifiable and unknown records become `None`
pub fn decode_update(record: &Value) -> Option<ContentUpdate> {
    match classify_update(record) {
        Ok(ContentUpdate::Unknown(entity_type)) => {
            debug!(entity_type = %entity_type, "Dropping unknown update record");
            None
        }
        Ok(update) => Some(update),
        Err(e) => {
            debug!(error = %e, "Dropping unclassifiable update record");
            None
        }
    }
}

/// Batch-facing wrapper for initial dump records
pub fn decode_record(record: &Value) -> Option<ContentRecord> {
    match classify_record(record) {
        ContentRecord::Unknown(tag) => {
            debug!(record_type = %tag, "Dropping unknown initial record");
            None
        }
        content => Some(content),
    }
}
