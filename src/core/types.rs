// Core Type Definitions for the Sportsbook Feed
// Domain entities tracked by the keyed stores, plus their partial patches

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Entity trait
// ============================================================================

/// A domain object tracked by a keyed store.
///
/// `Patch` carries only the fields a server-side UPDATE may change; every
/// field is optional and `None` means "unchanged".
pub trait Entity: Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static {
    type Patch: Clone + fmt::Debug + PartialEq + DeserializeOwned + Send + Sync + 'static;

    /// Wire tag used by `_type` (initial dumps) and `entityType` (updates)
    const ENTITY_TYPE: &'static str;

    fn id(&self) -> &str;

    /// Write the `Some` fields of `patch` into `self`.
    /// Returns true if at least one field actually changed.
    fn merge(&mut self, patch: &Self::Patch) -> bool;
}

/// Assign `new` into `slot` if present and different. Returns true on change.
fn merge_field<T: PartialEq + Clone>(slot: &mut T, new: &Option<T>) -> bool {
    match new {
        Some(value) if slot != value => {
            *slot = value.clone();
            true
        }
        _ => false,
    }
}

/// Same as `merge_field` for fields that are themselves optional on the entity.
fn merge_optional<T: PartialEq + Clone>(slot: &mut Option<T>, new: &Option<T>) -> bool {
    match new {
        Some(value) if slot.as_ref() != Some(value) => {
            *slot = Some(value.clone());
            true
        }
        _ => false,
    }
}

// ============================================================================
// Content kinds
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ContentKind {
    Cashout,
    BettingOffer,
    Market,
    EventInfo,
    Sport,
}

impl ContentKind {
    pub const ALL: [ContentKind; 5] = [
        ContentKind::Cashout,
        ContentKind::BettingOffer,
        ContentKind::Market,
        ContentKind::EventInfo,
        ContentKind::Sport,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Cashout => Cashout::ENTITY_TYPE,
            ContentKind::BettingOffer => BettingOffer::ENTITY_TYPE,
            ContentKind::Market => Market::ENTITY_TYPE,
            ContentKind::EventInfo => EventInfo::ENTITY_TYPE,
            ContentKind::Sport => Sport::ENTITY_TYPE,
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CASHOUT" => Ok(ContentKind::Cashout),
            "BETTING_OFFER" => Ok(ContentKind::BettingOffer),
            "MARKET" => Ok(ContentKind::Market),
            "EVENT_INFO" => Ok(ContentKind::EventInfo),
            "SPORT" => Ok(ContentKind::Sport),
            _ => Err(format!("Unknown entity type: {}", s)),
        }
    }
}

// ============================================================================
// Cashout
// ============================================================================

/// Cashout offer for a placed bet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cashout {
    pub id: String,
    #[serde(default)]
    pub bet_id: Option<String>,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub stake: Option<f64>,
}

impl Cashout {
    /// Cashout value minus the original stake, when both are known
    pub fn profit(&self) -> Option<f64> {
        match (self.value, self.stake) {
            (Some(value), Some(stake)) => Some(value - stake),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashoutPatch {
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub stake: Option<f64>,
}

impl Entity for Cashout {
    type Patch = CashoutPatch;
    const ENTITY_TYPE: &'static str = "CASHOUT";

    fn id(&self) -> &str {
        &self.id
    }

    fn merge(&mut self, patch: &CashoutPatch) -> bool {
        let value = merge_optional(&mut self.value, &patch.value);
        let stake = merge_optional(&mut self.stake, &patch.stake);
        value || stake
    }
}

// ============================================================================
// Betting offer
// ============================================================================

/// Price offered on one outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BettingOffer {
    pub id: String,
    #[serde(default)]
    pub outcome_id: Option<String>,
    #[serde(default)]
    pub betting_type_id: Option<String>,
    #[serde(default)]
    pub status_id: Option<String>,
    pub odds: f64,
    #[serde(default)]
    pub is_live: bool,
    #[serde(default = "default_true")]
    pub is_available: bool,
    #[serde(default)]
    pub last_changed_time: Option<i64>,
}

fn default_true() -> bool {
    true
}

impl BettingOffer {
    /// Status "1" is the open/active status on the wire
    pub fn is_open(&self) -> bool {
        self.is_available && self.status_id.as_deref().map_or(true, |s| s == "1")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BettingOfferPatch {
    #[serde(default)]
    pub odds: Option<f64>,
    #[serde(default)]
    pub status_id: Option<String>,
    #[serde(default)]
    pub is_live: Option<bool>,
    #[serde(default)]
    pub is_available: Option<bool>,
    #[serde(default)]
    pub last_changed_time: Option<i64>,
}

impl Entity for BettingOffer {
    type Patch = BettingOfferPatch;
    const ENTITY_TYPE: &'static str = "BETTING_OFFER";

    fn id(&self) -> &str {
        &self.id
    }

    fn merge(&mut self, patch: &BettingOfferPatch) -> bool {
        let mut changed = merge_field(&mut self.odds, &patch.odds);
        changed |= merge_optional(&mut self.status_id, &patch.status_id);
        changed |= merge_field(&mut self.is_live, &patch.is_live);
        changed |= merge_field(&mut self.is_available, &patch.is_available);
        changed |= merge_optional(&mut self.last_changed_time, &patch.last_changed_time);
        changed
    }
}

// ============================================================================
// Market
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Market {
    pub id: String,
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub betting_type_id: Option<String>,
    #[serde(default)]
    pub event_part_id: Option<String>,
    #[serde(default = "default_true")]
    pub is_available: bool,
    #[serde(default)]
    pub is_closed: bool,
}

impl Market {
    pub fn is_tradable(&self) -> bool {
        self.is_available && !self.is_closed
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketPatch {
    #[serde(default)]
    pub is_available: Option<bool>,
    #[serde(default)]
    pub is_closed: Option<bool>,
}

impl Entity for Market {
    type Patch = MarketPatch;
    const ENTITY_TYPE: &'static str = "MARKET";

    fn id(&self) -> &str {
        &self.id
    }

    fn merge(&mut self, patch: &MarketPatch) -> bool {
        let available = merge_field(&mut self.is_available, &patch.is_available);
        let closed = merge_field(&mut self.is_closed, &patch.is_closed);
        available || closed
    }
}

// ============================================================================
// Event info (live scores, match clock, status)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventInfo {
    pub id: String,
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub type_id: Option<String>,
    #[serde(default)]
    pub status_id: Option<String>,
    #[serde(default)]
    pub param_float1: Option<f64>,
    #[serde(default)]
    pub param_float2: Option<f64>,
    #[serde(default)]
    pub param_event_part_name1: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventInfoPatch {
    #[serde(default)]
    pub status_id: Option<String>,
    #[serde(default)]
    pub param_float1: Option<f64>,
    #[serde(default)]
    pub param_float2: Option<f64>,
    #[serde(default)]
    pub param_event_part_name1: Option<String>,
}

impl Entity for EventInfo {
    type Patch = EventInfoPatch;
    const ENTITY_TYPE: &'static str = "EVENT_INFO";

    fn id(&self) -> &str {
        &self.id
    }

    fn merge(&mut self, patch: &EventInfoPatch) -> bool {
        let mut changed = merge_optional(&mut self.status_id, &patch.status_id);
        changed |= merge_optional(&mut self.param_float1, &patch.param_float1);
        changed |= merge_optional(&mut self.param_float2, &patch.param_float2);
        changed |= merge_optional(&mut self.param_event_part_name1, &patch.param_event_part_name1);
        changed
    }
}

// ============================================================================
// Sport (discipline)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sport {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub short_name: Option<String>,
    #[serde(default)]
    pub is_virtual: bool,
    #[serde(default)]
    pub number_of_events: u32,
    #[serde(default)]
    pub number_of_live_events: u32,
    #[serde(default)]
    pub number_of_markets: u32,
}

impl Sport {
    pub fn has_live_events(&self) -> bool {
        self.number_of_live_events > 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SportPatch {
    #[serde(default)]
    pub number_of_events: Option<u32>,
    #[serde(default)]
    pub number_of_live_events: Option<u32>,
    #[serde(default)]
    pub number_of_markets: Option<u32>,
}

impl Entity for Sport {
    type Patch = SportPatch;
    const ENTITY_TYPE: &'static str = "SPORT";

    fn id(&self) -> &str {
        &self.id
    }

    fn merge(&mut self, patch: &SportPatch) -> bool {
        let mut changed = merge_field(&mut self.number_of_events, &patch.number_of_events);
        changed |= merge_field(&mut self.number_of_live_events, &patch.number_of_live_events);
        changed |= merge_field(&mut self.number_of_markets, &patch.number_of_markets);
        changed
    }
}
