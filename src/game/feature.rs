//! Geofenced Features and Items
//!
//! Read-only catalog records. Features and item definitions are owned by the
//! content catalog; the engine only reads them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::geo::{distance_meters, Coordinate, GeoError};
use crate::game::ids::{FeatureId, ItemId};

// =============================================================================
// FEATURE KIND
// =============================================================================

/// What kind of interaction a feature supports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    /// Ephemeral wildlife spawn, resolved by a probabilistic catch.
    Spawn,
    /// Fixed site with a cooldown-gated visit and loot roll.
    PointOfInterest,
    /// Mission location that records a check-in.
    MissionWaypoint,
}

impl FeatureKind {
    /// Stable snake_case name.
    pub fn as_str(self) -> &'static str {
        match self {
            FeatureKind::Spawn => "spawn",
            FeatureKind::PointOfInterest => "point_of_interest",
            FeatureKind::MissionWaypoint => "mission_waypoint",
        }
    }
}

// =============================================================================
// RARITY
// =============================================================================

/// Rarity tier of a spawn's species.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Rarity {
    /// 70% base catch rate.
    #[default]
    Common = 0,
    /// 50% base catch rate.
    Uncommon = 1,
    /// 30% base catch rate.
    Rare = 2,
    /// 15% base catch rate.
    Epic = 3,
    /// 5% base catch rate.
    Legendary = 4,
}

/// Base catch rate per rarity tier, indexed by `Rarity as usize`.
pub const BASE_CATCH_RATES: [f64; 5] = [0.70, 0.50, 0.30, 0.15, 0.05];

impl Rarity {
    /// Starting probability of a catch before any modifiers.
    #[inline]
    pub fn base_rate(self) -> f64 {
        BASE_CATCH_RATES[self as usize]
    }

    /// All tiers from most to least common.
    pub const ALL: [Rarity; 5] = [
        Rarity::Common,
        Rarity::Uncommon,
        Rarity::Rare,
        Rarity::Epic,
        Rarity::Legendary,
    ];
}

// =============================================================================
// GEOFENCE FEATURE
// =============================================================================

/// A circular geofenced feature from the content catalog.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeofenceFeature {
    /// Catalog id.
    pub id: FeatureId,
    /// Center of the geofence.
    pub center: Coordinate,
    /// Interaction radius in meters.
    pub radius_meters: f64,
    /// Interaction kind.
    pub kind: FeatureKind,
    /// Rarity tier (meaningful for spawns).
    #[serde(default)]
    pub rarity: Rarity,
    /// Category used for the first-of-kind ledger (species id for spawns).
    pub category: String,
    /// Expiry for ephemeral spawns; `None` for permanent features.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl GeofenceFeature {
    /// Whether an ephemeral feature has expired at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at < now)
    }

    /// Direct one-shot distance from `point` to the feature center.
    pub fn distance_from(&self, point: Coordinate) -> Result<f64, GeoError> {
        distance_meters(point, self.center)
    }
}

// =============================================================================
// ITEMS
// =============================================================================

/// Effect type of a consumable item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemEffect {
    /// Boosts spawn catch rate.
    Bait,
    /// Attracts spawns (no catch effect).
    Lure,
    /// Camera upgrade (no catch effect).
    Camera,
    /// Collectible or crafting material.
    Tool,
}

impl ItemEffect {
    /// Whether this effect modifies attempts against `kind`.
    pub fn applies_to(self, kind: FeatureKind) -> bool {
        matches!((self, kind), (ItemEffect::Bait, FeatureKind::Spawn))
    }
}

/// Item definition from the content catalog.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemDefinition {
    /// Catalog id.
    pub id: ItemId,
    /// Effect type.
    pub effect: ItemEffect,
    /// Effect magnitude; for bait, the additive catch rate bonus.
    pub effect_value: f64,
}
