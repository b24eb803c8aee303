//! Weighted Loot Table
//!
//! Point-of-interest visits roll 1-3 draws from a fixed table. Each draw is one
//! uniform roll matched against the cumulative tier weights.

use serde::{Deserialize, Serialize};

use crate::core::rng::RollSource;
use crate::game::ids::ItemId;
use crate::game::rewards::ItemGrant;

/// Loot tier with a fixed weight and payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LootTier {
    /// Common consumable (`basic_bait`, 1-3 units).
    CommonConsumable,
    /// Rare page or material (`field_journal_page`).
    RareMaterial,
    /// Rare consumable (`rare_bait`).
    RareConsumable,
    /// Special reward (`camera_upgrade`) with bonus XP.
    Special,
}

/// Tiers in scan order with their weights. Weights sum to 1.0.
pub const LOOT_TABLE: [(LootTier, f64); 4] = [
    (LootTier::CommonConsumable, 0.50),
    (LootTier::RareMaterial, 0.30),
    (LootTier::RareConsumable, 0.15),
    (LootTier::Special, 0.05),
];

/// Fewest draws per visit.
pub const MIN_DRAWS: u32 = 1;

/// Most draws per visit.
pub const MAX_DRAWS: u32 = 3;

/// Bonus XP for rolling the special tier.
pub const SPECIAL_BONUS_XP: u64 = 50;

impl LootTier {
    /// Item granted by this tier.
    pub fn item_id(self) -> ItemId {
        ItemId::new(match self {
            LootTier::CommonConsumable => "basic_bait",
            LootTier::RareMaterial => "field_journal_page",
            LootTier::RareConsumable => "rare_bait",
            LootTier::Special => "camera_upgrade",
        })
    }

    /// Inclusive quantity range for one draw of this tier.
    pub fn quantity_range(self) -> (u32, u32) {
        match self {
            LootTier::CommonConsumable => (1, 3),
            LootTier::RareMaterial | LootTier::RareConsumable | LootTier::Special => (1, 1),
        }
    }

    /// Extra XP for rolling this tier.
    pub fn bonus_xp(self) -> u64 {
        match self {
            LootTier::Special => SPECIAL_BONUS_XP,
            _ => 0,
        }
    }

    /// Tier selected by a uniform `roll` in `[0, 1)`.
    ///
    /// Cumulative scan; a roll at or past the summed weight (float slack) lands
    /// in the last tier.
    pub fn from_roll(roll: f64) -> LootTier {
        let mut cumulative = 0.0;
        for (tier, weight) in LOOT_TABLE {
            cumulative += weight;
            if roll < cumulative {
                return tier;
            }
        }
        LOOT_TABLE[LOOT_TABLE.len() - 1].0
    }
}

/// One loot draw.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LootDraw {
    /// Uniform roll that picked the tier.
    pub roll: f64,
    /// Selected tier.
    pub tier: LootTier,
    /// Units granted.
    pub quantity: u32,
}

impl LootDraw {
    /// Inventory grant for this draw.
    pub fn grant(&self) -> ItemGrant {
        ItemGrant {
            item_id: self.tier.item_id(),
            quantity: self.quantity,
        }
    }
}

/// Roll a full visit: 1-3 draws.
pub fn roll_loot(rng: &mut dyn RollSource) -> Vec<LootDraw> {
    let draws = rng.next_int_range(MIN_DRAWS, MAX_DRAWS);
    (0..draws)
        .map(|_| {
            let roll = rng.next_unit();
            let tier = LootTier::from_roll(roll);
            let (min, max) = tier.quantity_range();
            LootDraw {
                roll,
                tier,
                quantity: rng.next_int_range(min, max),
            }
        })
        .collect()
}

/// Merge draws of the same item into one grant each, preserving first-seen order.
pub fn merge_grants(draws: &[LootDraw]) -> Vec<ItemGrant> {
    let mut grants: Vec<ItemGrant> = Vec::new();
    for draw in draws {
        let grant = draw.grant();
        match grants.iter_mut().find(|g| g.item_id == grant.item_id) {
            Some(existing) => existing.quantity += grant.quantity,
            None => grants.push(grant),
        }
    }
    grants
}

// =============================================================================
// TESTS
// =============================================================================
