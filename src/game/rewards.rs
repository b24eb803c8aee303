//! Reward Tables
//!
//! Experience tiers, the level curve, and the reward summary handed back to
//! callers after a resolution.

use serde::{Deserialize, Serialize};

use crate::game::feature::Rarity;
use crate::game::ids::ItemId;

/// Catch XP per rarity tier, indexed by `Rarity as usize`.
pub const RARITY_XP: [u64; 5] = [10, 25, 50, 100, 250];

/// Bonus for the first-ever catch in a category.
pub const FIRST_OF_KIND_XP: u64 = 50;

/// Bonus for a repeat catch in a category.
pub const REPEAT_CATCH_XP: u64 = 10;

/// Flat XP for a missed catch.
pub const MISSED_ATTEMPT_XP: u64 = 5;

/// Base XP for visiting a point of interest.
pub const SITE_VISIT_XP: u64 = 25;

/// XP needed per level step on the quadratic curve.
const LEVEL_STEP_XP: u64 = 100;

/// XP granted for a successful catch.
pub fn catch_xp(rarity: Rarity, first_of_kind: bool) -> u64 {
    let bonus = if first_of_kind { FIRST_OF_KIND_XP } else { REPEAT_CATCH_XP };
    RARITY_XP[rarity as usize] + bonus
}

/// Level reached with `total_xp` experience. Level 1 starts at 0 XP.
pub fn level_for_xp(total_xp: u64) -> u32 {
    ((total_xp as f64 / LEVEL_STEP_XP as f64).sqrt().floor() as u32) + 1
}

/// Total XP at which the level after `level` begins.
pub fn xp_for_next_level(level: u32) -> u64 {
    let level = level.max(1) as u64;
    level * level * LEVEL_STEP_XP
}

/// Items added to a user's inventory by a resolution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemGrant {
    /// Item granted.
    pub item_id: ItemId,
    /// Units granted.
    pub quantity: u32,
}

/// What a resolution actually granted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Rewards {
    /// XP credited by this resolution.
    pub xp_gained: u64,
    /// First success against this category.
    pub first_of_kind: bool,
    /// Items merged into inventory.
    pub items: Vec<ItemGrant>,
    /// User total after the grant, when the ledger reported it.
    pub total_xp: Option<u64>,
    /// Level after the grant, when the ledger reported a total.
    pub level: Option<u32>,
}

impl Rewards {
    /// Record the ledger's new total and derive the level from it.
    pub fn with_total(mut self, total_xp: u64) -> Self {
        self.total_xp = Some(total_xp);
        self.level = Some(level_for_xp(total_xp));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catch_xp_tiers() {
        assert_eq!(catch_xp(Rarity::Common, false), 20);
        assert_eq!(catch_xp(Rarity::Common, true), 60);
        assert_eq!(catch_xp(Rarity::Legendary, true), 300);
        assert!(catch_xp(Rarity::Epic, true) > catch_xp(Rarity::Epic, false));
    }

    #[test]
    fn test_level_curve() {
        assert_eq!(level_for_xp(0), 1);
        assert_eq!(level_for_xp(99), 1);
        assert_eq!(level_for_xp(100), 2);
        assert_eq!(level_for_xp(399), 2);
        assert_eq!(level_for_xp(400), 3);
        assert_eq!(level_for_xp(900), 4);
    }

    #[test]
    fn test_next_level_threshold_matches_curve() {
        for level in 1..20 {
            let threshold = xp_for_next_level(level);
            assert_eq!(level_for_xp(threshold), level + 1);
            assert_eq!(level_for_xp(threshold - 1), level);
        }
        assert_eq!(xp_for_next_level(1), 100);
    }

    #[test]
    fn test_with_total_sets_level() {
        let rewards = Rewards { xp_gained: 60, ..Default::default() }.with_total(450);
        assert_eq!(rewards.total_xp, Some(450));
        assert_eq!(rewards.level, Some(3));
    }
}
