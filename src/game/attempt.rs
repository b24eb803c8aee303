//! Attempt Records
//!
//! An [`Attempt`] is created `Pending` once per attempt start and mutated
//! exactly once into a terminal [`Resolution`]. The mutation payload is an
//! [`AttemptResolution`], applied by the store with a compare-and-swap on the
//! pending state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::hash::{AuditDigest, AuditHasher};
use crate::game::feature::{FeatureKind, GeofenceFeature, Rarity};
use crate::game::ids::{AttemptId, FeatureId, ItemId, UserId};
use crate::game::loot::LootDraw;

// =============================================================================
// RESOLUTION
// =============================================================================

/// Attempt state. Everything except `Pending` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Resolution {
    /// Open, awaiting resolution.
    Pending = 0,
    /// Probabilistic success.
    Caught = 1,
    /// Probabilistic failure.
    Missed = 2,
    /// Timed out before resolution.
    Fled = 3,
    /// Cooldown-gated visit completed.
    Interacted = 4,
}

/// Coarse outcome of a terminal resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Caught or interacted.
    ResolvedSuccess,
    /// Missed.
    ResolvedFailure,
    /// Fled.
    ResolvedTimeout,
}

impl Resolution {
    /// Whether no further transition is allowed.
    #[inline]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Resolution::Pending)
    }

    /// Outcome class, `None` while pending.
    pub fn outcome(self) -> Option<Outcome> {
        match self {
            Resolution::Pending => None,
            Resolution::Caught | Resolution::Interacted => Some(Outcome::ResolvedSuccess),
            Resolution::Missed => Some(Outcome::ResolvedFailure),
            Resolution::Fled => Some(Outcome::ResolvedTimeout),
        }
    }
}

// =============================================================================
// APPLIED MODIFIERS
// =============================================================================

/// Inputs and draws that produced a resolution, retained for fraud review.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppliedModifiers {
    /// Probabilistic catch.
    Catch {
        /// Validated skill input in `[0, 1]`.
        skill_quality: f64,
        /// Item applied, if one was found and matched.
        item_id: Option<ItemId>,
        /// Additive bonus from the item (0 when none applied).
        item_bonus: f64,
        /// Clamped success probability.
        final_rate: f64,
        /// Server roll in `[0, 1)`.
        roll: f64,
    },
    /// Loot table draws for a visit.
    Loot {
        /// Draws in roll order.
        draws: Vec<LootDraw>,
    },
    /// Attempt expired before resolution.
    Timeout {
        /// Seconds between open and the expiry check.
        elapsed_seconds: f64,
    },
}

impl AppliedModifiers {
    fn feed(&self, hasher: &mut AuditHasher) {
        match self {
            AppliedModifiers::Catch { skill_quality, item_id, item_bonus, final_rate, roll } => {
                hasher.update_u8(1);
                hasher.update_f64(*skill_quality);
                hasher.update_str(item_id.as_ref().map(|i| i.as_str()).unwrap_or(""));
                hasher.update_f64(*item_bonus);
                hasher.update_f64(*final_rate);
                hasher.update_f64(*roll);
            }
            AppliedModifiers::Loot { draws } => {
                hasher.update_u8(2);
                hasher.update_i64(draws.len() as i64);
                for draw in draws {
                    hasher.update_f64(draw.roll);
                    hasher.update_i64(draw.quantity as i64);
                }
            }
            AppliedModifiers::Timeout { elapsed_seconds } => {
                hasher.update_u8(3);
                hasher.update_f64(*elapsed_seconds);
            }
        }
    }
}

// =============================================================================
// ATTEMPT
// =============================================================================

/// Feature data captured at open time.
///
/// Settlement uses this rather than re-reading the catalog, so an attempt on a
/// spawn that vanished mid-attempt can still resolve.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureSnapshot {
    /// Feature kind.
    pub kind: FeatureKind,
    /// Rarity tier.
    pub rarity: Rarity,
    /// First-of-kind ledger category.
    pub category: String,
}

impl From<&GeofenceFeature> for FeatureSnapshot {
    fn from(feature: &GeofenceFeature) -> Self {
        Self {
            kind: feature.kind,
            rarity: feature.rarity,
            category: feature.category.clone(),
        }
    }
}

/// One attempt against a feature.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    /// Attempt id.
    pub id: AttemptId,
    /// Owner.
    pub user_id: UserId,
    /// Target feature.
    pub feature_id: FeatureId,
    /// When the attempt was opened.
    pub started_at: DateTime<Utc>,
    /// Rarity-derived starting probability.
    pub base_rate: f64,
    /// Feature data captured at open time.
    pub feature: FeatureSnapshot,
    /// Current state.
    pub resolution: Resolution,
    /// When the terminal state was written.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Modifiers behind the terminal state.
    pub applied: Option<AppliedModifiers>,
    /// Digest over the terminal record.
    pub digest: Option<AuditDigest>,
}

impl Attempt {
    /// Open a new pending attempt. Spawns start at their rarity's base rate;
    /// visits always succeed.
    pub fn open(
        user_id: UserId,
        feature: &GeofenceFeature,
        started_at: DateTime<Utc>,
    ) -> Self {
        let base_rate = match feature.kind {
            FeatureKind::Spawn => feature.rarity.base_rate(),
            FeatureKind::PointOfInterest | FeatureKind::MissionWaypoint => 1.0,
        };
        Self {
            id: AttemptId::new_v4(),
            user_id,
            feature_id: feature.id,
            started_at,
            base_rate,
            feature: FeatureSnapshot::from(feature),
            resolution: Resolution::Pending,
            resolved_at: None,
            applied: None,
            digest: None,
        }
    }

    /// Whether the attempt is still open.
    #[inline]
    pub fn is_pending(&self) -> bool {
        self.resolution == Resolution::Pending
    }

    /// Seconds elapsed between open and `now`.
    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> f64 {
        (now - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    /// Apply a terminal resolution. The store calls this only after its
    /// pending check passed.
    pub fn apply(&mut self, resolution: &AttemptResolution) {
        self.resolution = resolution.resolution;
        self.resolved_at = Some(resolution.resolved_at);
        self.applied = Some(resolution.applied.clone());
        self.digest = Some(resolution.digest);
    }

    /// Recompute the digest of the stored terminal record.
    pub fn verify_digest(&self) -> bool {
        match (&self.applied, self.resolved_at, self.digest) {
            (Some(applied), Some(resolved_at), Some(digest)) => {
                resolution_digest(self, self.resolution, resolved_at, applied) == digest
            }
            _ => false,
        }
    }
}

/// Terminal state written by a conditional update.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttemptResolution {
    /// Terminal state.
    pub resolution: Resolution,
    /// Write time.
    pub resolved_at: DateTime<Utc>,
    /// Modifiers behind the state.
    pub applied: AppliedModifiers,
    /// Digest over the record.
    pub digest: AuditDigest,
}

impl AttemptResolution {
    /// Build a resolution for `attempt`, computing its digest.
    pub fn new(
        attempt: &Attempt,
        resolution: Resolution,
        resolved_at: DateTime<Utc>,
        applied: AppliedModifiers,
    ) -> Self {
        debug_assert!(resolution.is_terminal(), "resolution must be terminal");
        let digest = resolution_digest(attempt, resolution, resolved_at, &applied);
        Self { resolution, resolved_at, applied, digest }
    }

    /// Hex digest for log lines.
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest)
    }
}

fn resolution_digest(
    attempt: &Attempt,
    resolution: Resolution,
    resolved_at: DateTime<Utc>,
    applied: &AppliedModifiers,
) -> AuditDigest {
    let mut hasher = AuditHasher::for_resolution();
    hasher.update_uuid(attempt.id.as_bytes());
    hasher.update_uuid(attempt.user_id.as_bytes());
    hasher.update_u8(resolution as u8);
    hasher.update_i64(resolved_at.timestamp_millis());
    hasher.update_f64(attempt.base_rate);
    applied.feed(&mut hasher);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geo::Coordinate;
    use chrono::Duration;

    fn spawn() -> GeofenceFeature {
        GeofenceFeature {
            id: FeatureId::new_v4(),
            center: Coordinate::new(40.0, -80.0),
            radius_meters: 50.0,
            kind: FeatureKind::Spawn,
            rarity: Rarity::Epic,
            category: "bald-eagle".into(),
            expires_at: None,
        }
    }

    fn catch(roll: f64) -> AppliedModifiers {
        AppliedModifiers::Catch {
            skill_quality: 0.5,
            item_id: None,
            item_bonus: 0.0,
            final_rate: 0.4,
            roll,
        }
    }

    #[test]
    fn test_open_captures_feature() {
        let feature = spawn();
        let attempt = Attempt::open(UserId::new([1; 16]), &feature, Utc::now());
        assert!(attempt.is_pending());
        assert_eq!(attempt.base_rate, 0.15);
        assert_eq!(attempt.feature.category, "bald-eagle");
        assert_eq!(attempt.feature.kind, FeatureKind::Spawn);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!Resolution::Pending.is_terminal());
        assert!(Resolution::Caught.is_terminal());
        assert_eq!(Resolution::Fled.outcome(), Some(Outcome::ResolvedTimeout));
        assert_eq!(Resolution::Interacted.outcome(), Some(Outcome::ResolvedSuccess));
        assert_eq!(Resolution::Missed.outcome(), Some(Outcome::ResolvedFailure));
        assert_eq!(Resolution::Pending.outcome(), None);
    }

    #[test]
    fn test_elapsed_seconds() {
        let start = DateTime::<Utc>::UNIX_EPOCH;
        let attempt = Attempt::open(UserId::default(), &spawn(), start);
        assert_eq!(attempt.elapsed_seconds(start + Duration::milliseconds(301_500)), 301.5);
    }

    #[test]
    fn test_digest_detects_tampered_roll() {
        let now = Utc::now();
        let mut attempt = Attempt::open(UserId::new([2; 16]), &spawn(), now);
        let resolution = AttemptResolution::new(&attempt, Resolution::Missed, now, catch(0.61));
        attempt.apply(&resolution);
        assert!(attempt.verify_digest());

        attempt.applied = Some(catch(0.01));
        assert!(!attempt.verify_digest());
    }

    #[test]
    fn test_pending_has_no_valid_digest() {
        let attempt = Attempt::open(UserId::default(), &spawn(), Utc::now());
        assert!(!attempt.verify_digest());
    }

    #[test]
    fn test_modifiers_json_is_tagged() {
        let json = serde_json::to_string(&catch(0.3)).unwrap();
        assert!(json.contains("\"type\":\"catch\""));
        assert!(json.contains("\"roll\":0.3"));
    }
}
