//! Encounter/Interaction Resolver
//!
//! Authoritative state machine for location-gated actions:
//!
//! - **Catch** (spawns): open a pending attempt, then resolve it once with a
//!   single server roll against `clamp(base + skill * weight + item, 0, cap)`.
//! - **Visit** (points of interest): cooldown-gated, always succeeds, rolls
//!   the loot table.
//! - **Check-in** (mission waypoints): range-gated ledger entry.
//!
//! Every decisive write goes through a conditional store primitive. Reward
//! side effects run only after the resolution write has won, and are
//! best-effort: a failed XP grant or item decrement is logged and never
//! undoes or repeats the resolution.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::clock::{Clock, SystemClock};
use crate::core::geo::{bearing_degrees, Coordinate};
use crate::core::rng::{DeterministicRng, RollSource};
use crate::game::attempt::{AppliedModifiers, Attempt, AttemptResolution, Resolution};
use crate::game::error::{EngineError, EngineResult};
use crate::game::events::AuditEvent;
use crate::game::feature::{FeatureKind, GeofenceFeature};
use crate::game::geofence::{GeofenceEvaluator, GeofenceReport};
use crate::game::ids::{AttemptId, FeatureId, ItemId, UserId};
use crate::game::loot::{merge_grants, roll_loot, LootDraw};
use crate::game::movement::{LocationFix, MovementConfig, MovementValidator};
use crate::game::rewards::{catch_xp, Rewards, MISSED_ATTEMPT_XP, SITE_VISIT_XP};
use crate::store::{ConsumingResolve, CooldownClaim, StoreError, Stores};

/// Largest radius a nearby query may ask for (m).
pub const MAX_NEARBY_RADIUS_METERS: f64 = 5_000.0;

// =============================================================================
// CONFIG
// =============================================================================

/// Resolver tunables.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolverConfig {
    /// Pending attempts older than this resolve as fled.
    pub attempt_timeout: Duration,
    /// Multiplier on skill quality.
    pub skill_weight: f64,
    /// Upper clamp on the final catch rate.
    pub rate_cap: f64,
    /// Minimum time between visits to one point of interest.
    pub cooldown_window: Duration,
    /// Bait bonus used when an item's effect value is unset.
    pub default_item_bonus: f64,
    /// Default radius for nearby queries (m).
    pub nearby_radius_meters: f64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::minutes(5),
            skill_weight: 0.5,
            rate_cap: 0.99,
            cooldown_window: Duration::hours(4),
            default_item_bonus: 0.2,
            nearby_radius_meters: 300.0,
        }
    }
}

// =============================================================================
// RESULTS
// =============================================================================

/// A freshly opened attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenedAttempt {
    /// Attempt id for the later resolve call.
    pub attempt_id: AttemptId,
    /// Rarity-derived starting probability.
    pub base_rate: f64,
    /// Server open time.
    pub started_at: DateTime<Utc>,
    /// Measured distance to the spawn (m).
    pub distance_meters: f64,
}

/// A terminal attempt and what it granted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedAttempt {
    /// Attempt id.
    pub attempt_id: AttemptId,
    /// Terminal state.
    pub resolution: Resolution,
    /// Rewards granted.
    pub rewards: Rewards,
    /// Clamped success probability; `None` for timeouts.
    pub final_rate: Option<f64>,
    /// Whether an item unit was consumed.
    pub item_consumed: bool,
}

/// Outcome of a point-of-interest visit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractOutcome {
    /// Attempt recording the visit.
    pub attempt_id: AttemptId,
    /// Rewards granted.
    pub rewards: Rewards,
    /// Loot draws in roll order.
    pub draws: Vec<LootDraw>,
    /// Earliest next visit.
    pub next_available_at: DateTime<Utc>,
    /// Sites visited after this one, when the ledger reported it.
    pub sites_visited: Option<u32>,
}

/// Outcome of a waypoint check-in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaypointVisit {
    /// Server check-in time.
    pub visited_at: DateTime<Utc>,
    /// First check-in at this waypoint.
    pub first_visit: bool,
}

/// A feature returned by a nearby query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyFeature {
    /// The feature.
    pub feature: GeofenceFeature,
    /// Distance from the query point (m).
    pub distance_meters: f64,
    /// Bearing from the query point, degrees `[0, 360)`.
    pub bearing_degrees: f64,
}

/// A catch outcome ready to commit.
struct CatchResolution {
    item_id: Option<ItemId>,
    final_rate: f64,
    caught: bool,
    resolution: AttemptResolution,
}

// =============================================================================
// RESOLVER
// =============================================================================

/// The encounter/interaction resolver.
pub struct EncounterResolver {
    config: ResolverConfig,
    stores: Stores,
    movement: MovementValidator,
    clock: Arc<dyn Clock>,
    rng: Mutex<Box<dyn RollSource>>,
}

impl EncounterResolver {
    /// Create a resolver on the wall clock with an entropy-seeded RNG.
    pub fn new(config: ResolverConfig, movement: MovementConfig, stores: Stores) -> Self {
        let validator = MovementValidator::new(movement, stores.fixes.clone(), stores.audit.clone());
        Self {
            config,
            stores,
            movement: validator,
            clock: Arc::new(SystemClock),
            rng: Mutex::new(Box::new(DeterministicRng::from_entropy())),
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the roll source.
    pub fn with_rng(mut self, rng: Box<dyn RollSource>) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// The movement validator this resolver gates on.
    pub fn movement(&self) -> &MovementValidator {
        &self.movement
    }

    /// Current server time.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn roll(&self) -> f64 {
        self.rng.lock().unwrap_or_else(|e| e.into_inner()).next_unit()
    }

    fn roll_visit_loot(&self) -> Vec<LootDraw> {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        roll_loot(&mut **rng)
    }

    fn is_stale(&self, attempt: &Attempt, now: DateTime<Utc>) -> bool {
        now - attempt.started_at > self.config.attempt_timeout
    }

    // -------------------------------------------------------------------------
    // Shared gates
    // -------------------------------------------------------------------------

    /// Look up a live feature of the expected kind.
    async fn live_feature(&self, id: FeatureId, kind: FeatureKind, now: DateTime<Utc>) -> EngineResult<GeofenceFeature> {
        let feature = self
            .stores
            .catalog
            .feature(id)
            .await?
            .ok_or(EngineError::FeatureNotFound(id))?;
        if feature.kind != kind {
            return Err(EngineError::UnsupportedFeature(feature.kind));
        }
        if feature.is_expired(now) {
            return Err(EngineError::FeatureExpired(id));
        }
        Ok(feature)
    }

    /// Direct one-shot range check. Returns the distance.
    fn check_range(&self, user: UserId, feature: &GeofenceFeature, position: Coordinate) -> EngineResult<f64> {
        let distance = feature.distance_from(position)?;
        if distance > feature.radius_meters {
            debug!(
                user = %user.short(),
                feature = %feature.id,
                distance_m = distance,
                radius_m = feature.radius_meters,
                "Out of range"
            );
            return Err(EngineError::OutOfRange {
                distance,
                required: feature.radius_meters,
            });
        }
        Ok(distance)
    }

    async fn require_plausible(&self, user: UserId, position: Coordinate, now: DateTime<Utc>) -> EngineResult<()> {
        self.movement
            .require_plausible(user, LocationFix::new(position, 0.0, now))
            .await
    }

    /// Insert a pending attempt. A stale pending attempt in the way is expired
    /// first, once.
    async fn insert_pending(&self, attempt: &Attempt, now: DateTime<Utc>) -> EngineResult<()> {
        let mut retried = false;
        loop {
            match self.stores.attempts.insert_pending(attempt.clone()).await {
                Ok(()) => return Ok(()),
                Err(StoreError::Conflict) => {}
                Err(e) => return Err(e.into()),
            }

            let existing = self
                .stores
                .attempts
                .pending_for(attempt.user_id, attempt.feature_id)
                .await?;
            match existing {
                Some(existing) if retried || !self.is_stale(&existing, now) => {
                    return Err(EngineError::AlreadyPending(existing.id));
                }
                Some(existing) => {
                    self.expire(&existing, now).await?;
                }
                // Resolved between our insert and lookup
                None if retried => return Err(StoreError::Conflict.into()),
                None => {}
            }
            retried = true;
        }
    }

    /// Conditionally resolve a pending attempt as fled. Returns whether this
    /// call won.
    async fn expire(&self, attempt: &Attempt, now: DateTime<Utc>) -> EngineResult<bool> {
        let elapsed_seconds = attempt.elapsed_seconds(now);
        let resolution = AttemptResolution::new(
            attempt,
            Resolution::Fled,
            now,
            AppliedModifiers::Timeout { elapsed_seconds },
        );
        let won = self.stores.attempts.resolve_if_pending(attempt.id, resolution).await?;
        if won {
            info!(
                user = %attempt.user_id.short(),
                attempt = %attempt.id,
                elapsed_s = elapsed_seconds,
                "Attempt fled"
            );
            self.stores
                .audit
                .emit(AuditEvent::attempt_expired(attempt.user_id, now, attempt.id, elapsed_seconds));
        }
        Ok(won)
    }

    /// Error for a resolve that found the attempt no longer pending.
    async fn not_pending_error(&self, id: AttemptId) -> EngineError {
        match self.stores.attempts.attempt(id).await {
            Ok(Some(a)) if a.resolution == Resolution::Fled => EngineError::TimedOut(id),
            _ => EngineError::AlreadyResolved(id),
        }
    }

    /// Credit XP, logging instead of failing.
    async fn credit_xp(&self, user: UserId, mut rewards: Rewards) -> Rewards {
        match self.stores.progress.grant_xp(user, rewards.xp_gained).await {
            Ok(total) => rewards = rewards.with_total(total),
            Err(e) => warn!(user = %user.short(), xp = rewards.xp_gained, "XP grant failed: {}", e),
        }
        rewards
    }

    // -------------------------------------------------------------------------
    // Catch
    // -------------------------------------------------------------------------

    /// Open a catch attempt against a spawn.
    pub async fn open_attempt(&self, user: UserId, feature_id: FeatureId, position: Coordinate) -> EngineResult<OpenedAttempt> {
        position.validate()?;
        let now = self.clock.now();

        let feature = self.live_feature(feature_id, FeatureKind::Spawn, now).await?;
        let distance = self.check_range(user, &feature, position)?;
        self.require_plausible(user, position, now).await?;

        let attempt = Attempt::open(user, &feature, now);
        self.insert_pending(&attempt, now).await?;

        info!(
            user = %user.short(),
            attempt = %attempt.id,
            feature = %feature.id,
            base_rate = attempt.base_rate,
            "Attempt opened"
        );
        self.stores.audit.emit(AuditEvent::encounter_started(
            user,
            now,
            attempt.id,
            feature.id,
            distance,
            attempt.base_rate,
        ));

        Ok(OpenedAttempt {
            attempt_id: attempt.id,
            base_rate: attempt.base_rate,
            started_at: attempt.started_at,
            distance_meters: distance,
        })
    }

    /// Item bonus for `item_id`, if the user holds a unit and it applies.
    async fn item_bonus(&self, user: UserId, attempt: &Attempt, item_id: &ItemId) -> EngineResult<Option<f64>> {
        let Some(item) = self.stores.catalog.item(item_id).await? else {
            debug!(user = %user.short(), item = %item_id, "Unknown item ignored");
            return Ok(None);
        };
        if !item.effect.applies_to(attempt.feature.kind) {
            debug!(user = %user.short(), item = %item_id, "Item does not apply");
            return Ok(None);
        }
        if self.stores.inventory.quantity(user, item_id).await? < 1 {
            debug!(user = %user.short(), item = %item_id, "Item not held");
            return Ok(None);
        }
        let bonus = if item.effect_value.is_finite() && item.effect_value > 0.0 {
            item.effect_value
        } else {
            self.config.default_item_bonus
        };
        Ok(Some(bonus))
    }

    /// Success probability after modifiers.
    pub fn final_rate(&self, base_rate: f64, skill_quality: f64, item_bonus: f64) -> f64 {
        (base_rate + skill_quality * self.config.skill_weight + item_bonus).clamp(0.0, self.config.rate_cap)
    }

    fn catch_resolution(
        &self,
        attempt: &Attempt,
        now: DateTime<Utc>,
        skill_quality: f64,
        item_id: Option<ItemId>,
        item_bonus: f64,
        roll: f64,
    ) -> CatchResolution {
        let final_rate = self.final_rate(attempt.base_rate, skill_quality, item_bonus);
        let caught = roll < final_rate;
        let resolution = AttemptResolution::new(
            attempt,
            if caught { Resolution::Caught } else { Resolution::Missed },
            now,
            AppliedModifiers::Catch {
                skill_quality,
                item_id: item_id.clone(),
                item_bonus,
                final_rate,
                roll,
            },
        );
        CatchResolution { item_id, final_rate, caught, resolution }
    }

    /// Resolve a pending catch attempt.
    pub async fn resolve_attempt(
        &self,
        user: UserId,
        attempt_id: AttemptId,
        skill_quality: f64,
        item_id: Option<ItemId>,
    ) -> EngineResult<ResolvedAttempt> {
        if !skill_quality.is_finite() || !(0.0..=1.0).contains(&skill_quality) {
            return Err(EngineError::InvalidSkillQuality(skill_quality));
        }

        let attempt = self
            .stores
            .attempts
            .attempt(attempt_id)
            .await?
            .filter(|a| a.user_id == user)
            .ok_or(EngineError::NotFound(attempt_id))?;

        match attempt.resolution {
            Resolution::Pending => {}
            Resolution::Fled => return Err(EngineError::TimedOut(attempt_id)),
            _ => return Err(EngineError::AlreadyResolved(attempt_id)),
        }
        if attempt.feature.kind != FeatureKind::Spawn {
            return Err(EngineError::UnsupportedFeature(attempt.feature.kind));
        }

        let now = self.clock.now();
        if self.is_stale(&attempt, now) {
            if !self.expire(&attempt, now).await? {
                return Err(self.not_pending_error(attempt_id).await);
            }
            return Ok(ResolvedAttempt {
                attempt_id,
                resolution: Resolution::Fled,
                rewards: Rewards::default(),
                final_rate: None,
                item_consumed: false,
            });
        }

        let (applied_item, item_bonus) = match &item_id {
            Some(id) => match self.item_bonus(user, &attempt, id).await? {
                Some(bonus) => (Some(id.clone()), bonus),
                None => (None, 0.0),
            },
            None => (None, 0.0),
        };

        let roll = self.roll();
        let mut catch = self.catch_resolution(&attempt, now, skill_quality, applied_item, item_bonus, roll);

        // The bonus is committed only together with the unit it spends
        let mut item_consumed = false;
        let won = match catch.item_id.clone() {
            Some(item) => match self
                .stores
                .attempts
                .resolve_consuming(attempt_id, catch.resolution.clone(), &item)
                .await?
            {
                ConsumingResolve::Resolved => {
                    item_consumed = true;
                    true
                }
                ConsumingResolve::NotPending => false,
                ConsumingResolve::ItemMissing => {
                    debug!(user = %user.short(), item = %item, "Item gone before commit, resolving without bonus");
                    catch = self.catch_resolution(&attempt, now, skill_quality, None, 0.0, roll);
                    self.stores
                        .attempts
                        .resolve_if_pending(attempt_id, catch.resolution.clone())
                        .await?
                }
            },
            None => {
                self.stores
                    .attempts
                    .resolve_if_pending(attempt_id, catch.resolution.clone())
                    .await?
            }
        };
        if !won {
            debug!(user = %user.short(), attempt = %attempt_id, "Lost resolve race");
            return Err(self.not_pending_error(attempt_id).await);
        }

        // Resolution is committed; everything below is best-effort.
        let CatchResolution { final_rate, caught, resolution, .. } = catch;
        let digest = resolution.digest_hex();

        let mut rewards = Rewards::default();
        if caught {
            rewards.first_of_kind = match self.stores.progress.record_catch(user, &attempt.feature.category).await {
                Ok(prior) => prior == 0,
                Err(e) => {
                    warn!(user = %user.short(), category = %attempt.feature.category, "Collection ledger update failed: {}", e);
                    false
                }
            };
            rewards.xp_gained = catch_xp(attempt.feature.rarity, rewards.first_of_kind);

            match self.stores.catalog.remove_spawn(attempt.feature_id).await {
                Ok(true) => {}
                Ok(false) => debug!(feature = %attempt.feature_id, "Spawn already removed"),
                Err(e) => warn!(feature = %attempt.feature_id, "Spawn removal failed: {}", e),
            }
        } else {
            rewards.xp_gained = MISSED_ATTEMPT_XP;
        }
        let rewards = self.credit_xp(user, rewards).await;

        info!(
            user = %user.short(),
            attempt = %attempt_id,
            caught,
            final_rate,
            roll,
            xp = rewards.xp_gained,
            "Attempt resolved"
        );
        self.stores.audit.emit(AuditEvent::catch_outcome(
            user,
            now,
            attempt_id,
            caught,
            final_rate,
            roll,
            rewards.xp_gained,
            digest,
        ));

        Ok(ResolvedAttempt {
            attempt_id,
            resolution: if caught { Resolution::Caught } else { Resolution::Missed },
            rewards,
            final_rate: Some(final_rate),
            item_consumed,
        })
    }

    // -------------------------------------------------------------------------
    // Visit
    // -------------------------------------------------------------------------

    /// Write the visit attempt and its loot roll.
    async fn record_visit(&self, attempt: &Attempt, now: DateTime<Utc>) -> EngineResult<Vec<LootDraw>> {
        self.insert_pending(attempt, now).await?;

        let draws = self.roll_visit_loot();
        let resolution = AttemptResolution::new(
            attempt,
            Resolution::Interacted,
            now,
            AppliedModifiers::Loot { draws: draws.clone() },
        );
        if !self.stores.attempts.resolve_if_pending(attempt.id, resolution).await? {
            return Err(EngineError::AlreadyResolved(attempt.id));
        }
        Ok(draws)
    }

    /// Hand back a cooldown claimed by a visit that did not complete.
    async fn release_cooldown(
        &self,
        user: UserId,
        feature: FeatureId,
        claimed_at: DateTime<Utc>,
        previous: Option<DateTime<Utc>>,
    ) {
        match self.stores.cooldowns.release(user, feature, claimed_at, previous).await {
            Ok(true) => debug!(user = %user.short(), feature = %feature, "Cooldown released"),
            Ok(false) => debug!(user = %user.short(), feature = %feature, "Cooldown already re-stamped"),
            Err(e) => warn!(user = %user.short(), feature = %feature, "Cooldown release failed: {}", e),
        }
    }

    /// Visit a point of interest.
    pub async fn interact(&self, user: UserId, feature_id: FeatureId, position: Coordinate) -> EngineResult<InteractOutcome> {
        position.validate()?;
        let now = self.clock.now();

        let feature = self.live_feature(feature_id, FeatureKind::PointOfInterest, now).await?;
        self.check_range(user, &feature, position)?;
        self.require_plausible(user, position, now).await?;

        let window = self.config.cooldown_window;
        let previous = match self.stores.cooldowns.claim(user, feature_id, now, window).await? {
            CooldownClaim::Claimed { previous } => previous,
            CooldownClaim::OnCooldown { last_interaction_at } => {
                let next_available_at = last_interaction_at + window;
                debug!(user = %user.short(), feature = %feature_id, %next_available_at, "On cooldown");
                return Err(EngineError::OnCooldown { next_available_at });
            }
        };

        let attempt = Attempt::open(user, &feature, now);
        let draws = match self.record_visit(&attempt, now).await {
            Ok(draws) => draws,
            Err(e) => {
                self.release_cooldown(user, feature_id, now, previous).await;
                return Err(e);
            }
        };

        let mut rewards = Rewards {
            xp_gained: SITE_VISIT_XP + draws.iter().map(|d| d.tier.bonus_xp()).sum::<u64>(),
            ..Default::default()
        };
        for grant in merge_grants(&draws) {
            match self.stores.inventory.add_items(user, &grant.item_id, grant.quantity).await {
                Ok(_) => rewards.items.push(grant),
                Err(e) => warn!(user = %user.short(), item = %grant.item_id, "Loot grant failed: {}", e),
            }
        }
        let rewards = self.credit_xp(user, rewards).await;

        let sites_visited = match self.stores.progress.record_site_visit(user).await {
            Ok(count) => Some(count),
            Err(e) => {
                warn!(user = %user.short(), "Site visit counter failed: {}", e);
                None
            }
        };

        info!(
            user = %user.short(),
            feature = %feature_id,
            draws = draws.len(),
            xp = rewards.xp_gained,
            "Site visited"
        );
        self.stores.audit.emit(AuditEvent::poi_interacted(
            user,
            now,
            feature_id,
            draws.len() as u32,
            rewards.xp_gained,
        ));

        Ok(InteractOutcome {
            attempt_id: attempt.id,
            rewards,
            draws,
            next_available_at: now + window,
            sites_visited,
        })
    }

    // -------------------------------------------------------------------------
    // Check-in
    // -------------------------------------------------------------------------

    /// Check in at a mission waypoint.
    pub async fn visit_waypoint(&self, user: UserId, feature_id: FeatureId, position: Coordinate) -> EngineResult<WaypointVisit> {
        position.validate()?;
        let now = self.clock.now();

        let feature = self.live_feature(feature_id, FeatureKind::MissionWaypoint, now).await?;
        self.check_range(user, &feature, position)?;
        self.require_plausible(user, position, now).await?;

        let first_visit = self.stores.progress.record_waypoint_visit(user, feature_id, now).await?;

        info!(user = %user.short(), feature = %feature_id, first_visit, "Waypoint visited");
        self.stores
            .audit
            .emit(AuditEvent::waypoint_visited(user, now, feature_id, first_visit));

        Ok(WaypointVisit { visited_at: now, first_visit })
    }

    // -------------------------------------------------------------------------
    // Tracking and discovery
    // -------------------------------------------------------------------------

    /// Validate a tracking fix and feed it to `evaluator`.
    pub async fn report_fix(
        &self,
        evaluator: &GeofenceEvaluator,
        user: UserId,
        feature_id: FeatureId,
        position: Coordinate,
        accuracy_meters: f64,
    ) -> EngineResult<GeofenceReport> {
        let now = self.clock.now();
        let fix = LocationFix::new(position, accuracy_meters, now);
        fix.validate()?;

        let feature = self
            .stores
            .catalog
            .feature(feature_id)
            .await?
            .ok_or(EngineError::FeatureNotFound(feature_id))?;
        if feature.is_expired(now) {
            return Err(EngineError::FeatureExpired(feature_id));
        }

        self.movement.require_plausible(user, fix).await?;
        evaluator.report(user, &feature, &fix)
    }

    /// Live features within `radius_meters` (default from config), nearest first.
    pub async fn nearby(&self, user: UserId, position: Coordinate, radius_meters: Option<f64>) -> EngineResult<Vec<NearbyFeature>> {
        position.validate()?;
        let now = self.clock.now();
        let radius = match radius_meters {
            Some(r) if r.is_finite() && r > 0.0 => r.min(MAX_NEARBY_RADIUS_METERS),
            _ => self.config.nearby_radius_meters,
        };

        self.require_plausible(user, position, now).await?;

        let candidates = self.stores.catalog.features_near(position, radius).await?;
        let mut nearby = Vec::with_capacity(candidates.len());
        for feature in candidates {
            if feature.is_expired(now) {
                continue;
            }
            let distance = feature.distance_from(position)?;
            if distance > radius {
                continue;
            }
            let bearing = bearing_degrees(position, feature.center)?;
            nearby.push(NearbyFeature {
                feature,
                distance_meters: distance,
                bearing_degrees: bearing,
            });
        }
        nearby.sort_by(|a, b| a.distance_meters.total_cmp(&b.distance_meters));

        debug!(user = %user.short(), radius_m = radius, found = nearby.len(), "Nearby query");
        Ok(nearby)
    }

    /// Expire up to `limit` pending attempts past the timeout. Returns how
    /// many this call expired.
    pub async fn sweep_stale(&self, limit: usize) -> EngineResult<usize> {
        let now = self.clock.now();
        let cutoff = now - self.config.attempt_timeout;
        let stale = self.stores.attempts.pending_started_before(cutoff, limit).await?;

        let mut expired = 0;
        for attempt in &stale {
            if self.expire(attempt, now).await? {
                expired += 1;
            }
        }
        if expired > 0 {
            info!(expired, "Swept stale attempts");
        }
        Ok(expired)
    }
}
