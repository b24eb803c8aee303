//! Storage Contracts
//!
//! The engine's external collaborators as async traits. Every mutation that
//! can race across processes is a single conditional primitive here, never a
//! read followed by a write in the caller:
//!
//! - pending attempt insert fails on an existing pending row
//! - attempt resolution is a compare-and-swap on the pending state, and can
//!   spend an item unit in the same unit of work
//! - inventory decrement only succeeds while quantity is positive
//! - spawn removal is delete-if-exists
//! - cooldown claim checks and stamps in one step; release only restores the
//!   stamp it placed
//! - last fix replacement is monotonic in `observed_at`
//!
//! [`MemoryStore`] implements all of them in-process.

pub mod audit;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::core::geo::Coordinate;
use crate::game::attempt::{Attempt, AttemptResolution};
use crate::game::events::AuditEvent;
use crate::game::feature::{GeofenceFeature, ItemDefinition};
use crate::game::ids::{AttemptId, FeatureId, ItemId, UserId};
use crate::game::movement::LocationFix;

pub use audit::{ChannelAuditSink, TracingAuditSink};
pub use memory::MemoryStore;

/// Storage errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A uniqueness or conditional constraint rejected the write.
    #[error("conflicting row")]
    Conflict,

    /// Backend unreachable or failed.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Result alias for storage calls.
pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// CATALOG
// =============================================================================

/// Read-only content catalog plus spawn removal.
#[async_trait]
pub trait FeatureCatalog: Send + Sync {
    /// Look up a feature.
    async fn feature(&self, id: FeatureId) -> StoreResult<Option<GeofenceFeature>>;

    /// Candidate features near `center`. May over-select; callers apply the
    /// exact distance filter.
    async fn features_near(&self, center: Coordinate, radius_meters: f64) -> StoreResult<Vec<GeofenceFeature>>;

    /// Look up an item definition.
    async fn item(&self, id: &ItemId) -> StoreResult<Option<ItemDefinition>>;

    /// Delete a spawn if it still exists. Returns whether this call removed it.
    async fn remove_spawn(&self, id: FeatureId) -> StoreResult<bool>;
}

// =============================================================================
// LAST KNOWN FIX
// =============================================================================

/// Last accepted fix per user.
#[async_trait]
pub trait FixStore: Send + Sync {
    /// Last accepted fix.
    async fn last_fix(&self, user: UserId) -> StoreResult<Option<LocationFix>>;

    /// Replace the stored fix unless the stored one is newer.
    /// Returns whether the write happened.
    async fn record_fix(&self, user: UserId, fix: LocationFix) -> StoreResult<bool>;
}

// =============================================================================
// ATTEMPTS
// =============================================================================

/// Outcome of [`AttemptStore::resolve_consuming`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumingResolve {
    /// Resolution applied and one unit removed.
    Resolved,
    /// Attempt missing or already terminal. Nothing written.
    NotPending,
    /// The user holds no unit of the item. Nothing written.
    ItemMissing,
}

/// Attempt rows.
#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Insert a pending attempt. Fails with [`StoreError::Conflict`] when the
    /// user already has a pending attempt on the same feature.
    async fn insert_pending(&self, attempt: Attempt) -> StoreResult<()>;

    /// Look up an attempt.
    async fn attempt(&self, id: AttemptId) -> StoreResult<Option<Attempt>>;

    /// The user's pending attempt on a feature, if any.
    async fn pending_for(&self, user: UserId, feature: FeatureId) -> StoreResult<Option<Attempt>>;

    /// Apply `resolution` only if the attempt is still pending.
    /// Returns whether this call won.
    async fn resolve_if_pending(&self, id: AttemptId, resolution: AttemptResolution) -> StoreResult<bool>;

    /// Apply `resolution` and remove one unit of `item` from the attempt's
    /// owner as one unit of work. Writes nothing unless the attempt is still
    /// pending and a unit is held.
    async fn resolve_consuming(
        &self,
        id: AttemptId,
        resolution: AttemptResolution,
        item: &ItemId,
    ) -> StoreResult<ConsumingResolve>;

    /// Pending attempts opened before `cutoff`, oldest first, at most `limit`.
    async fn pending_started_before(&self, cutoff: DateTime<Utc>, limit: usize) -> StoreResult<Vec<Attempt>>;
}

// =============================================================================
// INVENTORY
// =============================================================================

/// Per-user item stacks.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Units held.
    async fn quantity(&self, user: UserId, item: &ItemId) -> StoreResult<u32>;

    /// Remove one unit if at least one is held. Returns whether a unit was removed.
    async fn decrement_if_positive(&self, user: UserId, item: &ItemId) -> StoreResult<bool>;

    /// Add units, creating the stack if missing. Returns the new quantity.
    async fn add_items(&self, user: UserId, item: &ItemId, quantity: u32) -> StoreResult<u32>;
}

// =============================================================================
// COOLDOWNS
// =============================================================================

/// Outcome of a cooldown claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownClaim {
    /// Window elapsed (or no record); `last_interaction_at` is now stamped.
    Claimed {
        /// Stamp replaced by this claim.
        previous: Option<DateTime<Utc>>,
    },
    /// Window still running.
    OnCooldown {
        /// Stored last interaction.
        last_interaction_at: DateTime<Utc>,
    },
}

/// Cooldown records per (user, feature).
#[async_trait]
pub trait CooldownStore: Send + Sync {
    /// Stamp `now` as the last interaction if `window` has elapsed since the
    /// stored one. Check and stamp happen atomically.
    async fn claim(
        &self,
        user: UserId,
        feature: FeatureId,
        now: DateTime<Utc>,
        window: Duration,
    ) -> StoreResult<CooldownClaim>;

    /// Undo a claim: put `previous` back if the stored stamp is still
    /// `claimed_at`. Returns whether it was restored.
    async fn release(
        &self,
        user: UserId,
        feature: FeatureId,
        claimed_at: DateTime<Utc>,
        previous: Option<DateTime<Utc>>,
    ) -> StoreResult<bool>;

    /// Stored last interaction.
    async fn last_interaction(&self, user: UserId, feature: FeatureId) -> StoreResult<Option<DateTime<Utc>>>;
}

// =============================================================================
// PROGRESS LEDGER
// =============================================================================

/// Experience, collection and visit ledgers.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Credit XP. Returns the new total.
    async fn grant_xp(&self, user: UserId, amount: u64) -> StoreResult<u64>;

    /// Current XP total.
    async fn experience(&self, user: UserId) -> StoreResult<u64>;

    /// Increment the catch count for a category. Returns the count before the
    /// increment, so 0 means first of kind.
    async fn record_catch(&self, user: UserId, category: &str) -> StoreResult<u32>;

    /// Increment the sites-visited counter. Returns the new count.
    async fn record_site_visit(&self, user: UserId) -> StoreResult<u32>;

    /// Record a waypoint check-in. Returns whether it was the first.
    async fn record_waypoint_visit(&self, user: UserId, feature: FeatureId, at: DateTime<Utc>) -> StoreResult<bool>;
}

// =============================================================================
// AUDIT
// =============================================================================

/// Fire-and-forget audit sink. Implementations must not block and must
/// swallow their own failures.
pub trait AuditSink: Send + Sync {
    /// Append an event.
    fn emit(&self, event: AuditEvent);
}

// =============================================================================
// BUNDLE
// =============================================================================

/// Every collaborator the engine needs.
#[derive(Clone)]
pub struct Stores {
    /// Content catalog.
    pub catalog: Arc<dyn FeatureCatalog>,
    /// Last known fixes.
    pub fixes: Arc<dyn FixStore>,
    /// Attempt rows.
    pub attempts: Arc<dyn AttemptStore>,
    /// Inventory.
    pub inventory: Arc<dyn InventoryStore>,
    /// Cooldown records.
    pub cooldowns: Arc<dyn CooldownStore>,
    /// Progress ledger.
    pub progress: Arc<dyn ProgressStore>,
    /// Audit sink.
    pub audit: Arc<dyn AuditSink>,
}

impl Stores {
    /// Back every collaborator with one in-memory store.
    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            catalog: store.clone(),
            fixes: store.clone(),
            attempts: store.clone(),
            inventory: store.clone(),
            cooldowns: store.clone(),
            progress: store.clone(),
            audit: store,
        }
    }
}
