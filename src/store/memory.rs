//! In-Memory Store
//!
//! Reference implementation of every storage contract. Each conditional
//! primitive holds its table's write lock across the check and the write,
//! which gives the same single-winner guarantee a row lock or unique index
//! gives a relational backend.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::core::geo::{within_radius, Coordinate};
use crate::game::attempt::{Attempt, AttemptResolution};
use crate::game::events::AuditEvent;
use crate::game::feature::{FeatureKind, GeofenceFeature, ItemDefinition};
use crate::game::ids::{AttemptId, FeatureId, ItemId, UserId};
use crate::game::movement::LocationFix;
use crate::store::audit::trace_event;
use crate::store::{
    AttemptStore, AuditSink, ConsumingResolve, CooldownClaim, CooldownStore, FeatureCatalog, FixStore,
    InventoryStore, ProgressStore, StoreError, StoreResult,
};

/// Attempt rows plus the pending uniqueness index, guarded together.
#[derive(Default)]
struct AttemptTable {
    rows: BTreeMap<AttemptId, Attempt>,
    pending: BTreeMap<(UserId, FeatureId), AttemptId>,
}

/// Per-user ledger.
#[derive(Debug, Default, Clone)]
struct Progress {
    experience: u64,
    catches: BTreeMap<String, u32>,
    sites_visited: u32,
    waypoints: BTreeMap<FeatureId, DateTime<Utc>>,
}

/// In-memory implementation of all storage traits.
#[derive(Default)]
pub struct MemoryStore {
    features: RwLock<BTreeMap<FeatureId, GeofenceFeature>>,
    items: RwLock<BTreeMap<ItemId, ItemDefinition>>,
    fixes: RwLock<BTreeMap<UserId, LocationFix>>,
    attempts: RwLock<AttemptTable>,
    inventory: RwLock<BTreeMap<(UserId, ItemId), u32>>,
    cooldowns: RwLock<BTreeMap<(UserId, FeatureId), DateTime<Utc>>>,
    progress: RwLock<BTreeMap<UserId, Progress>>,
    audit: Mutex<Vec<AuditEvent>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a catalog feature.
    pub async fn insert_feature(&self, feature: GeofenceFeature) {
        self.features.write().await.insert(feature.id, feature);
    }

    /// Add or replace an item definition.
    pub async fn insert_item(&self, item: ItemDefinition) {
        self.items.write().await.insert(item.id.clone(), item);
    }

    /// Set a stack size directly.
    pub async fn set_inventory(&self, user: UserId, item: ItemId, quantity: u32) {
        self.inventory.write().await.insert((user, item), quantity);
    }

    /// Set the last interaction directly.
    pub async fn set_last_interaction(&self, user: UserId, feature: FeatureId, at: DateTime<Utc>) {
        self.cooldowns.write().await.insert((user, feature), at);
    }

    /// Catches recorded for a category.
    pub async fn catch_count(&self, user: UserId, category: &str) -> u32 {
        self.progress
            .read()
            .await
            .get(&user)
            .and_then(|p| p.catches.get(category).copied())
            .unwrap_or(0)
    }

    /// Sites visited by a user.
    pub async fn sites_visited(&self, user: UserId) -> u32 {
        self.progress.read().await.get(&user).map(|p| p.sites_visited).unwrap_or(0)
    }

    /// Number of attempt rows.
    pub async fn attempt_count(&self) -> usize {
        self.attempts.read().await.rows.len()
    }

    /// Snapshot of emitted audit events.
    pub fn audit_events(&self) -> Vec<AuditEvent> {
        self.audit.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl FeatureCatalog for MemoryStore {
    async fn feature(&self, id: FeatureId) -> StoreResult<Option<GeofenceFeature>> {
        Ok(self.features.read().await.get(&id).cloned())
    }

    async fn features_near(&self, center: Coordinate, radius_meters: f64) -> StoreResult<Vec<GeofenceFeature>> {
        let features = self.features.read().await;
        Ok(features
            .values()
            .filter(|f| within_radius(f.center, center, radius_meters).unwrap_or(false))
            .cloned()
            .collect())
    }

    async fn item(&self, id: &ItemId) -> StoreResult<Option<ItemDefinition>> {
        Ok(self.items.read().await.get(id).cloned())
    }

    async fn remove_spawn(&self, id: FeatureId) -> StoreResult<bool> {
        let mut features = self.features.write().await;
        match features.get(&id) {
            Some(f) if f.kind == FeatureKind::Spawn => Ok(features.remove(&id).is_some()),
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl FixStore for MemoryStore {
    async fn last_fix(&self, user: UserId) -> StoreResult<Option<LocationFix>> {
        Ok(self.fixes.read().await.get(&user).copied())
    }

    async fn record_fix(&self, user: UserId, fix: LocationFix) -> StoreResult<bool> {
        let mut fixes = self.fixes.write().await;
        match fixes.get(&user) {
            Some(stored) if stored.observed_at > fix.observed_at => Ok(false),
            _ => {
                fixes.insert(user, fix);
                Ok(true)
            }
        }
    }
}

#[async_trait]
impl AttemptStore for MemoryStore {
    async fn insert_pending(&self, attempt: Attempt) -> StoreResult<()> {
        let mut table = self.attempts.write().await;
        let key = (attempt.user_id, attempt.feature_id);
        if table.pending.contains_key(&key) {
            return Err(StoreError::Conflict);
        }
        table.pending.insert(key, attempt.id);
        table.rows.insert(attempt.id, attempt);
        Ok(())
    }

    async fn attempt(&self, id: AttemptId) -> StoreResult<Option<Attempt>> {
        Ok(self.attempts.read().await.rows.get(&id).cloned())
    }

    async fn pending_for(&self, user: UserId, feature: FeatureId) -> StoreResult<Option<Attempt>> {
        let table = self.attempts.read().await;
        Ok(table
            .pending
            .get(&(user, feature))
            .and_then(|id| table.rows.get(id))
            .cloned())
    }

    async fn resolve_if_pending(&self, id: AttemptId, resolution: AttemptResolution) -> StoreResult<bool> {
        let mut table = self.attempts.write().await;
        let Some(row) = table.rows.get_mut(&id) else {
            return Ok(false);
        };
        if !row.is_pending() {
            return Ok(false);
        }
        row.apply(&resolution);
        let key = (row.user_id, row.feature_id);
        table.pending.remove(&key);
        Ok(true)
    }

    async fn resolve_consuming(
        &self,
        id: AttemptId,
        resolution: AttemptResolution,
        item: &ItemId,
    ) -> StoreResult<ConsumingResolve> {
        // Lock order: attempts, then inventory
        let mut table = self.attempts.write().await;
        let Some(row) = table.rows.get_mut(&id) else {
            return Ok(ConsumingResolve::NotPending);
        };
        if !row.is_pending() {
            return Ok(ConsumingResolve::NotPending);
        }
        let mut inventory = self.inventory.write().await;
        match inventory.get_mut(&(row.user_id, item.clone())) {
            Some(quantity) if *quantity > 0 => *quantity -= 1,
            _ => return Ok(ConsumingResolve::ItemMissing),
        }
        row.apply(&resolution);
        let key = (row.user_id, row.feature_id);
        table.pending.remove(&key);
        Ok(ConsumingResolve::Resolved)
    }

    async fn pending_started_before(&self, cutoff: DateTime<Utc>, limit: usize) -> StoreResult<Vec<Attempt>> {
        let table = self.attempts.read().await;
        let mut stale: Vec<Attempt> = table
            .pending
            .values()
            .filter_map(|id| table.rows.get(id))
            .filter(|a| a.started_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|a| a.started_at);
        stale.truncate(limit);
        Ok(stale)
    }
}

#[async_trait]
impl InventoryStore for MemoryStore {
    async fn quantity(&self, user: UserId, item: &ItemId) -> StoreResult<u32> {
        Ok(self
            .inventory
            .read()
            .await
            .get(&(user, item.clone()))
            .copied()
            .unwrap_or(0))
    }

    async fn decrement_if_positive(&self, user: UserId, item: &ItemId) -> StoreResult<bool> {
        let mut inventory = self.inventory.write().await;
        match inventory.get_mut(&(user, item.clone())) {
            Some(quantity) if *quantity > 0 => {
                *quantity -= 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn add_items(&self, user: UserId, item: &ItemId, quantity: u32) -> StoreResult<u32> {
        let mut inventory = self.inventory.write().await;
        let stack = inventory.entry((user, item.clone())).or_insert(0);
        *stack = stack.saturating_add(quantity);
        Ok(*stack)
    }
}

#[async_trait]
impl CooldownStore for MemoryStore {
    async fn claim(
        &self,
        user: UserId,
        feature: FeatureId,
        now: DateTime<Utc>,
        window: Duration,
    ) -> StoreResult<CooldownClaim> {
        let mut cooldowns = self.cooldowns.write().await;
        let previous = cooldowns.get(&(user, feature)).copied();
        if let Some(last) = previous {
            if now - last < window {
                return Ok(CooldownClaim::OnCooldown { last_interaction_at: last });
            }
        }
        cooldowns.insert((user, feature), now);
        Ok(CooldownClaim::Claimed { previous })
    }

    async fn release(
        &self,
        user: UserId,
        feature: FeatureId,
        claimed_at: DateTime<Utc>,
        previous: Option<DateTime<Utc>>,
    ) -> StoreResult<bool> {
        let mut cooldowns = self.cooldowns.write().await;
        if cooldowns.get(&(user, feature)) != Some(&claimed_at) {
            return Ok(false);
        }
        match previous {
            Some(at) => cooldowns.insert((user, feature), at),
            None => cooldowns.remove(&(user, feature)),
        };
        Ok(true)
    }

    async fn last_interaction(&self, user: UserId, feature: FeatureId) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(self.cooldowns.read().await.get(&(user, feature)).copied())
    }
}

#[async_trait]
impl ProgressStore for MemoryStore {
    async fn grant_xp(&self, user: UserId, amount: u64) -> StoreResult<u64> {
        let mut progress = self.progress.write().await;
        let entry = progress.entry(user).or_default();
        entry.experience = entry.experience.saturating_add(amount);
        Ok(entry.experience)
    }

    async fn experience(&self, user: UserId) -> StoreResult<u64> {
        Ok(self.progress.read().await.get(&user).map(|p| p.experience).unwrap_or(0))
    }

    async fn record_catch(&self, user: UserId, category: &str) -> StoreResult<u32> {
        let mut progress = self.progress.write().await;
        let count = progress
            .entry(user)
            .or_default()
            .catches
            .entry(category.to_string())
            .or_insert(0);
        let prior = *count;
        *count += 1;
        Ok(prior)
    }

    async fn record_site_visit(&self, user: UserId) -> StoreResult<u32> {
        let mut progress = self.progress.write().await;
        let entry = progress.entry(user).or_default();
        entry.sites_visited += 1;
        Ok(entry.sites_visited)
    }

    async fn record_waypoint_visit(&self, user: UserId, feature: FeatureId, at: DateTime<Utc>) -> StoreResult<bool> {
        let mut progress = self.progress.write().await;
        let waypoints = &mut progress.entry(user).or_default().waypoints;
        if waypoints.contains_key(&feature) {
            return Ok(false);
        }
        waypoints.insert(feature, at);
        Ok(true)
    }
}

impl AuditSink for MemoryStore {
    fn emit(&self, event: AuditEvent) {
        trace_event(&event);
        self.audit.lock().unwrap_or_else(|e| e.into_inner()).push(event);
    }
}
