//! Encounter Engine
//!
//! Server-authoritative rules for location-gated play.
//!
//! ## Module Structure
//!
//! - `ids`: User, feature, attempt and item identifiers
//! - `feature`: Geofenced features, rarity tiers, item definitions
//! - `movement`: Location fixes and the speed plausibility check
//! - `geofence`: Smoothed enter/exit tracking with subscriptions
//! - `attempt`: Attempt records and resolution digests
//! - `resolver`: Open/resolve, visits, check-ins, nearby, stale sweep
//! - `rewards`: XP tiers and the level curve
//! - `loot`: Weighted loot table for visits
//! - `events`: Audit events
//! - `error`: Engine error taxonomy

pub mod attempt;
pub mod error;
pub mod events;
pub mod feature;
pub mod geofence;
pub mod ids;
pub mod loot;
pub mod movement;
pub mod resolver;
pub mod rewards;

// Re-export key types
pub use attempt::{AppliedModifiers, Attempt, AttemptResolution, Outcome, Resolution};
pub use error::{EngineError, EngineResult, ErrorClass};
pub use events::{AuditEvent, AuditEventData, Severity};
pub use feature::{FeatureKind, GeofenceFeature, ItemDefinition, ItemEffect, Rarity};
pub use geofence::{
    GeofenceConfig, GeofenceEvaluator, GeofenceReport, GeofenceTransition, SubscriptionScope, TransitionKind,
};
pub use ids::{AttemptId, FeatureId, ItemId, UserId};
pub use movement::{LocationFix, MovementConfig, MovementValidator, MovementVerdict};
pub use resolver::{EncounterResolver, InteractOutcome, NearbyFeature, OpenedAttempt, ResolvedAttempt, ResolverConfig, WaypointVisit};
pub use rewards::{ItemGrant, Rewards};
