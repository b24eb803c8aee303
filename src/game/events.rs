//! Audit Events
//!
//! Security-relevant events emitted by the engine for fraud review. Emission
//! is fire-and-forget: a sink failure never fails the operation that raised
//! the event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::game::attempt::Resolution;
use crate::game::ids::{AttemptId, FeatureId, UserId};

/// Severity of an audit event.
///
/// Lower value = less urgent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Severity {
    /// Routine activity
    Info = 0,
    /// Unusual but not conclusive
    Warning = 1,
    /// Likely cheating
    High = 2,
}

/// Audit event payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEventData {
    /// Fix implied a speed above the plausibility cap
    ImpossibleMovement {
        /// Distance from the last accepted fix (m)
        distance_meters: f64,
        /// Time since the last accepted fix (s)
        elapsed_seconds: f64,
        /// Distance over elapsed time (m/s)
        implied_speed_mps: f64,
        /// Farthest plausible travel in the elapsed time (m)
        max_possible_meters: f64,
    },

    /// Attempt opened against a spawn
    EncounterStarted {
        /// New attempt
        attempt_id: AttemptId,
        /// Target spawn
        feature_id: FeatureId,
        /// Measured distance at open (m)
        distance_meters: f64,
        /// Rarity-derived starting rate
        base_rate: f64,
    },

    /// Catch succeeded
    CatchSuccess {
        /// Resolved attempt
        attempt_id: AttemptId,
        /// Clamped success probability
        final_rate: f64,
        /// Server roll in `[0, 1)`
        roll: f64,
        /// XP credited
        xp_gained: u64,
        /// Resolution digest (hex)
        digest: String,
    },

    /// Catch failed
    CatchFailed {
        /// Resolved attempt
        attempt_id: AttemptId,
        /// Clamped success probability
        final_rate: f64,
        /// Server roll in `[0, 1)`
        roll: f64,
        /// XP credited
        xp_gained: u64,
        /// Resolution digest (hex)
        digest: String,
    },

    /// Point of interest visited
    PoiInteracted {
        /// Site visited
        feature_id: FeatureId,
        /// Loot draws rolled
        draws: u32,
        /// XP credited, loot bonus included
        xp_gained: u64,
    },

    /// Mission waypoint checked in
    WaypointVisited {
        /// Waypoint
        feature_id: FeatureId,
        /// First check-in by this user
        first_visit: bool,
    },

    /// Pending attempt expired
    AttemptExpired {
        /// Expired attempt
        attempt_id: AttemptId,
        /// Terminal state written
        resolution: Resolution,
        /// Age at expiry (s)
        elapsed_seconds: f64,
    },
}

impl AuditEventData {
    /// Stable event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            AuditEventData::ImpossibleMovement { .. } => "impossible_movement",
            AuditEventData::EncounterStarted { .. } => "encounter_started",
            AuditEventData::CatchSuccess { .. } => "catch_success",
            AuditEventData::CatchFailed { .. } => "catch_failed",
            AuditEventData::PoiInteracted { .. } => "poi_interacted",
            AuditEventData::WaypointVisited { .. } => "waypoint_visited",
            AuditEventData::AttemptExpired { .. } => "attempt_expired",
        }
    }
}

/// An audit event with owner, time and severity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// User the event concerns
    pub user_id: UserId,

    /// Server time of emission
    pub at: DateTime<Utc>,

    /// Review urgency
    pub severity: Severity,

    /// Event data
    pub data: AuditEventData,
}

impl AuditEvent {
    /// Create a new event.
    pub fn new(user_id: UserId, at: DateTime<Utc>, severity: Severity, data: AuditEventData) -> Self {
        Self { user_id, at, severity, data }
    }

    /// Create impossible movement event.
    pub fn impossible_movement(
        user_id: UserId,
        at: DateTime<Utc>,
        distance_meters: f64,
        elapsed_seconds: f64,
        max_speed_mps: f64,
    ) -> Self {
        Self::new(
            user_id,
            at,
            Severity::High,
            AuditEventData::ImpossibleMovement {
                distance_meters,
                elapsed_seconds,
                implied_speed_mps: distance_meters / elapsed_seconds,
                max_possible_meters: elapsed_seconds * max_speed_mps,
            },
        )
    }

    /// Create encounter started event.
    pub fn encounter_started(
        user_id: UserId,
        at: DateTime<Utc>,
        attempt_id: AttemptId,
        feature_id: FeatureId,
        distance_meters: f64,
        base_rate: f64,
    ) -> Self {
        Self::new(
            user_id,
            at,
            Severity::Info,
            AuditEventData::EncounterStarted { attempt_id, feature_id, distance_meters, base_rate },
        )
    }

    /// Create catch outcome event; `caught` picks success or failure.
    pub fn catch_outcome(
        user_id: UserId,
        at: DateTime<Utc>,
        attempt_id: AttemptId,
        caught: bool,
        final_rate: f64,
        roll: f64,
        xp_gained: u64,
        digest: String,
    ) -> Self {
        let data = if caught {
            AuditEventData::CatchSuccess { attempt_id, final_rate, roll, xp_gained, digest }
        } else {
            AuditEventData::CatchFailed { attempt_id, final_rate, roll, xp_gained, digest }
        };
        Self::new(user_id, at, Severity::Info, data)
    }

    /// Create point of interest visit event.
    pub fn poi_interacted(
        user_id: UserId,
        at: DateTime<Utc>,
        feature_id: FeatureId,
        draws: u32,
        xp_gained: u64,
    ) -> Self {
        Self::new(
            user_id,
            at,
            Severity::Info,
            AuditEventData::PoiInteracted { feature_id, draws, xp_gained },
        )
    }

    /// Create waypoint visit event.
    pub fn waypoint_visited(
        user_id: UserId,
        at: DateTime<Utc>,
        feature_id: FeatureId,
        first_visit: bool,
    ) -> Self {
        Self::new(
            user_id,
            at,
            Severity::Info,
            AuditEventData::WaypointVisited { feature_id, first_visit },
        )
    }

    /// Create attempt expired event.
    pub fn attempt_expired(
        user_id: UserId,
        at: DateTime<Utc>,
        attempt_id: AttemptId,
        elapsed_seconds: f64,
    ) -> Self {
        Self::new(
            user_id,
            at,
            Severity::Info,
            AuditEventData::AttemptExpired {
                attempt_id,
                resolution: Resolution::Fled,
                elapsed_seconds,
            },
        )
    }

    /// Stable event type name.
    pub fn event_type(&self) -> &'static str {
        self.data.event_type()
    }
}
