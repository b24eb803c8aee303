//! Movement Plausibility Validator
//!
//! Rejects fixes that imply superhuman travel since the user's last accepted
//! fix. This is a heuristic against naive spoofing, not an identity check:
//! a "plausible" verdict proves nothing about who sent the fix.
//!
//! Only accepted fixes are stored. A rejected fix leaves the stored fix
//! untouched and produces exactly one high-severity audit event.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::geo::{distance_meters, Coordinate};
use crate::game::error::{EngineError, EngineResult};
use crate::game::events::AuditEvent;
use crate::game::ids::UserId;
use crate::store::{AuditSink, FixStore};

/// A reported position with its accuracy and server observation time.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    /// Reported position.
    pub coordinate: Coordinate,
    /// Horizontal accuracy radius in meters, `>= 0`.
    pub accuracy_meters: f64,
    /// When the server observed the fix.
    pub observed_at: DateTime<Utc>,
}

impl LocationFix {
    /// Create a fix.
    pub fn new(coordinate: Coordinate, accuracy_meters: f64, observed_at: DateTime<Utc>) -> Self {
        Self { coordinate, accuracy_meters, observed_at }
    }

    /// Reject malformed coordinates and negative or non-finite accuracy.
    pub fn validate(&self) -> EngineResult<()> {
        self.coordinate.validate()?;
        if !self.accuracy_meters.is_finite() || self.accuracy_meters < 0.0 {
            return Err(EngineError::InvalidAccuracy(self.accuracy_meters));
        }
        Ok(())
    }
}

/// Movement validator configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct MovementConfig {
    /// Fastest plausible travel speed (m/s). 30 m/s is about 108 km/h.
    pub max_speed_mps: f64,
    /// Last fixes older than this are not compared against.
    pub staleness_window: Duration,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            max_speed_mps: 30.0,
            staleness_window: Duration::minutes(5),
        }
    }
}

/// Result of validating one fix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MovementVerdict {
    /// Accepted. `recorded` is false only when a newer fix was already stored.
    Plausible {
        /// Whether this fix became the stored last fix.
        recorded: bool,
    },
    /// Rejected; nothing was stored.
    Implausible {
        /// Speed implied by the two fixes (m/s).
        implied_speed: f64,
        /// Configured cap (m/s).
        max_allowed: f64,
        /// Distance between the fixes (m).
        distance_meters: f64,
        /// Seconds between the fixes.
        elapsed_seconds: f64,
    },
}

impl MovementVerdict {
    /// Whether the fix was accepted.
    pub fn is_plausible(&self) -> bool {
        matches!(self, MovementVerdict::Plausible { .. })
    }
}

/// Pure comparison of a new fix against the last one.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Assessment {
    /// No usable previous fix; accept without a speed check.
    Unchecked,
    /// Within the speed cap.
    WithinLimit,
    /// Over the speed cap.
    Exceeded {
        distance_meters: f64,
        elapsed_seconds: f64,
    },
}

/// Movement validator over a last-fix store.
pub struct MovementValidator {
    config: MovementConfig,
    fixes: Arc<dyn FixStore>,
    audit: Arc<dyn AuditSink>,
}

impl MovementValidator {
    /// Create a validator.
    pub fn new(config: MovementConfig, fixes: Arc<dyn FixStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self { config, fixes, audit }
    }

    /// Active configuration.
    pub fn config(&self) -> &MovementConfig {
        &self.config
    }

    fn assess(&self, last: Option<&LocationFix>, new: &LocationFix) -> EngineResult<Assessment> {
        let Some(last) = last else {
            return Ok(Assessment::Unchecked);
        };

        let elapsed = new.observed_at - last.observed_at;
        // Non-positive spans would divide by zero; stale ones say nothing.
        if elapsed <= Duration::zero() || elapsed > self.config.staleness_window {
            return Ok(Assessment::Unchecked);
        }

        let elapsed_seconds = elapsed.num_milliseconds() as f64 / 1000.0;
        let distance = distance_meters(last.coordinate, new.coordinate)?;
        let max_possible = elapsed_seconds * self.config.max_speed_mps;

        if distance > max_possible {
            Ok(Assessment::Exceeded { distance_meters: distance, elapsed_seconds })
        } else {
            Ok(Assessment::WithinLimit)
        }
    }

    /// Validate `fix` against the user's last accepted fix and store it if
    /// plausible.
    pub async fn validate_movement(&self, user: UserId, fix: LocationFix) -> EngineResult<MovementVerdict> {
        fix.validate()?;

        let last = self.fixes.last_fix(user).await?;
        match self.assess(last.as_ref(), &fix)? {
            Assessment::Exceeded { distance_meters, elapsed_seconds } => {
                let implied_speed = distance_meters / elapsed_seconds;
                warn!(
                    user = %user.short(),
                    distance_m = distance_meters,
                    elapsed_s = elapsed_seconds,
                    implied_speed,
                    "Implausible movement rejected"
                );
                self.audit.emit(AuditEvent::impossible_movement(
                    user,
                    fix.observed_at,
                    distance_meters,
                    elapsed_seconds,
                    self.config.max_speed_mps,
                ));
                Ok(MovementVerdict::Implausible {
                    implied_speed,
                    max_allowed: self.config.max_speed_mps,
                    distance_meters,
                    elapsed_seconds,
                })
            }
            Assessment::Unchecked | Assessment::WithinLimit => {
                let recorded = self.fixes.record_fix(user, fix).await?;
                if !recorded {
                    debug!(user = %user.short(), "Newer fix already stored, keeping it");
                }
                Ok(MovementVerdict::Plausible { recorded })
            }
        }
    }

    /// Like [`validate_movement`](Self::validate_movement) but maps an
    /// implausible verdict to [`EngineError::MovementRejected`].
    pub async fn require_plausible(&self, user: UserId, fix: LocationFix) -> EngineResult<()> {
        match self.validate_movement(user, fix).await? {
            MovementVerdict::Plausible { .. } => Ok(()),
            MovementVerdict::Implausible { implied_speed, max_allowed, .. } => {
                Err(EngineError::MovementRejected { implied_speed, max_allowed })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geo::north_of;
    use crate::game::events::{AuditEventData, Severity};
    use crate::store::MemoryStore;

    const START: Coordinate = Coordinate::new(40.4406, -79.9959);

    fn at(seconds: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(seconds)
    }

    fn validator(store: &Arc<MemoryStore>) -> MovementValidator {
        MovementValidator::new(MovementConfig::default(), store.clone(), store.clone())
    }

    #[tokio::test]
    async fn test_first_fix_is_plausible() {
        let store = Arc::new(MemoryStore::new());
        let validator = validator(&store);
        let user = UserId::new([1; 16]);

        let verdict = validator
            .validate_movement(user, LocationFix::new(START, 5.0, at(0)))
            .await
            .unwrap();
        assert_eq!(verdict, MovementVerdict::Plausible { recorded: true });
        assert_eq!(store.last_fix(user).await.unwrap().map(|f| f.coordinate), Some(START));
    }

    #[tokio::test]
    async fn test_teleport_is_implausible() {
        let store = Arc::new(MemoryStore::new());
        let validator = validator(&store);
        let user = UserId::new([2; 16]);

        validator.validate_movement(user, LocationFix::new(START, 5.0, at(0))).await.unwrap();
        let verdict = validator
            .validate_movement(user, LocationFix::new(north_of(START, 400.0), 5.0, at(10)))
            .await
            .unwrap();

        match verdict {
            MovementVerdict::Implausible { implied_speed, max_allowed, .. } => {
                assert!((implied_speed - 40.0).abs() < 1e-6, "got {}", implied_speed);
                assert_eq!(max_allowed, 30.0);
            }
            other => panic!("expected implausible, got {:?}", other),
        }

        // Stored fix unchanged
        let stored = store.last_fix(user).await.unwrap().unwrap();
        assert_eq!(stored.observed_at, at(0));

        let events = store.audit_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::High);
        match &events[0].data {
            AuditEventData::ImpossibleMovement { max_possible_meters, elapsed_seconds, .. } => {
                assert_eq!(*max_possible_meters, 300.0);
                assert_eq!(*elapsed_seconds, 10.0);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_walking_is_plausible() {
        let store = Arc::new(MemoryStore::new());
        let validator = validator(&store);
        let user = UserId::new([3; 16]);

        validator.validate_movement(user, LocationFix::new(START, 5.0, at(0))).await.unwrap();
        let verdict = validator
            .validate_movement(user, LocationFix::new(north_of(START, 14.0), 5.0, at(10)))
            .await
            .unwrap();
        assert!(verdict.is_plausible());
        assert_eq!(store.last_fix(user).await.unwrap().unwrap().observed_at, at(10));
    }

    #[tokio::test]
    async fn test_stale_last_fix_is_not_compared() {
        let store = Arc::new(MemoryStore::new());
        let validator = validator(&store);
        let user = UserId::new([4; 16]);

        validator.validate_movement(user, LocationFix::new(START, 5.0, at(0))).await.unwrap();
        let far = north_of(START, 100_000.0);
        let verdict = validator
            .validate_movement(user, LocationFix::new(far, 5.0, at(301)))
            .await
            .unwrap();
        assert!(verdict.is_plausible());
    }

    #[tokio::test]
    async fn test_same_timestamp_skips_check() {
        let store = Arc::new(MemoryStore::new());
        let validator = validator(&store);
        let user = UserId::new([5; 16]);

        validator.validate_movement(user, LocationFix::new(START, 5.0, at(50))).await.unwrap();
        let verdict = validator
            .validate_movement(user, LocationFix::new(north_of(START, 5_000.0), 5.0, at(50)))
            .await
            .unwrap();
        assert!(verdict.is_plausible());
        assert!(store.audit_events().is_empty());
    }

    #[tokio::test]
    async fn test_older_fix_does_not_replace_newer() {
        let store = Arc::new(MemoryStore::new());
        let validator = validator(&store);
        let user = UserId::new([6; 16]);

        validator.validate_movement(user, LocationFix::new(START, 5.0, at(100))).await.unwrap();
        let verdict = validator
            .validate_movement(user, LocationFix::new(north_of(START, 10.0), 5.0, at(90)))
            .await
            .unwrap();
        assert_eq!(verdict, MovementVerdict::Plausible { recorded: false });
        assert_eq!(store.last_fix(user).await.unwrap().unwrap().observed_at, at(100));
    }

    #[tokio::test]
    async fn test_require_plausible_maps_to_rejection() {
        let store = Arc::new(MemoryStore::new());
        let validator = validator(&store);
        let user = UserId::new([7; 16]);

        validator.require_plausible(user, LocationFix::new(START, 5.0, at(0))).await.unwrap();
        let err = validator
            .require_plausible(user, LocationFix::new(north_of(START, 1_000.0), 5.0, at(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MovementRejected { .. }));
    }

    #[tokio::test]
    async fn test_invalid_fix_has_no_side_effects() {
        let store = Arc::new(MemoryStore::new());
        let validator = validator(&store);
        let user = UserId::new([8; 16]);

        let bad_accuracy = validator.validate_movement(user, LocationFix::new(START, -1.0, at(0))).await;
        assert!(matches!(bad_accuracy, Err(EngineError::InvalidAccuracy(_))));

        let bad_coord = validator
            .validate_movement(user, LocationFix::new(Coordinate::new(f64::NAN, 0.0), 5.0, at(0)))
            .await;
        assert!(matches!(bad_coord, Err(EngineError::InvalidCoordinate(_))));

        assert!(store.last_fix(user).await.unwrap().is_none());
        assert!(store.audit_events().is_empty());
    }

    #[tokio::test]
    async fn test_random_walk_never_flags() {
        use rand::{Rng, SeedableRng};

        let store = Arc::new(MemoryStore::new());
        let validator = validator(&store);
        let user = UserId::new([9; 16]);
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);

        let mut position = START;
        let mut t = 0;
        for step in 0..200 {
            // Up to 25 m/s for 1-10 s
            let dt: i64 = rng.gen_range(1..=10);
            let meters = rng.gen_range(0.0..25.0) * dt as f64;
            position = north_of(position, meters);
            t += dt;
            let verdict = validator
                .validate_movement(user, LocationFix::new(position, 10.0, at(t)))
                .await
                .unwrap();
            assert!(verdict.is_plausible(), "step {} flagged", step);
        }
    }
}
