//! Geofence Evaluator
//!
//! Smooths a stream of noisy fixes into committed inside/outside states per
//! (user, feature) and fans enter/exit transitions out to subscribers.
//!
//! # Algorithm
//!
//! Each fix becomes a reading `{timestamp, inside, distance, accuracy}` in a
//! rolling buffer. Readings at or before `now - smoothing_window` are evicted.
//! Confidence is the share of buffered readings that agree with the current
//! reading, divided by `max(len, required_readings)`, so a short buffer only
//! yields partial confidence. The committed state changes only when
//! confidence reaches `min_confidence` and the current reading disagrees
//! with it.
//!
//! ```text
//! Unknown ──enter──► Inside ──exit──► Outside ──enter──► Inside ...
//!    └──(silent)──► Outside
//! ```
//!
//! State is in-process and per connection. It is not durable and is not
//! shared across server instances.

use std::collections::{BTreeMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::game::error::EngineResult;
use crate::game::feature::GeofenceFeature;
use crate::game::ids::{FeatureId, UserId};
use crate::game::movement::LocationFix;

// =============================================================================
// CONFIG
// =============================================================================

/// Smoothing parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct GeofenceConfig {
    /// Readings older than this are evicted.
    pub smoothing_window: Duration,
    /// Readings needed before full confidence is possible.
    pub required_readings: usize,
    /// Confidence needed to commit a transition.
    pub min_confidence: f64,
    /// Readings with worse accuracy are ignored. `None` keeps all.
    pub max_accuracy_meters: Option<f64>,
}

impl Default for GeofenceConfig {
    fn default() -> Self {
        Self {
            smoothing_window: Duration::seconds(5),
            required_readings: 3,
            min_confidence: 0.7,
            max_accuracy_meters: None,
        }
    }
}

// =============================================================================
// STATE
// =============================================================================

/// Committed geofence state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GeofencePhase {
    /// No confident determination yet.
    #[default]
    Unknown,
    /// Confidently inside.
    Inside,
    /// Confidently outside.
    Outside,
}

/// One buffered reading.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Reading {
    /// Observation time.
    pub timestamp: DateTime<Utc>,
    /// Whether this reading alone was inside the radius.
    pub inside: bool,
    /// Distance to the feature center (m).
    pub distance_meters: f64,
    /// Reported accuracy (m).
    pub accuracy_meters: f64,
}

/// Smoothing state for one (user, feature).
#[derive(Clone, Debug, Default)]
pub struct GeofenceState {
    /// Committed state.
    pub phase: GeofencePhase,
    /// Confidence of the latest reading.
    pub confidence: f64,
    /// Last committed enter.
    pub entered_at: Option<DateTime<Utc>>,
    /// Last committed exit.
    pub exited_at: Option<DateTime<Utc>>,
    /// Readings within the smoothing window, oldest first.
    pub readings: VecDeque<Reading>,
}

impl GeofenceState {
    /// Whether the committed state is inside.
    pub fn is_inside(&self) -> bool {
        self.phase == GeofencePhase::Inside
    }
}

/// Direction of a committed transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    /// Entered the geofence.
    Enter,
    /// Left the geofence.
    Exit,
}

/// A committed enter or exit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeofenceTransition {
    /// User whose state changed.
    pub user_id: UserId,
    /// Feature tracked.
    pub feature_id: FeatureId,
    /// Direction.
    pub kind: TransitionKind,
    /// Time of the committing reading.
    pub at: DateTime<Utc>,
    /// Confidence at commit.
    pub confidence: f64,
    /// Distance of the committing reading (m).
    pub distance_meters: f64,
}

/// Result of one reported fix.
#[derive(Clone, Debug, PartialEq)]
pub struct GeofenceReport {
    /// Committed state after this fix.
    pub is_inside: bool,
    /// Confidence of this fix's determination.
    pub confidence: f64,
    /// Distance to the feature center (m).
    pub distance_meters: f64,
    /// Transition committed by this fix, if any.
    pub transition: Option<GeofenceTransition>,
}

// =============================================================================
// SUBSCRIPTIONS
// =============================================================================

/// Transition callback.
pub type TransitionCallback = Arc<dyn Fn(&GeofenceTransition) + Send + Sync>;

/// Handle returned by [`GeofenceEvaluator::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

/// What a subscription listens to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SubscriptionScope {
    /// One feature for one user.
    Feature(UserId, FeatureId),
    /// Every feature for one user.
    User(UserId),
}

impl SubscriptionScope {
    fn matches(&self, user: UserId, feature: FeatureId) -> bool {
        match *self {
            SubscriptionScope::Feature(u, f) => u == user && f == feature,
            SubscriptionScope::User(u) => u == user,
        }
    }

    fn user(&self) -> UserId {
        match *self {
            SubscriptionScope::Feature(u, _) | SubscriptionScope::User(u) => u,
        }
    }
}

struct Subscription {
    scope: SubscriptionScope,
    callback: TransitionCallback,
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    entries: BTreeMap<SubscriptionId, Subscription>,
}

// =============================================================================
// EVALUATOR
// =============================================================================

/// Per-connection geofence evaluator.
pub struct GeofenceEvaluator {
    config: GeofenceConfig,
    states: Mutex<BTreeMap<(UserId, FeatureId), GeofenceState>>,
    subscribers: Mutex<Subscribers>,
}

impl GeofenceEvaluator {
    /// Create an empty evaluator.
    pub fn new(config: GeofenceConfig) -> Self {
        Self {
            config,
            states: Mutex::new(BTreeMap::new()),
            subscribers: Mutex::new(Subscribers::default()),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &GeofenceConfig {
        &self.config
    }

    /// Feed one fix for `user` against `feature`.
    pub fn report(&self, user: UserId, feature: &GeofenceFeature, fix: &LocationFix) -> EngineResult<GeofenceReport> {
        fix.validate()?;
        let distance = feature.distance_from(fix.coordinate)?;
        let now = fix.observed_at;

        let (report, transition) = {
            let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
            let state = states.entry((user, feature.id)).or_default();

            let too_coarse = self
                .config
                .max_accuracy_meters
                .is_some_and(|max| fix.accuracy_meters > max);
            if too_coarse {
                debug!(
                    user = %user.short(),
                    feature = %feature.id,
                    accuracy_m = fix.accuracy_meters,
                    "Coarse fix ignored by geofence"
                );
                let report = GeofenceReport {
                    is_inside: state.is_inside(),
                    confidence: state.confidence,
                    distance_meters: distance,
                    transition: None,
                };
                return Ok(report);
            }

            let inside = distance <= feature.radius_meters;
            let transition = self.apply_reading(
                state,
                Reading {
                    timestamp: now,
                    inside,
                    distance_meters: distance,
                    accuracy_meters: fix.accuracy_meters,
                },
            );

            #[cfg(feature = "debug-tracing")]
            tracing::trace!(
                user = %user.short(),
                feature = %feature.id,
                inside,
                confidence = state.confidence,
                buffered = state.readings.len(),
                "Geofence reading"
            );

            let transition = transition.map(|kind| GeofenceTransition {
                user_id: user,
                feature_id: feature.id,
                kind,
                at: now,
                confidence: state.confidence,
                distance_meters: distance,
            });

            let report = GeofenceReport {
                is_inside: state.is_inside(),
                confidence: state.confidence,
                distance_meters: distance,
                transition: transition.clone(),
            };
            (report, transition)
        };

        if let Some(transition) = &transition {
            debug!(
                user = %user.short(),
                feature = %feature.id,
                kind = ?transition.kind,
                confidence = transition.confidence,
                "Geofence transition"
            );
            self.notify(transition);
        }

        Ok(report)
    }

    /// Buffer a reading, recompute confidence, and commit if warranted.
    fn apply_reading(&self, state: &mut GeofenceState, reading: Reading) -> Option<TransitionKind> {
        let cutoff = reading.timestamp - self.config.smoothing_window;
        state.readings.push_back(reading);
        state.readings.retain(|r| r.timestamp > cutoff);

        let agreeing = state.readings.iter().filter(|r| r.inside == reading.inside).count();
        let denominator = state.readings.len().max(self.config.required_readings).max(1);
        state.confidence = agreeing as f64 / denominator as f64;

        if state.confidence < self.config.min_confidence {
            return None;
        }

        let target = if reading.inside { GeofencePhase::Inside } else { GeofencePhase::Outside };
        if state.phase == target {
            return None;
        }

        let previous = state.phase;
        state.phase = target;
        match (previous, target) {
            (_, GeofencePhase::Inside) => {
                state.entered_at = Some(reading.timestamp);
                state.exited_at = None;
                Some(TransitionKind::Enter)
            }
            (GeofencePhase::Inside, GeofencePhase::Outside) => {
                state.exited_at = Some(reading.timestamp);
                Some(TransitionKind::Exit)
            }
            // Unknown -> Outside: nothing was entered, nothing to announce
            _ => None,
        }
    }

    /// Call every matching subscriber. A panicking subscriber is logged and
    /// the rest still run.
    fn notify(&self, transition: &GeofenceTransition) {
        let callbacks: Vec<TransitionCallback> = {
            let subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
            subscribers
                .entries
                .values()
                .filter(|s| s.scope.matches(transition.user_id, transition.feature_id))
                .map(|s| s.callback.clone())
                .collect()
        };

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(transition))).is_err() {
                error!(
                    user = %transition.user_id.short(),
                    feature = %transition.feature_id,
                    "Geofence subscriber panicked"
                );
            }
        }
    }

    /// Register a transition callback.
    pub fn subscribe(&self, scope: SubscriptionScope, callback: TransitionCallback) -> SubscriptionId {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        let id = SubscriptionId(subscribers.next_id);
        subscribers.next_id += 1;
        subscribers.entries.insert(id, Subscription { scope, callback });
        id
    }

    /// Remove a callback. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.entries.remove(&id).is_some()
    }

    /// Snapshot of one state.
    pub fn state(&self, user: UserId, feature: FeatureId) -> Option<GeofenceState> {
        let states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        states.get(&(user, feature)).cloned()
    }

    /// Number of tracked (user, feature) pairs.
    pub fn tracked(&self) -> usize {
        self.states.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Number of registered callbacks.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner()).entries.len()
    }

    /// Clear one feature's readings and its feature-scoped callbacks.
    pub fn reset(&self, user: UserId, feature: FeatureId) {
        self.states.lock().unwrap_or_else(|e| e.into_inner()).remove(&(user, feature));
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .retain(|_, s| s.scope != SubscriptionScope::Feature(user, feature));
    }

    /// Clear everything belonging to `user`.
    pub fn reset_user(&self, user: UserId) {
        self.states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(u, _), _| *u != user);
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .retain(|_, s| s.scope.user() != user);
    }

    /// Clear all state and callbacks.
    pub fn reset_all(&self) {
        self.states.lock().unwrap_or_else(|e| e.into_inner()).clear();
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner()).entries.clear();
    }
}

impl Default for GeofenceEvaluator {
    fn default() -> Self {
        Self::new(GeofenceConfig::default())
    }
}
