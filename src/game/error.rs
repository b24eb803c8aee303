//! Engine Errors
//!
//! One error type for the validator and resolver. Each variant belongs to an
//! [`ErrorClass`], which decides how much detail reaches the caller and whether
//! the failure is an anomaly worth logging.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::core::geo::GeoError;
use crate::game::feature::FeatureKind;
use crate::game::ids::{AttemptId, FeatureId};
use crate::store::StoreError;

/// Coarse error classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Malformed input, rejected before any side effect.
    Validation,
    /// Expected proximity or cooldown rejection.
    Proximity,
    /// Anti-cheat rejection; audited, reported generically.
    Trust,
    /// A race that was correctly caught. Safe to treat as a no-op.
    Concurrency,
    /// Valid terminal path reported as an error shape.
    Terminal,
    /// Storage or other server-side failure.
    Internal,
}

impl ErrorClass {
    /// Whether callers may see the error's detail.
    pub fn is_detailed(self) -> bool {
        !matches!(self, ErrorClass::Trust | ErrorClass::Internal)
    }
}

/// Engine operation errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Coordinate not finite or out of range.
    #[error(transparent)]
    InvalidCoordinate(#[from] GeoError),

    /// Fix accuracy negative or not finite.
    #[error("invalid accuracy: {0}")]
    InvalidAccuracy(f64),

    /// Skill quality outside `[0, 1]` or not finite.
    #[error("skill quality must be within [0, 1], got {0}")]
    InvalidSkillQuality(f64),

    /// Fix timestamp not after the previous one on this connection.
    #[error("fix timestamp is not after the previous fix")]
    NonMonotonicFix,

    /// Feature does not exist in the catalog.
    #[error("feature {0} not found")]
    FeatureNotFound(FeatureId),

    /// Ephemeral feature has expired.
    #[error("feature {0} has expired")]
    FeatureExpired(FeatureId),

    /// Operation not offered by this kind of feature.
    #[error("operation not supported for {} features", .0.as_str())]
    UnsupportedFeature(FeatureKind),

    /// Reported position outside the interaction radius.
    #[error("out of range: {distance:.1} m from feature, {required:.1} m required")]
    OutOfRange {
        /// Measured distance in meters.
        distance: f64,
        /// Interaction radius in meters.
        required: f64,
    },

    /// Cooldown window has not elapsed.
    #[error("on cooldown until {next_available_at}")]
    OnCooldown {
        /// Earliest time of the next allowed visit.
        next_available_at: DateTime<Utc>,
    },

    /// Movement validator rejected the fix.
    #[error("movement rejected: implied {implied_speed:.1} m/s exceeds {max_allowed:.1} m/s")]
    MovementRejected {
        /// Speed implied by the two fixes.
        implied_speed: f64,
        /// Configured cap.
        max_allowed: f64,
    },

    /// Another attempt is already pending for this feature.
    #[error("attempt {0} already pending for this feature")]
    AlreadyPending(AttemptId),

    /// The attempt already reached a terminal state.
    #[error("attempt {0} already resolved")]
    AlreadyResolved(AttemptId),

    /// No such attempt for this caller.
    #[error("attempt {0} not found")]
    NotFound(AttemptId),

    /// The attempt expired before resolution.
    #[error("attempt {0} timed out")]
    TimedOut(AttemptId),

    /// Storage failure.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl EngineError {
    /// Error class of this variant.
    pub fn class(&self) -> ErrorClass {
        match self {
            EngineError::InvalidCoordinate(_)
            | EngineError::InvalidAccuracy(_)
            | EngineError::InvalidSkillQuality(_)
            | EngineError::NonMonotonicFix
            | EngineError::FeatureNotFound(_)
            | EngineError::UnsupportedFeature(_) => ErrorClass::Validation,
            EngineError::FeatureExpired(_)
            | EngineError::OutOfRange { .. }
            | EngineError::OnCooldown { .. } => ErrorClass::Proximity,
            EngineError::MovementRejected { .. } => ErrorClass::Trust,
            EngineError::AlreadyPending(_) | EngineError::AlreadyResolved(_) => {
                ErrorClass::Concurrency
            }
            EngineError::NotFound(_) => ErrorClass::Validation,
            EngineError::TimedOut(_) => ErrorClass::Terminal,
            EngineError::Storage(_) => ErrorClass::Internal,
        }
    }
}

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
