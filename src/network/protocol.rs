//! Protocol Messages
//!
//! JSON wire format for the WebSocket transport. Every message is an
//! internally tagged object (`{"type": "open_attempt", ...}`).
//!
//! Client coordinates and skill inputs are untrusted; the server re-derives
//! every decision from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::game::error::{EngineError, ErrorClass};
use crate::game::geofence::{GeofenceTransition, TransitionKind};
use crate::game::ids::{AttemptId, FeatureId, ItemId};
use crate::game::resolver::{InteractOutcome, NearbyFeature, OpenedAttempt, ResolvedAttempt};
use crate::network::auth::AuthError;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Authenticate the connection. Must be the first message.
    Auth(AuthRequest),

    /// Start a catch attempt on a spawn.
    OpenAttempt {
        /// Target spawn.
        feature_id: FeatureId,
        /// Reported latitude.
        lat: f64,
        /// Reported longitude.
        lng: f64,
    },

    /// Resolve a pending attempt.
    ResolveAttempt {
        /// Attempt from `attempt_opened`.
        attempt_id: AttemptId,
        /// Client-measured skill in `[0, 1]`.
        skill_quality: f64,
        /// Item to apply.
        #[serde(default)]
        item_id: Option<ItemId>,
    },

    /// Visit a point of interest.
    Interact {
        /// Target site.
        feature_id: FeatureId,
        /// Reported latitude.
        lat: f64,
        /// Reported longitude.
        lng: f64,
    },

    /// Check in at a mission waypoint.
    VisitWaypoint {
        /// Target waypoint.
        feature_id: FeatureId,
        /// Reported latitude.
        lat: f64,
        /// Reported longitude.
        lng: f64,
    },

    /// Continuous-tracking fix for one feature.
    ReportFix(FixRequest),

    /// Live features around a point.
    Nearby {
        /// Reported latitude.
        lat: f64,
        /// Reported longitude.
        lng: f64,
        /// Search radius (m). Server default when absent.
        #[serde(default)]
        radius_meters: Option<f64>,
    },

    /// Latency probe.
    Ping {
        /// Client timestamp, echoed back.
        timestamp: u64,
    },

    /// Drop geofence tracking and close.
    EndSession,
}

/// Authentication request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRequest {
    /// Identity provider JWT.
    pub token: String,
    /// Client build, for logs.
    #[serde(default)]
    pub client_version: String,
}

/// Tracking fix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixRequest {
    /// Feature being tracked.
    pub feature_id: FeatureId,
    /// Reported latitude.
    pub lat: f64,
    /// Reported longitude.
    pub lng: f64,
    /// Reported horizontal accuracy (m).
    #[serde(default)]
    pub accuracy_meters: f64,
    /// Client capture time (Unix ms). Only used to reject replays and
    /// out-of-order fixes on this connection.
    #[serde(default)]
    pub timestamp: Option<i64>,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Authentication result.
    AuthResult(AuthResult),

    /// Attempt opened.
    AttemptOpened(OpenedAttempt),

    /// Attempt reached a terminal state.
    AttemptResolved(ResolvedAttempt),

    /// Site visit completed.
    Interacted(InteractOutcome),

    /// Waypoint check-in recorded.
    WaypointVisited {
        /// Waypoint.
        feature_id: FeatureId,
        /// Server check-in time.
        visited_at: DateTime<Utc>,
        /// First check-in here.
        first_visit: bool,
    },

    /// Tracking state after a fix.
    FixReport(FixReport),

    /// Committed geofence transition, pushed unprompted.
    Geofence(GeofenceEvent),

    /// Nearby features, nearest first.
    Nearby {
        /// Matches.
        features: Vec<NearbyFeature>,
    },

    /// Latency probe reply.
    Pong {
        /// Client timestamp.
        timestamp: u64,
        /// Server time (Unix ms).
        server_time: i64,
    },

    /// Request failed.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown {
        /// Reason.
        reason: String,
    },
}

/// Authentication result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResult {
    /// Whether auth succeeded.
    pub success: bool,
    /// Engine user id (hex) on success.
    pub user_id: Option<String>,
    /// Failure reason.
    pub error: Option<String>,
    /// Failure code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    /// Server version.
    pub server_version: String,
}

/// Tracking state for one feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixReport {
    /// Feature tracked.
    pub feature_id: FeatureId,
    /// Committed state.
    pub is_inside: bool,
    /// Confidence of this fix's determination.
    pub confidence: f64,
    /// Distance to the feature center (m).
    pub distance_meters: f64,
}

/// Wire form of a geofence transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeofenceEvent {
    /// Feature tracked.
    pub feature_id: FeatureId,
    /// Enter or exit.
    pub kind: TransitionKind,
    /// Commit time.
    pub at: DateTime<Utc>,
    /// Confidence at commit.
    pub confidence: f64,
}

impl From<&GeofenceTransition> for GeofenceEvent {
    fn from(t: &GeofenceTransition) -> Self {
        Self {
            feature_id: t.feature_id,
            kind: t.kind,
            at: t.at,
            confidence: t.confidence,
        }
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Server error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Structured detail for self-correction (distance, radius, next time).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Authentication failed.
    AuthFailed,
    /// Not authenticated.
    NotAuthenticated,
    /// JWT has expired.
    TokenExpired,
    /// JWT invalid (signature, format, claims).
    InvalidToken,
    /// Malformed message or field.
    InvalidInput,
    /// Feature or attempt not found.
    NotFound,
    /// Operation not offered by this feature.
    UnsupportedFeature,
    /// Spawn expired.
    FeatureExpired,
    /// Outside the interaction radius.
    OutOfRange,
    /// Cooldown running.
    OnCooldown,
    /// Request rejected. Deliberately unspecific.
    Rejected,
    /// Another attempt is already open.
    AlreadyPending,
    /// Attempt already resolved.
    AlreadyResolved,
    /// Attempt fled before resolution.
    TimedOut,
    /// Connection limit reached.
    ServerOverloaded,
    /// Internal error.
    InternalError,
}

impl From<&AuthError> for ErrorCode {
    fn from(err: &AuthError) -> Self {
        match err {
            AuthError::Expired => ErrorCode::TokenExpired,
            AuthError::InvalidFormat
            | AuthError::InvalidSignature
            | AuthError::InvalidIssuer
            | AuthError::InvalidAudience
            | AuthError::MissingClaim(_) => ErrorCode::InvalidToken,
            AuthError::NotConfigured | AuthError::DecodeError(_) => ErrorCode::AuthFailed,
        }
    }
}

impl ServerError {
    /// Build an error with no detail.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), details: None }
    }

    /// Wire form of an engine error. Trust and internal failures carry no
    /// detail.
    pub fn from_engine(err: &EngineError) -> Self {
        match err.class() {
            ErrorClass::Trust => return Self::new(ErrorCode::Rejected, "request rejected"),
            ErrorClass::Internal => return Self::new(ErrorCode::InternalError, "internal error"),
            _ => {}
        }

        let (code, details) = match err {
            EngineError::InvalidCoordinate(_)
            | EngineError::InvalidAccuracy(_)
            | EngineError::InvalidSkillQuality(_)
            | EngineError::NonMonotonicFix => (ErrorCode::InvalidInput, None),
            EngineError::FeatureNotFound(id) => (ErrorCode::NotFound, Some(serde_json::json!({ "feature_id": id }))),
            EngineError::NotFound(id) => (ErrorCode::NotFound, Some(serde_json::json!({ "attempt_id": id }))),
            EngineError::UnsupportedFeature(_) => (ErrorCode::UnsupportedFeature, None),
            EngineError::FeatureExpired(id) => (ErrorCode::FeatureExpired, Some(serde_json::json!({ "feature_id": id }))),
            EngineError::OutOfRange { distance, required } => (
                ErrorCode::OutOfRange,
                Some(serde_json::json!({ "distance_meters": distance, "required_meters": required })),
            ),
            EngineError::OnCooldown { next_available_at } => (
                ErrorCode::OnCooldown,
                Some(serde_json::json!({ "next_available_at": next_available_at })),
            ),
            EngineError::AlreadyPending(id) => (ErrorCode::AlreadyPending, Some(serde_json::json!({ "attempt_id": id }))),
            EngineError::AlreadyResolved(id) => (ErrorCode::AlreadyResolved, Some(serde_json::json!({ "attempt_id": id }))),
            EngineError::TimedOut(id) => (ErrorCode::TimedOut, Some(serde_json::json!({ "attempt_id": id }))),
            EngineError::MovementRejected { .. } => (ErrorCode::Rejected, None),
            EngineError::Storage(_) => (ErrorCode::InternalError, None),
        };

        Self { code, message: err.to_string(), details }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Error message from an engine error.
    pub fn engine_error(err: &EngineError) -> Self {
        ServerMessage::Error(ServerError::from_engine(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use chrono::TimeZone;

    #[test]
    fn test_parse_open_attempt() {
        let id = FeatureId::new_v4();
        let json = format!(r#"{{"type":"open_attempt","feature_id":"{}","lat":40.44,"lng":-79.99}}"#, id);
        match ClientMessage::from_json(&json).unwrap() {
            ClientMessage::OpenAttempt { feature_id, lat, lng } => {
                assert_eq!(feature_id, id);
                assert_eq!(lat, 40.44);
                assert_eq!(lng, -79.99);
            }
            other => panic!("wrong message {:?}", other),
        }
    }

    #[test]
    fn test_resolve_item_is_optional() {
        let json = format!(
            r#"{{"type":"resolve_attempt","attempt_id":"{}","skill_quality":0.8}}"#,
            AttemptId::new_v4()
        );
        assert!(matches!(
            ClientMessage::from_json(&json).unwrap(),
            ClientMessage::ResolveAttempt { item_id: None, .. }
        ));
    }

    #[test]
    fn test_report_fix_defaults() {
        let json = format!(
            r#"{{"type":"report_fix","feature_id":"{}","lat":1.0,"lng":2.0}}"#,
            FeatureId::new_v4()
        );
        match ClientMessage::from_json(&json).unwrap() {
            ClientMessage::ReportFix(fix) => {
                assert_eq!(fix.accuracy_meters, 0.0);
                assert_eq!(fix.timestamp, None);
            }
            other => panic!("wrong message {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(ClientMessage::from_json(r#"{"type":"teleport","lat":0,"lng":0}"#).is_err());
    }

    #[test]
    fn test_out_of_range_carries_detail() {
        let err = EngineError::OutOfRange { distance: 62.5, required: 50.0 };
        let wire = ServerError::from_engine(&err);
        assert_eq!(wire.code, ErrorCode::OutOfRange);
        let details = wire.details.unwrap();
        assert_eq!(details["distance_meters"], 62.5);
        assert_eq!(details["required_meters"], 50.0);
    }

    #[test]
    fn test_cooldown_carries_next_time() {
        let next = Utc.with_ymd_and_hms(2026, 5, 1, 14, 0, 0).unwrap();
        let wire = ServerError::from_engine(&EngineError::OnCooldown { next_available_at: next });
        assert_eq!(wire.code, ErrorCode::OnCooldown);
        assert!(wire.details.unwrap()["next_available_at"].as_str().unwrap().starts_with("2026-05-01T14:00:00"));
    }

    #[test]
    fn test_trust_errors_hide_thresholds() {
        let err = EngineError::MovementRejected { implied_speed: 41.7, max_allowed: 30.0 };
        let wire = ServerError::from_engine(&err);
        assert_eq!(wire.code, ErrorCode::Rejected);
        assert!(wire.details.is_none());
        assert!(!wire.message.contains("30"));
        assert!(!wire.message.contains("41"));

        let json = ServerMessage::Error(wire).to_json().unwrap();
        assert!(!json.contains("details"));
    }

    #[test]
    fn test_storage_errors_are_generic() {
        let err = EngineError::Storage(StoreError::Unavailable("pg: connection refused on 10.0.0.7".into()));
        let wire = ServerError::from_engine(&err);
        assert_eq!(wire.code, ErrorCode::InternalError);
        assert!(!wire.message.contains("10.0.0.7"));
    }

    #[test]
    fn test_auth_errors_map_to_codes() {
        assert_eq!(ErrorCode::from(&AuthError::Expired), ErrorCode::TokenExpired);
        assert_eq!(ErrorCode::from(&AuthError::InvalidSignature), ErrorCode::InvalidToken);
        assert_eq!(ErrorCode::from(&AuthError::MissingClaim("exp".into())), ErrorCode::InvalidToken);
        assert_eq!(ErrorCode::from(&AuthError::NotConfigured), ErrorCode::AuthFailed);

        let json = ServerMessage::AuthResult(AuthResult {
            success: false,
            user_id: None,
            error: Some("token expired".into()),
            code: Some(ErrorCode::TokenExpired),
            server_version: "1.0".into(),
        })
        .to_json()
        .unwrap();
        assert!(json.contains(r#""code":"token_expired""#));
    }

    #[test]
    fn test_server_message_tags() {
        let pong = ServerMessage::Pong { timestamp: 7, server_time: 1_000 }.to_json().unwrap();
        assert!(pong.contains(r#""type":"pong""#));

        let event = ServerMessage::Geofence(GeofenceEvent {
            feature_id: FeatureId::new_v4(),
            kind: TransitionKind::Enter,
            at: Utc::now(),
            confidence: 1.0,
        });
        let json = event.to_json().unwrap();
        assert!(json.contains(r#""type":"geofence""#));
        assert!(json.contains(r#""kind":"enter""#));
    }
}
