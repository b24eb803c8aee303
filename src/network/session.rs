//! Client Session
//!
//! Per-connection state. Each WebSocket connection owns one
//! [`GeofenceEvaluator`]; smoothing never crosses connections and is dropped
//! when the connection ends. Committed transitions are pushed to the
//! connection's outbound channel.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::game::error::{EngineError, EngineResult};
use crate::game::geofence::{
    GeofenceConfig, GeofenceEvaluator, GeofenceTransition, SubscriptionId, SubscriptionScope,
};
use crate::game::ids::{FeatureId, UserId};
use crate::network::protocol::{GeofenceEvent, ServerMessage};

/// Unique session identifier.
pub type SessionId = Uuid;

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, no identity yet.
    AwaitingAuth,
    /// Authenticated; engine calls allowed.
    Active,
    /// Ended; tracking state dropped.
    Closed,
}

/// Session errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Engine call before authentication.
    #[error("Must authenticate first")]
    NotAuthenticated,

    /// Second auth on one connection.
    #[error("Already authenticated")]
    AlreadyAuthenticated,

    /// Session already ended.
    #[error("Session closed")]
    Closed,
}

/// State for one connection.
pub struct ClientSession {
    /// Session id, for logs.
    pub id: SessionId,
    state: SessionState,
    user_id: Option<UserId>,
    evaluator: GeofenceEvaluator,
    subscription: Option<SubscriptionId>,
    /// Last client timestamp (Unix ms) accepted per tracked feature.
    fix_timestamps: BTreeMap<FeatureId, i64>,
    sender: mpsc::Sender<ServerMessage>,
    opened_at: Instant,
}

impl ClientSession {
    /// New unauthenticated session pushing to `sender`.
    pub fn new(config: GeofenceConfig, sender: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::AwaitingAuth,
            user_id: None,
            evaluator: GeofenceEvaluator::new(config),
            subscription: None,
            fix_timestamps: BTreeMap::new(),
            sender,
            opened_at: Instant::now(),
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the session has ended.
    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Bind the connection to `user` and start forwarding its transitions.
    pub fn authenticate(&mut self, user: UserId) -> Result<(), SessionError> {
        match self.state {
            SessionState::AwaitingAuth => {}
            SessionState::Active => return Err(SessionError::AlreadyAuthenticated),
            SessionState::Closed => return Err(SessionError::Closed),
        }

        let sender = self.sender.clone();
        let session = self.id;
        let subscription = self.evaluator.subscribe(
            SubscriptionScope::User(user),
            Arc::new(move |transition: &GeofenceTransition| {
                let event = ServerMessage::Geofence(GeofenceEvent::from(transition));
                if let Err(e) = sender.try_send(event) {
                    debug!(%session, "Geofence push dropped: {}", e);
                }
            }),
        );

        self.user_id = Some(user);
        self.subscription = Some(subscription);
        self.state = SessionState::Active;
        info!(session = %self.id, user = %user.short(), "Session authenticated");
        Ok(())
    }

    /// Authenticated user.
    pub fn user_id(&self) -> Result<UserId, SessionError> {
        match (self.state, self.user_id) {
            (SessionState::Active, Some(user)) => Ok(user),
            (SessionState::Closed, _) => Err(SessionError::Closed),
            _ => Err(SessionError::NotAuthenticated),
        }
    }

    /// The connection's geofence evaluator.
    pub fn evaluator(&self) -> &GeofenceEvaluator {
        &self.evaluator
    }

    /// Accept a client fix timestamp for `feature`. Timestamps must strictly
    /// increase per feature; absent timestamps are not checked.
    pub fn accept_fix_timestamp(&mut self, feature: FeatureId, timestamp: Option<i64>) -> EngineResult<()> {
        let Some(timestamp) = timestamp else {
            return Ok(());
        };
        if let Some(&previous) = self.fix_timestamps.get(&feature) {
            if timestamp <= previous {
                debug!(session = %self.id, %feature, previous, timestamp, "Out-of-order fix");
                return Err(EngineError::NonMonotonicFix);
            }
        }
        self.fix_timestamps.insert(feature, timestamp);
        Ok(())
    }

    /// Drop tracking for a feature that no longer exists: its readings,
    /// feature-scoped callbacks and fix timestamps.
    pub fn forget_feature(&mut self, feature: FeatureId) {
        if let Some(user) = self.user_id {
            self.evaluator.reset(user, feature);
        }
        if self.fix_timestamps.remove(&feature).is_some() {
            debug!(session = %self.id, %feature, "Stopped tracking feature");
        }
    }

    /// Drop all tracking state. Safe to call more than once.
    pub fn close(&mut self) {
        if self.is_closed() {
            return;
        }
        if let Some(subscription) = self.subscription.take() {
            self.evaluator.unsubscribe(subscription);
        }
        match self.user_id {
            Some(user) => self.evaluator.reset_user(user),
            None => self.evaluator.reset_all(),
        }
        self.fix_timestamps.clear();
        self.state = SessionState::Closed;
        debug!(
            session = %self.id,
            lifetime_s = self.opened_at.elapsed().as_secs(),
            "Session closed"
        );
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geo::Coordinate;
    use crate::game::feature::{FeatureKind, GeofenceFeature, Rarity};
    use crate::game::movement::LocationFix;
    use chrono::{DateTime, Duration as ChronoDuration, Utc};

    const USER: UserId = UserId::new([9; 16]);

    fn waypoint() -> GeofenceFeature {
        GeofenceFeature {
            id: FeatureId::new_v4(),
            center: Coordinate::new(40.4406, -79.9959),
            radius_meters: 30.0,
            kind: FeatureKind::MissionWaypoint,
            rarity: Rarity::Common,
            category: "trailhead".into(),
            expires_at: None,
        }
    }

    fn fix_at(feature: &GeofenceFeature, seconds: i64) -> LocationFix {
        let at = DateTime::<Utc>::UNIX_EPOCH + ChronoDuration::seconds(1_700_000_000 + seconds);
        LocationFix::new(feature.center, 3.0, at)
    }

    fn session() -> (ClientSession, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(8);
        (ClientSession::new(GeofenceConfig::default(), tx), rx)
    }

    #[test]
    fn test_requires_auth() {
        let (mut session, _rx) = session();
        assert_eq!(session.user_id(), Err(SessionError::NotAuthenticated));

        session.authenticate(USER).unwrap();
        assert_eq!(session.user_id(), Ok(USER));
        assert_eq!(session.authenticate(USER), Err(SessionError::AlreadyAuthenticated));
    }

    #[test]
    fn test_transitions_are_pushed() {
        let (mut session, mut rx) = session();
        session.authenticate(USER).unwrap();
        let feature = waypoint();

        for s in 0..3 {
            session.evaluator().report(USER, &feature, &fix_at(&feature, s)).unwrap();
        }

        match rx.try_recv().unwrap() {
            ServerMessage::Geofence(event) => {
                assert_eq!(event.feature_id, feature.id);
                assert_eq!(event.kind, crate::game::geofence::TransitionKind::Enter);
            }
            other => panic!("unexpected message {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_fix_timestamps_must_increase() {
        let (mut session, _rx) = session();
        let feature = FeatureId::new_v4();
        let other = FeatureId::new_v4();

        session.accept_fix_timestamp(feature, Some(1_000)).unwrap();
        assert!(matches!(
            session.accept_fix_timestamp(feature, Some(1_000)),
            Err(EngineError::NonMonotonicFix)
        ));
        assert!(matches!(
            session.accept_fix_timestamp(feature, Some(900)),
            Err(EngineError::NonMonotonicFix)
        ));
        session.accept_fix_timestamp(feature, Some(1_001)).unwrap();
        session.accept_fix_timestamp(other, Some(5)).unwrap();
        session.accept_fix_timestamp(feature, None).unwrap();
    }

    #[test]
    fn test_close_drops_tracking() {
        let (mut session, mut rx) = session();
        session.authenticate(USER).unwrap();
        let feature = waypoint();
        session.evaluator().report(USER, &feature, &fix_at(&feature, 0)).unwrap();
        assert_eq!(session.evaluator().tracked(), 1);
        assert_eq!(session.evaluator().subscriber_count(), 1);

        session.close();
        assert!(session.is_closed());
        assert_eq!(session.evaluator().tracked(), 0);
        assert_eq!(session.evaluator().subscriber_count(), 0);
        assert_eq!(session.user_id(), Err(SessionError::Closed));

        // Nothing left to notify
        for s in 1..4 {
            session.evaluator().report(USER, &feature, &fix_at(&feature, s)).unwrap();
        }
        assert!(rx.try_recv().is_err());

        session.close();
    }

    #[test]
    fn test_forget_feature_clears_only_that_feature() {
        let (mut session, _rx) = session();
        session.authenticate(USER).unwrap();
        let gone = waypoint();
        let kept = waypoint();
        session.evaluator().report(USER, &gone, &fix_at(&gone, 0)).unwrap();
        session.evaluator().report(USER, &kept, &fix_at(&kept, 0)).unwrap();
        session.evaluator().subscribe(SubscriptionScope::Feature(USER, gone.id), Arc::new(|_: &GeofenceTransition| {}));
        session.accept_fix_timestamp(gone.id, Some(1_000)).unwrap();
        assert_eq!(session.evaluator().subscriber_count(), 2);

        session.forget_feature(gone.id);
        assert_eq!(session.evaluator().tracked(), 1);
        assert_eq!(session.evaluator().subscriber_count(), 1);
        // Timestamp history restarts
        session.accept_fix_timestamp(gone.id, Some(1)).unwrap();
    }

    #[test]
    fn test_full_channel_does_not_block() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut session = ClientSession::new(GeofenceConfig::default(), tx);
        session.authenticate(USER).unwrap();

        let a = waypoint();
        let b = waypoint();
        for s in 0..3 {
            session.evaluator().report(USER, &a, &fix_at(&a, s)).unwrap();
            session.evaluator().report(USER, &b, &fix_at(&b, s)).unwrap();
        }
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }
}
