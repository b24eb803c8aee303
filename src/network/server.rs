//! WebSocket Encounter Server
//!
//! Async WebSocket server exposing the encounter engine. Each connection gets a
//! [`ClientSession`]; requests are routed to the shared [`EncounterResolver`].
//! A background task sweeps stale pending attempts.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::{interval, timeout};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::core::geo::Coordinate;
use crate::game::error::{EngineError, ErrorClass};
use crate::game::geofence::GeofenceConfig;
use crate::game::ids::UserId;
use crate::game::resolver::EncounterResolver;
use crate::network::auth::{validate_token, AuthConfig, AuthError};
use crate::network::protocol::{
    AuthRequest, AuthResult, ClientMessage, ErrorCode, FixReport, FixRequest, ServerError, ServerMessage,
};
use crate::network::session::ClientSession;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Connections silent this long are closed.
    pub idle_timeout: Duration,
    /// Period of the stale attempt sweep. Zero disables it.
    pub sweep_interval: Duration,
    /// Attempts expired per sweep.
    pub sweep_batch: usize,
    /// Outbound queue depth per connection.
    pub outbound_capacity: usize,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            idle_timeout: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
            sweep_batch: 500,
            outbound_capacity: 64,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),
}

/// Connected client bookkeeping.
struct ConnectedClient {
    user_id: Option<UserId>,
    connected_at: Instant,
}

/// State shared by every connection task.
pub struct ServerContext {
    /// Engine entry point.
    pub resolver: Arc<EncounterResolver>,
    /// Token validation settings.
    pub auth: AuthConfig,
    /// Per-connection evaluator settings.
    pub geofence: GeofenceConfig,
    /// Server version reported on auth.
    pub version: String,
}

/// The encounter server.
pub struct GameServer {
    config: ServerConfig,
    context: Arc<ServerContext>,
    clients: Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a server.
    pub fn new(
        config: ServerConfig,
        resolver: Arc<EncounterResolver>,
        auth: AuthConfig,
        geofence: GeofenceConfig,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let context = Arc::new(ServerContext {
            resolver,
            auth,
            geofence,
            version: config.version.clone(),
        });

        Self {
            config,
            context,
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Accept connections until [`GameServer::shutdown`] is called.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("Encounter server listening on {}", self.config.bind_addr);

        let sweep_handle = (!self.config.sweep_interval.is_zero()).then(|| {
            let resolver = self.context.resolver.clone();
            let period = self.config.sweep_interval;
            let batch = self.config.sweep_batch;
            tokio::spawn(async move {
                Self::run_sweep_loop(resolver, period, batch).await;
            })
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.clients.read().await.len();
                            if clients_count >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                tokio::spawn(Self::reject_overloaded(stream, addr));
                                continue;
                            }

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        if let Some(handle) = sweep_handle {
            handle.abort();
        }

        Ok(())
    }

    /// Complete the handshake only to tell a client over the cap why it is
    /// being turned away.
    async fn reject_overloaded<S>(stream: S, addr: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut ws = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                debug!("Handshake with rejected client {} failed: {}", addr, e);
                return;
            }
        };
        let reply = ServerMessage::Error(ServerError::new(ErrorCode::ServerOverloaded, "Server is at capacity"));
        match reply.to_json() {
            Ok(text) => {
                let _ = ws.send(Message::Text(text)).await;
            }
            Err(e) => error!("Failed to serialize message: {}", e),
        }
        let _ = ws.close(None).await;
    }

    /// Serve one WebSocket connection on its own task.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let context = self.context.clone();
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(config.outbound_capacity);
            let mut session = ClientSession::new(context.geofence.clone(), msg_tx.clone());

            clients.write().await.insert(
                addr,
                ConnectedClient { user_id: None, connected_at: Instant::now() },
            );

            // Outbound pump
            let mut sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            loop {
                tokio::select! {
                    msg = timeout(config.idle_timeout, ws_receiver.next()) => {
                        let msg = match msg {
                            Ok(msg) => msg,
                            Err(_) => {
                                info!("Closing idle client {}", addr);
                                break;
                            }
                        };
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let reply = match ClientMessage::from_json(&text) {
                                    Ok(client_msg) => Self::handle_client_message(&mut session, client_msg, &context).await,
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", addr, e);
                                        Some(ServerMessage::Error(ServerError::new(
                                            ErrorCode::InvalidInput,
                                            "Invalid message format",
                                        )))
                                    }
                                };

                                if let Ok(user) = session.user_id() {
                                    if let Some(client) = clients.write().await.get_mut(&addr) {
                                        client.user_id.get_or_insert(user);
                                    }
                                }

                                if let Some(reply) = reply {
                                    if msg_tx.send(reply).await.is_err() {
                                        break;
                                    }
                                }
                                if session.is_closed() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Binary(_))) => {
                                let _ = msg_tx.send(ServerMessage::Error(ServerError::new(
                                    ErrorCode::InvalidInput,
                                    "Binary frames are not supported",
                                ))).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        }).await;
                        break;
                    }
                }
            }

            session.close();
            drop(msg_tx);
            drop(session);
            // Let queued replies flush before the socket goes away
            if timeout(Duration::from_secs(1), &mut sender_task).await.is_err() {
                debug!("Outbound queue for {} did not drain", addr);
                sender_task.abort();
            }

            if let Some(client) = clients.write().await.remove(&addr) {
                info!(
                    user = %client.user_id.map(|u| u.short()).unwrap_or_else(|| "-".into()),
                    connected_s = client.connected_at.elapsed().as_secs(),
                    "Client {} cleaned up",
                    addr
                );
            }
        });
    }

    /// Route one client message. Returns the direct reply, if any.
    pub async fn handle_client_message(
        session: &mut ClientSession,
        msg: ClientMessage,
        context: &ServerContext,
    ) -> Option<ServerMessage> {
        match msg {
            ClientMessage::Auth(auth) => Some(Self::handle_auth(session, auth, context)),
            ClientMessage::Ping { timestamp } => Some(ServerMessage::Pong {
                timestamp,
                server_time: Utc::now().timestamp_millis(),
            }),
            ClientMessage::EndSession => {
                session.close();
                None
            }
            other => {
                let user = match session.user_id() {
                    Ok(user) => user,
                    Err(e) => return Some(ServerMessage::Error(ServerError::new(ErrorCode::NotAuthenticated, e.to_string()))),
                };
                Some(Self::handle_engine_request(session, user, other, context).await)
            }
        }
    }

    /// Validate the token and bind the session to its subject.
    fn handle_auth(session: &mut ClientSession, auth: AuthRequest, context: &ServerContext) -> ServerMessage {
        let failure = |code: ErrorCode, error: String| {
            ServerMessage::AuthResult(AuthResult {
                success: false,
                user_id: None,
                error: Some(error),
                code: Some(code),
                server_version: context.version.clone(),
            })
        };

        let claims = match validate_token(&auth.token, &context.auth) {
            Ok(claims) => claims,
            Err(e) => {
                match e {
                    AuthError::NotConfigured => error!(session = %session.id, "Auth attempted but no key is configured"),
                    _ => debug!(session = %session.id, "Auth failed: {}", e),
                }
                return failure(ErrorCode::from(&e), e.to_string());
            }
        };

        let user = claims.user_id();
        if let Err(e) = session.authenticate(user) {
            return failure(ErrorCode::AuthFailed, e.to_string());
        }
        debug!(session = %session.id, client_version = %auth.client_version, "Client authenticated");

        ServerMessage::AuthResult(AuthResult {
            success: true,
            user_id: Some(hex::encode(user.as_bytes())),
            error: None,
            code: None,
            server_version: context.version.clone(),
        })
    }

    /// Run an authenticated engine request and shape its reply.
    async fn handle_engine_request(
        session: &mut ClientSession,
        user: UserId,
        msg: ClientMessage,
        context: &ServerContext,
    ) -> ServerMessage {
        let resolver = &context.resolver;
        let result = match msg {
            ClientMessage::OpenAttempt { feature_id, lat, lng } => resolver
                .open_attempt(user, feature_id, Coordinate::new(lat, lng))
                .await
                .map(ServerMessage::AttemptOpened),
            ClientMessage::ResolveAttempt { attempt_id, skill_quality, item_id } => resolver
                .resolve_attempt(user, attempt_id, skill_quality, item_id)
                .await
                .map(ServerMessage::AttemptResolved),
            ClientMessage::Interact { feature_id, lat, lng } => resolver
                .interact(user, feature_id, Coordinate::new(lat, lng))
                .await
                .map(ServerMessage::Interacted),
            ClientMessage::VisitWaypoint { feature_id, lat, lng } => resolver
                .visit_waypoint(user, feature_id, Coordinate::new(lat, lng))
                .await
                .map(|visit| ServerMessage::WaypointVisited {
                    feature_id,
                    visited_at: visit.visited_at,
                    first_visit: visit.first_visit,
                }),
            ClientMessage::ReportFix(fix) => Self::handle_fix(session, user, fix, resolver).await,
            ClientMessage::Nearby { lat, lng, radius_meters } => resolver
                .nearby(user, Coordinate::new(lat, lng), radius_meters)
                .await
                .map(|features| ServerMessage::Nearby { features }),
            ClientMessage::Auth(_) | ClientMessage::Ping { .. } | ClientMessage::EndSession => {
                return ServerMessage::Error(ServerError::new(ErrorCode::InvalidInput, "unexpected message"));
            }
        };

        result.unwrap_or_else(|err| {
            match err.class() {
                ErrorClass::Internal => error!(session = %session.id, user = %user.short(), "Request failed: {}", err),
                ErrorClass::Trust => warn!(session = %session.id, user = %user.short(), "Request rejected: {}", err),
                _ => debug!(session = %session.id, user = %user.short(), "Request refused: {}", err),
            }
            ServerMessage::engine_error(&err)
        })
    }

    async fn handle_fix(
        session: &mut ClientSession,
        user: UserId,
        fix: FixRequest,
        resolver: &EncounterResolver,
    ) -> crate::game::error::EngineResult<ServerMessage> {
        let position = Coordinate::new(fix.lat, fix.lng);
        position.validate()?;
        session.accept_fix_timestamp(fix.feature_id, fix.timestamp)?;

        let report = match resolver
            .report_fix(session.evaluator(), user, fix.feature_id, position, fix.accuracy_meters)
            .await
        {
            Ok(report) => report,
            Err(e @ (EngineError::FeatureNotFound(_) | EngineError::FeatureExpired(_))) => {
                session.forget_feature(fix.feature_id);
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        Ok(ServerMessage::FixReport(FixReport {
            feature_id: fix.feature_id,
            is_inside: report.is_inside,
            confidence: report.confidence,
            distance_meters: report.distance_meters,
        }))
    }

    /// Periodically expire stale pending attempts.
    async fn run_sweep_loop(resolver: Arc<EncounterResolver>, period: Duration, batch: usize) {
        let mut interval = interval(period);

        loop {
            interval.tick().await;
            match resolver.sweep_stale(batch).await {
                Ok(0) => {}
                Ok(expired) => debug!(expired, "Sweep pass complete"),
                Err(e) => error!("Stale attempt sweep failed: {}", e),
            }
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Shared connection context.
    pub fn context(&self) -> &Arc<ServerContext> {
        &self.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::core::geo::north_of;
    use crate::core::rng::ScriptedRolls;
    use crate::game::attempt::Resolution;
    use crate::game::feature::{FeatureKind, GeofenceFeature, Rarity};
    use crate::game::geofence::TransitionKind;
    use crate::game::ids::FeatureId;
    use crate::game::movement::MovementConfig;
    use crate::game::resolver::ResolverConfig;
    use crate::network::auth::TokenClaims;
    use crate::store::{FeatureCatalog, MemoryStore, Stores};
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};

    const SECRET: &str = "server-test-secret-0123456789abcd";
    const CENTER: Coordinate = Coordinate::new(40.4406, -79.9959);

    struct Harness {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        context: ServerContext,
        session: ClientSession,
        rx: mpsc::Receiver<ServerMessage>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::at_seconds(1_700_000_000));
        let resolver = EncounterResolver::new(
            ResolverConfig::default(),
            MovementConfig::default(),
            Stores::memory(store.clone()),
        )
        .with_clock(clock.clone())
        .with_rng(Box::new(ScriptedRolls::new(&[0.0])));

        let context = ServerContext {
            resolver: Arc::new(resolver),
            auth: AuthConfig { secret: Some(SECRET.into()), ..Default::default() },
            geofence: GeofenceConfig::default(),
            version: "test".into(),
        };
        let (tx, rx) = mpsc::channel(16);
        let session = ClientSession::new(context.geofence.clone(), tx);
        Harness { store, clock, context, session, rx }
    }

    fn token(sub: &str) -> String {
        let claims = TokenClaims {
            sub: sub.into(),
            exp: (Utc::now().timestamp() + 600) as u64,
            iat: 0,
            iss: None,
            aud: None,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
    }

    fn spawn_at(center: Coordinate) -> GeofenceFeature {
        GeofenceFeature {
            id: FeatureId::new_v4(),
            center,
            radius_meters: 50.0,
            kind: FeatureKind::Spawn,
            rarity: Rarity::Common,
            category: "white-tailed-deer".into(),
            expires_at: None,
        }
    }

    async fn send(h: &mut Harness, msg: ClientMessage) -> Option<ServerMessage> {
        GameServer::handle_client_message(&mut h.session, msg, &h.context).await
    }

    async fn login(h: &mut Harness) {
        let reply = send(h, ClientMessage::Auth(AuthRequest { token: token("ranger"), client_version: "1.0".into() })).await;
        assert!(matches!(reply, Some(ServerMessage::AuthResult(AuthResult { success: true, .. }))));
    }

    fn error_code(reply: Option<ServerMessage>) -> ErrorCode {
        match reply {
            Some(ServerMessage::Error(e)) => e.code,
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.idle_timeout, Duration::from_secs(300));
        assert_eq!(config.bind_addr.port(), 8080);
    }

    #[tokio::test]
    async fn test_server_creation_and_shutdown() {
        let h = harness();
        let config = ServerConfig { bind_addr: "127.0.0.1:0".parse().unwrap(), ..Default::default() };
        let server = GameServer::new(config, h.context.resolver.clone(), h.context.auth.clone(), GeofenceConfig::default());
        assert_eq!(server.connection_count().await, 0);
        assert_eq!(server.context().version, env!("CARGO_PKG_VERSION"));
        server.shutdown();
    }

    #[tokio::test]
    async fn test_requests_need_auth() {
        let mut h = harness();
        let reply = send(&mut h, ClientMessage::Nearby { lat: 40.0, lng: -80.0, radius_meters: None }).await;
        assert_eq!(error_code(reply), ErrorCode::NotAuthenticated);

        // Ping works before auth
        assert!(matches!(
            send(&mut h, ClientMessage::Ping { timestamp: 42 }).await,
            Some(ServerMessage::Pong { timestamp: 42, .. })
        ));
    }

    #[tokio::test]
    async fn test_bad_token_is_reported() {
        let mut h = harness();
        let reply = send(&mut h, ClientMessage::Auth(AuthRequest { token: "garbage".into(), client_version: String::new() })).await;
        match reply {
            Some(ServerMessage::AuthResult(result)) => {
                assert!(!result.success);
                assert!(result.error.is_some());
                assert_eq!(result.code, Some(ErrorCode::InvalidToken));
            }
            other => panic!("unexpected reply {:?}", other),
        }
        assert!(h.session.user_id().is_err());
    }

    #[tokio::test]
    async fn test_open_and_resolve_over_protocol() {
        let mut h = harness();
        login(&mut h).await;
        let feature = spawn_at(CENTER);
        h.store.insert_feature(feature.clone()).await;

        let opened = match send(&mut h, ClientMessage::OpenAttempt { feature_id: feature.id, lat: CENTER.latitude, lng: CENTER.longitude }).await {
            Some(ServerMessage::AttemptOpened(opened)) => opened,
            other => panic!("unexpected reply {:?}", other),
        };
        assert_eq!(opened.base_rate, 0.70);

        let reply = send(&mut h, ClientMessage::ResolveAttempt { attempt_id: opened.attempt_id, skill_quality: 0.5, item_id: None }).await;
        match reply {
            Some(ServerMessage::AttemptResolved(resolved)) => assert_eq!(resolved.resolution, Resolution::Caught),
            other => panic!("unexpected reply {:?}", other),
        }

        let again = send(&mut h, ClientMessage::ResolveAttempt { attempt_id: opened.attempt_id, skill_quality: 0.5, item_id: None }).await;
        assert_eq!(error_code(again), ErrorCode::AlreadyResolved);
    }

    #[tokio::test]
    async fn test_out_of_range_reply_has_detail() {
        let mut h = harness();
        login(&mut h).await;
        let feature = spawn_at(CENTER);
        h.store.insert_feature(feature.clone()).await;

        let far = north_of(CENTER, 80.0);
        let reply = send(&mut h, ClientMessage::OpenAttempt { feature_id: feature.id, lat: far.latitude, lng: far.longitude }).await;
        match reply {
            Some(ServerMessage::Error(e)) => {
                assert_eq!(e.code, ErrorCode::OutOfRange);
                assert_eq!(e.details.unwrap()["required_meters"], 50.0);
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_teleport_is_rejected_generically() {
        let mut h = harness();
        login(&mut h).await;
        let near = spawn_at(CENTER);
        let far_center = north_of(CENTER, 20_000.0);
        let far = spawn_at(far_center);
        h.store.insert_feature(near.clone()).await;
        h.store.insert_feature(far.clone()).await;

        send(&mut h, ClientMessage::OpenAttempt { feature_id: near.id, lat: CENTER.latitude, lng: CENTER.longitude }).await;
        h.clock.advance(chrono::Duration::seconds(30));
        let reply = send(&mut h, ClientMessage::OpenAttempt { feature_id: far.id, lat: far_center.latitude, lng: far_center.longitude }).await;

        match reply {
            Some(ServerMessage::Error(e)) => {
                assert_eq!(e.code, ErrorCode::Rejected);
                assert!(e.details.is_none());
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fixes_push_geofence_events() {
        let mut h = harness();
        login(&mut h).await;
        let feature = spawn_at(CENTER);
        h.store.insert_feature(feature.clone()).await;

        for i in 0..3 {
            h.clock.advance(chrono::Duration::seconds(1));
            let reply = send(&mut h, ClientMessage::ReportFix(FixRequest {
                feature_id: feature.id,
                lat: CENTER.latitude,
                lng: CENTER.longitude,
                accuracy_meters: 5.0,
                timestamp: Some(1_000 + i),
            })).await;
            assert!(matches!(reply, Some(ServerMessage::FixReport(_))));
        }

        match h.rx.try_recv() {
            Ok(ServerMessage::Geofence(event)) => assert_eq!(event.kind, TransitionKind::Enter),
            other => panic!("expected geofence push, got {:?}", other),
        }

        // Replayed client timestamp
        let reply = send(&mut h, ClientMessage::ReportFix(FixRequest {
            feature_id: feature.id,
            lat: CENTER.latitude,
            lng: CENTER.longitude,
            accuracy_meters: 5.0,
            timestamp: Some(1_001),
        })).await;
        assert_eq!(error_code(reply), ErrorCode::InvalidInput);
    }

    #[tokio::test]
    async fn test_end_session_resets_tracking() {
        let mut h = harness();
        login(&mut h).await;
        let feature = spawn_at(CENTER);
        h.store.insert_feature(feature.clone()).await;

        send(&mut h, ClientMessage::ReportFix(FixRequest {
            feature_id: feature.id,
            lat: CENTER.latitude,
            lng: CENTER.longitude,
            accuracy_meters: 5.0,
            timestamp: None,
        })).await;
        assert_eq!(h.session.evaluator().tracked(), 1);

        assert!(send(&mut h, ClientMessage::EndSession).await.is_none());
        assert!(h.session.is_closed());
        assert_eq!(h.session.evaluator().tracked(), 0);
    }

    #[tokio::test]
    async fn test_removed_feature_stops_tracking() {
        let mut h = harness();
        login(&mut h).await;
        let feature = spawn_at(CENTER);
        h.store.insert_feature(feature.clone()).await;

        let fix = |timestamp: i64| {
            ClientMessage::ReportFix(FixRequest {
                feature_id: feature.id,
                lat: CENTER.latitude,
                lng: CENTER.longitude,
                accuracy_meters: 5.0,
                timestamp: Some(timestamp),
            })
        };
        assert!(matches!(send(&mut h, fix(1_000)).await, Some(ServerMessage::FixReport(_))));
        assert_eq!(h.session.evaluator().tracked(), 1);

        // Caught by someone else
        assert!(h.store.remove_spawn(feature.id).await.unwrap());
        h.clock.advance(chrono::Duration::seconds(1));
        assert_eq!(error_code(send(&mut h, fix(2_000)).await), ErrorCode::NotFound);
        assert_eq!(h.session.evaluator().tracked(), 0);
    }

    #[tokio::test]
    async fn test_overloaded_client_gets_error_frame() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let addr: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        let rejecting = tokio::spawn(GameServer::reject_overloaded(server_io, addr));

        let (mut ws, _) = tokio_tungstenite::client_async("ws://localhost/", client_io).await.unwrap();
        match ws.next().await.unwrap().unwrap() {
            Message::Text(text) => match ServerMessage::from_json(&text).unwrap() {
                ServerMessage::Error(e) => assert_eq!(e.code, ErrorCode::ServerOverloaded),
                other => panic!("unexpected reply {:?}", other),
            },
            other => panic!("unexpected frame {:?}", other),
        }
        drop(ws);
        rejecting.await.unwrap();
    }
}
