//! Network Layer
//!
//! WebSocket transport for the encounter engine. Identity comes from the
//! provider's JWT; everything else the client sends is re-validated by `game/`.

pub mod auth;
pub mod protocol;
pub mod server;
pub mod session;

pub use auth::{validate_token, AuthConfig, AuthError, TokenClaims};
pub use protocol::{ClientMessage, ErrorCode, GeofenceEvent, ServerError, ServerMessage};
pub use server::{GameServer, GameServerError, ServerConfig, ServerContext};
pub use session::{ClientSession, SessionError, SessionId, SessionState};
