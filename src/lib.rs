//! # FieldQuest Encounter Server
//!
//! Server-authoritative anti-cheat engine for location-gated play: catching
//! spawns, visiting points of interest, checking in at mission waypoints.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  FIELDQUEST SERVER                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Pure primitives                           │
//! │  ├── geo.rs      - Haversine distance, bearing, offsets      │
//! │  ├── rng.rs      - Xorshift128+ server roll source           │
//! │  ├── hash.rs     - SHA-256 resolution digests                │
//! │  └── clock.rs    - Injectable time source                    │
//! │                                                              │
//! │  game/           - Encounter rules                           │
//! │  ├── movement.rs - Speed plausibility check                  │
//! │  ├── geofence.rs - Smoothed enter/exit tracking              │
//! │  ├── resolver.rs - Attempt state machine and rewards         │
//! │  ├── attempt.rs  - Attempt records                           │
//! │  └── loot.rs     - Weighted loot table                       │
//! │                                                              │
//! │  store/          - Collaborator contracts + in-memory impl   │
//! │                                                              │
//! │  network/        - WebSocket transport                       │
//! │  ├── auth.rs     - JWT validation                            │
//! │  ├── protocol.rs - JSON messages                             │
//! │  ├── session.rs  - Per-connection state                      │
//! │  └── server.rs   - Accept loop, routing, sweeper             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Trust Model
//!
//! The identity from the provider's token is trusted. Client coordinates,
//! timestamps and skill inputs are not:
//! - Every gated action re-measures distance on the server
//! - Every reported position passes the movement check first
//! - Every outcome is rolled server-side and written with a conditional update
//! - Fix times are server receive times

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod game;
pub mod network;
pub mod store;

// Re-export commonly used types
pub use config::EngineConfig;
pub use core::geo::{distance_meters, Coordinate};
pub use game::error::{EngineError, EngineResult};
pub use game::ids::{AttemptId, FeatureId, ItemId, UserId};
pub use game::resolver::EncounterResolver;
pub use store::{MemoryStore, Stores};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
