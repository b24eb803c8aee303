//! Core primitives.
//!
//! Pure building blocks with no storage or network dependencies: geodesy,
//! server-side randomness, audit hashing and the injectable clock.

pub mod clock;
pub mod geo;
pub mod hash;
pub mod rng;

// Re-export core types
pub use clock::{Clock, ManualClock, SystemClock};
pub use geo::{bearing_degrees, distance_meters, Coordinate, GeoError};
pub use hash::{AuditDigest, AuditHasher};
pub use rng::{DeterministicRng, RollSource};
