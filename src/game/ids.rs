//! Identifiers
//!
//! Newtypes for the entities the engine reasons about. All are `Ord` so they
//! can key `BTreeMap`s.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::hash::hash_with_domain;

// =============================================================================
// USER ID
// =============================================================================

/// Authenticated user identifier (UUID as bytes).
///
/// Supplied by the identity provider; the engine trusts it but nothing else
/// the client sends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct UserId(pub [u8; 16]);

impl UserId {
    /// Create from raw bytes.
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Derive a stable id from an identity provider subject claim.
    pub fn from_subject(subject: &str) -> Self {
        let hash = hash_with_domain(b"fieldquest-user:", subject.as_bytes());
        let mut id = [0u8; 16];
        id.copy_from_slice(&hash[..16]);
        Self(id)
    }

    /// Create from UUID string.
    pub fn from_uuid_str(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(|u| Self(*u.as_bytes()))
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Short hex prefix for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Uuid::from_bytes(self.0))
    }
}

// =============================================================================
// FEATURE / ATTEMPT IDS
// =============================================================================

/// Geofenced feature identifier (spawn, point of interest, waypoint).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureId(pub Uuid);

impl FeatureId {
    /// Fresh random id.
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Attempt identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptId(pub Uuid);

impl AttemptId {
    /// Fresh random id.
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// ITEM ID
// =============================================================================

/// Catalog item identifier, e.g. `basic_bait`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    /// Create from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_from_subject_is_stable() {
        let a = UserId::from_subject("user123");
        let b = UserId::from_subject("user123");
        let c = UserId::from_subject("user456");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_user_id_uuid_roundtrip() {
        let id = UserId::new([7; 16]);
        let parsed = UserId::from_uuid_str(&id.to_string()).unwrap();
        assert_eq!(parsed, id);
        assert_eq!(id.short(), "07070707");
    }

    #[test]
    fn test_feature_id_serializes_as_plain_uuid() {
        let id = FeatureId(Uuid::nil());
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"00000000-0000-0000-0000-000000000000\"");
    }
}
