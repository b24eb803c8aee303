//! Audit Hashing
//!
//! SHA-256 digests over resolution records, so a stored roll and rate can be
//! checked for tampering during anti-fraud review.

use sha2::{Digest, Sha256};

/// Hash output type (256 bits / 32 bytes)
pub type AuditDigest = [u8; 32];

/// Domain-separated SHA-256 hasher with typed update helpers.
///
/// Order of updates is part of the digest; callers must feed fields in a fixed
/// order.
pub struct AuditHasher {
    hasher: Sha256,
}

impl AuditHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Create hasher for attempt resolutions.
    pub fn for_resolution() -> Self {
        Self::new(b"FIELDQUEST_RESOLUTION_V1")
    }

    /// Update with raw bytes.
    #[inline]
    pub fn update_bytes(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Update with a u8 value.
    #[inline]
    pub fn update_u8(&mut self, value: u8) {
        self.hasher.update([value]);
    }

    /// Update with an i64 value (little-endian).
    #[inline]
    pub fn update_i64(&mut self, value: i64) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with an f64 by its IEEE-754 bit pattern.
    #[inline]
    pub fn update_f64(&mut self, value: f64) {
        self.hasher.update(value.to_bits().to_le_bytes());
    }

    /// Update with an optional f64; absence and presence hash differently.
    #[inline]
    pub fn update_opt_f64(&mut self, value: Option<f64>) {
        match value {
            Some(v) => {
                self.update_u8(1);
                self.update_f64(v);
            }
            None => self.update_u8(0),
        }
    }

    /// Update with a length-prefixed string.
    #[inline]
    pub fn update_str(&mut self, value: &str) {
        self.hasher.update((value.len() as u64).to_le_bytes());
        self.hasher.update(value.as_bytes());
    }

    /// Update with a UUID (16 bytes).
    #[inline]
    pub fn update_uuid(&mut self, uuid: &[u8; 16]) {
        self.hasher.update(uuid);
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> AuditDigest {
        self.hasher.finalize().into()
    }
}

/// Compute hash with domain separator.
pub fn hash_with_domain(domain: &[u8], data: &[u8]) -> AuditDigest {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update(data);
    hasher.finalize().into()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hasher_determinism() {
        let make_hash = || {
            let mut hasher = AuditHasher::for_resolution();
            hasher.update_i64(100);
            hasher.update_f64(0.42);
            hasher.update_opt_f64(None);
            hasher.update_str("basic_bait");
            hasher.finalize()
        };

        assert_eq!(make_hash(), make_hash());
    }

    #[test]
    fn test_hash_order_matters() {
        let hash1 = {
            let mut h = AuditHasher::new(b"test");
            h.update_f64(1.0);
            h.update_f64(2.0);
            h.finalize()
        };

        let hash2 = {
            let mut h = AuditHasher::new(b"test");
            h.update_f64(2.0);
            h.update_f64(1.0);
            h.finalize()
        };

        assert_ne!(hash1, hash2);
    }

    #[test]
    fn test_optional_presence_is_hashed() {
        let none = {
            let mut h = AuditHasher::new(b"test");
            h.update_opt_f64(None);
            h.finalize()
        };
        let zero = {
            let mut h = AuditHasher::new(b"test");
            h.update_opt_f64(Some(0.0));
            h.finalize()
        };
        assert_ne!(none, zero);
    }

    #[test]
    fn test_domain_separation() {
        let data = [1u8, 2, 3, 4];
        assert_ne!(hash_with_domain(b"DOMAIN_A", &data), hash_with_domain(b"DOMAIN_B", &data));
    }
}
