//! Engine Configuration
//!
//! Every tunable in one place. Defaults are the documented constants; the
//! binary overrides them from `FQ_*` environment variables. Missing or
//! unparsable values keep the default.
//!
//! | Variable | Unit | Default |
//! |---|---|---|
//! | `FQ_MAX_SPEED_MPS` | m/s | 30 |
//! | `FQ_STALENESS_SECONDS` | s | 300 |
//! | `FQ_SMOOTHING_WINDOW_SECONDS` | s | 5 |
//! | `FQ_REQUIRED_READINGS` | count | 3 |
//! | `FQ_MIN_CONFIDENCE` | fraction | 0.7 |
//! | `FQ_MAX_ACCURACY_METERS` | m | unset |
//! | `FQ_ATTEMPT_TIMEOUT_SECONDS` | s | 300 |
//! | `FQ_SKILL_WEIGHT` | fraction | 0.5 |
//! | `FQ_RATE_CAP` | fraction | 0.99 |
//! | `FQ_COOLDOWN_SECONDS` | s | 14400 |
//! | `FQ_DEFAULT_ITEM_BONUS` | fraction | 0.2 |
//! | `FQ_NEARBY_RADIUS_METERS` | m | 300 |
//! | `FQ_BIND_ADDR` | addr | 0.0.0.0:8080 |
//! | `FQ_MAX_CONNECTIONS` | count | 1000 |
//! | `FQ_IDLE_TIMEOUT_SECONDS` | s | 300 |
//! | `FQ_SWEEP_INTERVAL_SECONDS` | s | 60 (0 disables) |
//! | `FQ_SWEEP_BATCH` | count | 500 |

use std::str::FromStr;

use chrono::Duration;
use tracing::warn;

use crate::game::geofence::GeofenceConfig;
use crate::game::movement::MovementConfig;
use crate::game::resolver::ResolverConfig;
use crate::network::server::ServerConfig;

/// Aggregated configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Movement validator.
    pub movement: MovementConfig,
    /// Geofence evaluator.
    pub geofence: GeofenceConfig,
    /// Encounter resolver.
    pub resolver: ResolverConfig,
    /// WebSocket server.
    pub server: ServerConfig,
}

impl EngineConfig {
    /// Load from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let env = Env { lookup: &lookup };
        let mut config = Self::default();

        let movement = &mut config.movement;
        env.set(&mut movement.max_speed_mps, "FQ_MAX_SPEED_MPS", positive);
        env.set_seconds(&mut movement.staleness_window, "FQ_STALENESS_SECONDS");

        let geofence = &mut config.geofence;
        env.set_seconds(&mut geofence.smoothing_window, "FQ_SMOOTHING_WINDOW_SECONDS");
        env.set(&mut geofence.required_readings, "FQ_REQUIRED_READINGS", |n: &usize| *n > 0);
        env.set(&mut geofence.min_confidence, "FQ_MIN_CONFIDENCE", fraction);
        if let Some(max) = env.parse::<f64>("FQ_MAX_ACCURACY_METERS", positive) {
            geofence.max_accuracy_meters = Some(max);
        }

        let resolver = &mut config.resolver;
        env.set_seconds(&mut resolver.attempt_timeout, "FQ_ATTEMPT_TIMEOUT_SECONDS");
        env.set(&mut resolver.skill_weight, "FQ_SKILL_WEIGHT", fraction);
        env.set(&mut resolver.rate_cap, "FQ_RATE_CAP", fraction);
        env.set_seconds(&mut resolver.cooldown_window, "FQ_COOLDOWN_SECONDS");
        env.set(&mut resolver.default_item_bonus, "FQ_DEFAULT_ITEM_BONUS", fraction);
        env.set(&mut resolver.nearby_radius_meters, "FQ_NEARBY_RADIUS_METERS", positive);

        let server = &mut config.server;
        env.set(&mut server.bind_addr, "FQ_BIND_ADDR", |_| true);
        env.set(&mut server.max_connections, "FQ_MAX_CONNECTIONS", |n: &usize| *n > 0);
        if let Some(secs) = env.parse::<u64>("FQ_IDLE_TIMEOUT_SECONDS", |s| *s > 0) {
            server.idle_timeout = std::time::Duration::from_secs(secs);
        }
        if let Some(secs) = env.parse::<u64>("FQ_SWEEP_INTERVAL_SECONDS", |_| true) {
            server.sweep_interval = std::time::Duration::from_secs(secs);
        }
        env.set(&mut server.sweep_batch, "FQ_SWEEP_BATCH", |n: &usize| *n > 0);

        config
    }
}

fn positive(v: &f64) -> bool {
    v.is_finite() && *v > 0.0
}

fn fraction(v: &f64) -> bool {
    (0.0..=1.0).contains(v)
}

struct Env<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Env<'_> {
    fn parse<T: FromStr>(&self, key: &str, valid: impl Fn(&T) -> bool) -> Option<T> {
        let raw = (self.lookup)(key)?;
        match raw.trim().parse::<T>() {
            Ok(value) if valid(&value) => Some(value),
            _ => {
                warn!(key, value = %raw, "Ignoring invalid config value");
                None
            }
        }
    }

    fn set<T: FromStr>(&self, slot: &mut T, key: &str, valid: impl Fn(&T) -> bool) {
        if let Some(value) = self.parse(key, valid) {
            *slot = value;
        }
    }

    fn set_seconds(&self, slot: &mut Duration, key: &str) {
        if let Some(secs) = self.parse::<i64>(key, |s| *s > 0) {
            *slot = Duration::seconds(secs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn load(pairs: &[(&str, &str)]) -> EngineConfig {
        let vars: BTreeMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        EngineConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_match_constants() {
        let config = load(&[]);
        assert_eq!(config.movement.max_speed_mps, 30.0);
        assert_eq!(config.movement.staleness_window, Duration::minutes(5));
        assert_eq!(config.geofence.required_readings, 3);
        assert_eq!(config.geofence.min_confidence, 0.7);
        assert_eq!(config.resolver.attempt_timeout, Duration::minutes(5));
        assert_eq!(config.resolver.cooldown_window, Duration::hours(4));
        assert_eq!(config.resolver.rate_cap, 0.99);
        assert_eq!(config.server.max_connections, 1000);
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("FQ_MAX_SPEED_MPS", "12.5"),
            ("FQ_COOLDOWN_SECONDS", "600"),
            ("FQ_MAX_ACCURACY_METERS", "25"),
            ("FQ_BIND_ADDR", "127.0.0.1:9001"),
            ("FQ_SWEEP_INTERVAL_SECONDS", "0"),
            ("FQ_MIN_CONFIDENCE", " 0.8 "),
        ]);
        assert_eq!(config.movement.max_speed_mps, 12.5);
        assert_eq!(config.resolver.cooldown_window, Duration::minutes(10));
        assert_eq!(config.geofence.max_accuracy_meters, Some(25.0));
        assert_eq!(config.server.bind_addr.port(), 9001);
        assert!(config.server.sweep_interval.is_zero());
        assert_eq!(config.geofence.min_confidence, 0.8);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = load(&[
            ("FQ_MAX_SPEED_MPS", "fast"),
            ("FQ_RATE_CAP", "1.5"),
            ("FQ_ATTEMPT_TIMEOUT_SECONDS", "-3"),
            ("FQ_REQUIRED_READINGS", "0"),
            ("FQ_BIND_ADDR", "localhost"),
        ]);
        assert_eq!(config.movement.max_speed_mps, 30.0);
        assert_eq!(config.resolver.rate_cap, 0.99);
        assert_eq!(config.resolver.attempt_timeout, Duration::minutes(5));
        assert_eq!(config.geofence.required_readings, 3);
        assert_eq!(config.server.bind_addr.port(), 8080);
    }
}
