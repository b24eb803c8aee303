//! FieldQuest Encounter Server
//!
//! Authoritative encounter server backed by the in-memory store, with audit
//! events written to the log. Seeds a small demo catalog around
//! `FQ_DEMO_LAT`/`FQ_DEMO_LNG` so clients have something to find.

use std::sync::Arc;

use anyhow::Context;
use chrono::{Duration, Utc};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fieldquest::{
    config::EngineConfig,
    core::geo::{random_point_within, Coordinate},
    core::rng::{derive_seed, DeterministicRng},
    game::feature::{FeatureKind, GeofenceFeature, ItemDefinition, ItemEffect, Rarity},
    game::ids::{FeatureId, ItemId},
    network::{AuthConfig, GameServer},
    store::TracingAuditSink,
    EncounterResolver, MemoryStore, Stores, VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("FieldQuest Encounter Server v{}", VERSION);

    let config = EngineConfig::from_env();
    let auth = AuthConfig::from_env();
    if !auth.is_configured() {
        warn!("No AUTH_SECRET or AUTH_PUBLIC_KEY_PEM set; every client will fail authentication");
    }

    let center = demo_center()?;
    let store = Arc::new(MemoryStore::new());
    seed_demo_catalog(&store, center).await?;

    let resolver = Arc::new(EncounterResolver::new(
        config.resolver.clone(),
        config.movement.clone(),
        Stores {
            audit: Arc::new(TracingAuditSink),
            ..Stores::memory(store)
        },
    ));
    info!(
        max_speed_mps = config.movement.max_speed_mps,
        cooldown_s = config.resolver.cooldown_window.num_seconds(),
        "Resolver ready"
    );

    let server = Arc::new(GameServer::new(config.server, resolver, auth, config.geofence));

    let signal_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            signal_server.shutdown();
        }
    });

    server.run().await.context("server failed")?;
    info!("Server stopped");
    Ok(())
}

fn demo_center() -> anyhow::Result<Coordinate> {
    let read = |key: &str, default: f64| -> anyhow::Result<f64> {
        match std::env::var(key) {
            Ok(raw) => raw.trim().parse().with_context(|| format!("{} is not a number", key)),
            Err(_) => Ok(default),
        }
    };
    let center = Coordinate::checked(read("FQ_DEMO_LAT", 40.4406)?, read("FQ_DEMO_LNG", -79.9959)?)?;
    Ok(center)
}

async fn seed_demo_catalog(store: &MemoryStore, center: Coordinate) -> anyhow::Result<()> {
    let seed = derive_seed(b"demo-catalog", Utc::now().timestamp() as u64);
    let mut rng = DeterministicRng::new(seed);

    for (item, effect, value) in [
        ("basic_bait", ItemEffect::Bait, 0.1),
        ("rare_bait", ItemEffect::Bait, 0.25),
        ("field_journal_page", ItemEffect::Tool, 0.0),
        ("camera_upgrade", ItemEffect::Camera, 0.0),
    ] {
        store
            .insert_item(ItemDefinition {
                id: ItemId::new(item),
                effect,
                effect_value: value,
            })
            .await;
    }

    let expires_at = Some(Utc::now() + Duration::hours(24));
    for (species, rarity) in [
        ("eastern-gray-squirrel", Rarity::Common),
        ("red-tailed-hawk", Rarity::Uncommon),
        ("eastern-hellbender", Rarity::Rare),
    ] {
        store
            .insert_feature(GeofenceFeature {
                id: FeatureId::new_v4(),
                center: random_point_within(center, 250.0, &mut rng)?,
                radius_meters: 50.0,
                kind: FeatureKind::Spawn,
                rarity,
                category: species.into(),
                expires_at,
            })
            .await;
    }

    store
        .insert_feature(GeofenceFeature {
            id: FeatureId::new_v4(),
            center,
            radius_meters: 75.0,
            kind: FeatureKind::PointOfInterest,
            rarity: Rarity::Common,
            category: "park".into(),
            expires_at: None,
        })
        .await;

    store
        .insert_feature(GeofenceFeature {
            id: FeatureId::new_v4(),
            center: random_point_within(center, 400.0, &mut rng)?,
            radius_meters: 30.0,
            kind: FeatureKind::MissionWaypoint,
            rarity: Rarity::Common,
            category: "trailhead".into(),
            expires_at: None,
        })
        .await;

    info!(lat = center.latitude, lng = center.longitude, "Seeded demo catalog");
    Ok(())
}
