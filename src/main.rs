//! Feed Personalizer: binary entrypoint
//! Boots the Axum HTTP server, wiring config, the in-memory store, the feed
//! cache and the `/metrics` exporter.

use shuttle_axum::ShuttleAxum;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use feed_personalizer::config::PersonalizationConfig;
use feed_personalizer::metrics::Metrics;
use feed_personalizer::store::InMemoryStore;
use feed_personalizer::{create_router, AppState, PersonalizedFeedService};

const ENV_SEED_PATH: &str = "PERSONALIZATION_SEED_PATH";

/// Enable compact tracing logs in development only.
/// Activation requires BOTH:
///   - dev environment (debug build OR SHUTTLE_ENV in {local, development, dev})
///   - PERSONALIZATION_DEV_LOG=1
fn enable_dev_tracing() {
    let dev_flag = std::env::var("PERSONALIZATION_DEV_LOG")
        .ok()
        .is_some_and(|v| v == "1");

    let is_dev_env = cfg!(debug_assertions)
        || matches!(
            std::env::var("SHUTTLE_ENV")
                .unwrap_or_default()
                .to_ascii_lowercase()
                .as_str(),
            "local" | "development" | "dev"
        );

    if !(dev_flag && is_dev_env) {
        return;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("personalization=info,feed_personalizer=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    enable_dev_tracing();

    // Weights and thresholds are mandatory: refuse to start without them.
    let cfg = PersonalizationConfig::from_toml()?;

    let store = match std::env::var(ENV_SEED_PATH) {
        Ok(path) => Arc::new(InMemoryStore::from_seed_file(&PathBuf::from(path))?),
        Err(_) => Arc::new(InMemoryStore::new()),
    };

    let metrics = Metrics::init(cfg.cache.ttl().as_secs())?;
    let service = PersonalizedFeedService::in_memory(&cfg, store);
    info!(
        target: "personalization",
        ttl_minutes = cfg.cache.ttl_minutes,
        max_cache_size = cfg.cache.max_cache_size,
        "feed personalizer ready"
    );

    let router = create_router(AppState::new(service)).merge(metrics.router());

    Ok(router.into())
}
