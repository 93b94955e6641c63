//! ==============================================================================
//! main.rs - greenhouse hub entry point
//! ==============================================================================
//!
//! responsibilities:
//!     - load hub.toml (or defaults)
//!     - set up tracing (RUST_LOG wins over logging.level)
//!     - build the coordinator, loading the sqlite database if configured
//!     - pick the detector mode
//!     - serve the http api until ctrl-c, then close the database
//!
//! ==============================================================================

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use greenhouse_hub::config::{ConfigSource, HubConfig};
use greenhouse_hub::detection::Detector;
use greenhouse_hub::web::{self, AppState};
use greenhouse_hub::Coordinator;

#[tokio::main]
async fn main() -> Result<()> {
    // step 1: load configuration
    let (config, source) = HubConfig::load_or_default();

    // step 2: logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&config.logging.level))
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting greenhouse hub v{}", env!("CARGO_PKG_VERSION"));
    match &source {
        ConfigSource::File(path) => tracing::info!(path = %path.display(), "config loaded"),
        ConfigSource::Fallback { path, reason } => {
            tracing::warn!(path = %path.display(), %reason, "config unusable, using defaults")
        }
        ConfigSource::Defaults => tracing::warn!("no config file found, using defaults"),
    }
    config.log_summary();

    // step 3: shared state
    let hub = match Coordinator::open(&config).await {
        Ok(hub) => hub,
        Err(e) => {
            tracing::error!(error = %e, "failed to open hub state");
            return Err(e.into());
        }
    };

    // step 4: detection pipeline
    let detector = Detector::from_config(&config.detection)?;
    tracing::info!(mode = %detector.describe(), "detector ready");

    // step 5: serve
    let state = AppState::new(hub, detector).with_image_limit(config.detection.max_image_bytes);
    let hub = state.hub.clone();
    let served = web::serve(state, &config.bind_addr()).await;

    hub.close().await;
    tracing::info!("greenhouse hub stopped");
    served
}
