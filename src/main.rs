use std::sync::Arc;

use listing_trader::application::trading_engine::TradingEngine;
use listing_trader::config::EngineConfig;
use listing_trader::infrastructure::log_notifier::LogNotifier;
use listing_trader::infrastructure::memory_store::MemoryStore;
use listing_trader::infrastructure::mexc_client::{MexcClient, MexcConfig};
use listing_trader::rate_limit::{create_rate_limiter, RateLimiterConfig};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "listing_trader=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = EngineConfig::from_env();
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(e.into());
    }
    info!(?config, "Configuration loaded");
    if !config.has_credentials() {
        warn!("MEXC_API_KEY / MEXC_API_SECRET not set, order placement will fail");
    }

    let limiter = create_rate_limiter(RateLimiterConfig {
        requests_per_minute: config.exchange_requests_per_minute,
    })?;
    let exchange = Arc::new(MexcClient::new(
        MexcConfig::new(
            config.mexc_api_key.clone(),
            config.mexc_api_secret.clone(),
            config.exchange_call_timeout(),
        ),
        limiter,
    )?);
    let store = Arc::new(MemoryStore::new());

    let engine = TradingEngine::new(
        &config,
        exchange,
        store.repositories(),
        Arc::new(LogNotifier::new()),
    )
    .await?;
    engine.start().await;

    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal"),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    info!("Listing trader running. Press Ctrl+C to stop.");
    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutting down gracefully...");
    engine.stop().await;
    info!("Shutdown complete");
    Ok(())
}
