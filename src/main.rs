//! chatfed binary entry point

use chatfed::{AppState, config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application entry point
///
/// # Setup
/// 1. Load configuration from file and environment
/// 2. Initialize tracing/logging
/// 3. Initialize AppState
/// 4. Build Axum router
/// 5. Start HTTP server
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration; logging settings come from it
    let config = config::AppConfig::load()?;

    // 2. Initialize tracing/logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("chatfed={},tower_http=debug", config.logging.level).into()
    });

    if config.logging.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    tracing::info!("Starting chatfed...");

    // 3. Initialize metrics
    chatfed::metrics::init_metrics();

    if !config.federation.enabled {
        tracing::warn!("Federation is disabled; set federation.enabled = true to serve it");
        return Ok(());
    }
    tracing::info!(
        host = %config.federation.host,
        account_domain = %config.federation.account_domain,
        "Configuration loaded"
    );

    // 4. Initialize application state
    let state = AppState::new(config.clone()).await?;

    // 5. Build Axum router
    let app = chatfed::build_router(state);

    // 6. Start HTTP server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Federation URL: {}", config.federation_context().federation_url());

    axum::serve(listener, app).await?;

    Ok(())
}
