//! chatfed - federated actor identity and ActivityPub transforms for a
//! Discord-compatible chat server
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - /federation actor and object endpoints, inbox            │
//! │  - NodeInfo, metrics, health                                │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Federation Layer                          │
//! │  - Local entity ↔ ActivityPub transforms                    │
//! │  - Actor key store, remote object resolver                  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                              │
//! │  - SQLite (sqlx)                                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers for the federation surface
//! - `federation`: identity, wire objects and transforms
//! - `data`: Database layer
//! - `config`: Configuration management
//! - `error`: Error types
//! - `metrics`: Prometheus instruments

pub mod api;
pub mod config;
pub mod data;
pub mod error;
pub mod federation;
pub mod metrics;

use std::sync::Arc;

/// Application state shared across all handlers
///
/// This struct is cloned for each request and contains
/// shared resources like the database pool, the key store and
/// the transform layer.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Value object handed to every transform
    pub federation_context: Arc<config::FederationContext>,

    /// Database connection pool
    pub db: Arc<data::Database>,

    /// Federation identity of local and remote actors
    pub keys: Arc<federation::ActorKeyStore>,

    /// Local entity ↔ ActivityPub transforms
    pub federation: Arc<federation::Federation>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Connect to SQLite database
    /// 2. Build the object resolver and its HTTP client
    /// 3. Build the key store and transform layer
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        // 1. Connect to SQLite database
        let db = Arc::new(data::Database::connect(&config.database.path).await?);
        tracing::info!("Database connected");

        // 2. Initialize HTTP client
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("chatfed/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| error::AppError::Internal(e.into()))?;
        let resolver = Arc::new(federation::HttpObjectResolver::new(http_client));

        // 3. Key store and transforms
        let keys = Arc::new(federation::ActorKeyStore::new(
            db.clone(),
            &config.federation,
        ));
        let federation = Arc::new(federation::Federation::new(
            db.clone(),
            keys.clone(),
            resolver,
            config.defaults.user.clone(),
            config.register.default_rights.clone(),
        ));

        tracing::info!("Application state initialized successfully");

        Ok(Self {
            federation_context: Arc::new(config.federation_context()),
            config: Arc::new(config),
            db,
            keys,
            federation,
        })
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

    let request_log = api::RequestLogFilter::from_config(&state.config.logging);

    Router::new()
        .merge(api::ops_router())
        .merge(api::wellknown_router())
        .nest("/federation", api::federation_router())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(axum::middleware::from_fn_with_state(
            Arc::new(request_log),
            api::record_request,
        ))
        .with_state(state)
}
