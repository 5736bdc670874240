pub mod api;
pub mod config;
pub mod logic;
pub mod model;
pub mod seed;
pub mod store;

pub use api::handlers;
pub use api::routes;
pub use api::{build_app, create_router, ApiError, AppState, GatewayOptions};

pub use model::*;

pub use store::{MemoryStore, MongoStore, Store};

use crate::config::{AppConfig, StoreBackend};
use crate::store::traits::HealthStore;
use std::sync::Arc;
use tokio::net::TcpListener;

impl From<&AppConfig> for GatewayOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            default_limit: config.query.default_limit,
            allow_write_stages: config.query.allow_write_stages,
        }
    }
}

/// Connect the configured backend, then serve until the listener fails.
///
/// The store is constructed before the listener is bound, so no request can
/// observe an unset handle. An unreachable MongoDB server is logged and the
/// gateway keeps serving; each request then fails on its own.
pub async fn run_server(config: AppConfig) -> anyhow::Result<()> {
    match config.database.backend {
        StoreBackend::Mongo => {
            let database_url = config.database_url();
            let store = MongoStore::new(&database_url, &config.database.name).await?;
            match store.ping().await {
                Ok(()) => log::info!("Connected to MongoDB database '{}'", config.database.name),
                Err(e) => log::error!("MongoDB connection error: {:#}", e),
            }
            serve(Arc::new(store), &config).await
        }
        StoreBackend::Memory => {
            let store = MemoryStore::new();
            if let Some(seed_file) = &config.database.seed_file {
                let inserted = seed::load_seed_file(&store, seed_file)?;
                log::info!("Loaded {} seed documents from {}", inserted, seed_file);
            }
            log::warn!("Using in-memory store; data is lost on exit");
            serve(Arc::new(store), &config).await
        }
    }
}

async fn serve<S: Store + 'static>(store: Arc<S>, config: &AppConfig) -> anyhow::Result<()> {
    let state = AppState::new(store, GatewayOptions::from(config));
    let app = build_app(state, config.server.static_dir.as_deref());

    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;
    log::info!("Database Admin gateway running on http://{}", bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}
