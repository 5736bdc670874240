use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, services::ServeDir};

use crate::api::handlers::{self, AppState};
use crate::store::traits::Store;

pub fn create_router<S: Store + 'static>() -> Router<AppState<S>> {
    Router::new()
        .route("/health", get(handlers::health_check::<S>))
        // Collection introspection
        .route("/api/collections", get(handlers::list_collections::<S>))
        .route(
            "/api/collections/:name/stats",
            get(handlers::collection_stats::<S>),
        )
        // Querying
        .route("/api/query", post(handlers::query_collection::<S>))
        .route("/api/aggregate", post(handlers::aggregate_collection::<S>))
        .route(
            "/api/export/:collection",
            get(handlers::export_collection::<S>),
        )
}

/// Full application: API routes, static UI assets and permissive CORS
pub fn build_app<S: Store + 'static>(state: AppState<S>, static_dir: Option<&str>) -> Router {
    let mut router = create_router::<S>();
    if let Some(dir) = static_dir {
        router = router.fallback_service(ServeDir::new(dir));
    }

    router.layer(CorsLayer::permissive()).with_state(state)
}
