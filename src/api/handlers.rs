use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use std::sync::Arc;

use crate::api::error::ApiError;
use crate::api::extractor::RequestBody;
use crate::model::{
    document_to_json, documents_to_json, AggregateRequest, AggregateResponse, AggregateSpec,
    CollectionStats, QueryRequest, QueryResponse, QuerySpec,
};
use crate::store::traits::Store;

/// Per-request knobs taken from configuration
#[derive(Debug, Clone, Copy)]
pub struct GatewayOptions {
    pub default_limit: i64,
    pub allow_write_stages: bool,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            default_limit: 50,
            allow_write_stages: true,
        }
    }
}

/// Shared by every request; the store is connected before the router is built
pub struct AppState<S> {
    pub store: Arc<S>,
    pub options: GatewayOptions,
}

impl<S> AppState<S> {
    pub fn new(store: Arc<S>, options: GatewayOptions) -> Self {
        Self { store, options }
    }
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            options: self.options,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
    pub timestamp: String,
}

pub async fn health_check<S: Store>(State(state): State<AppState<S>>) -> (StatusCode, Json<HealthResponse>) {
    let timestamp = chrono::Utc::now().to_rfc3339();
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok".to_string(),
                database: "connected".to_string(),
                timestamp,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "degraded".to_string(),
                database: format!("{:#}", e),
                timestamp,
            }),
        ),
    }
}

pub async fn list_collections<S: Store>(
    State(state): State<AppState<S>>,
) -> Result<Json<Vec<String>>, ApiError> {
    let names = state.store.list_collections().await?;
    Ok(Json(names))
}

/// Count plus one stored document, `_id` included.
///
/// The sample is rendered as relaxed Extended JSON, so an `ObjectId` reads as
/// `{"$oid": "<hex>"}` and a date as `{"$date": ...}` rather than a bare string.
pub async fn collection_stats<S: Store>(
    State(state): State<AppState<S>>,
    Path(name): Path<String>,
) -> Result<Json<CollectionStats>, ApiError> {
    let count = state.store.count_documents(&name, bson::Document::new()).await?;
    let sample = state.store.sample_document(&name).await?.map(document_to_json);
    Ok(Json(CollectionStats { count, sample }))
}

pub async fn query_collection<S: Store>(
    State(state): State<AppState<S>>,
    RequestBody(request): RequestBody<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    let spec = QuerySpec::from_request(request, state.options.default_limit)?;
    log::debug!(
        "query {} filter={} sort={} skip={} limit={}",
        spec.collection,
        spec.filter,
        spec.sort,
        spec.skip,
        spec.limit
    );

    let documents = state.store.find_documents(&spec).await?;
    let total = state
        .store
        .count_documents(&spec.collection, spec.filter.clone())
        .await?;

    Ok(Json(QueryResponse::new(documents, total)))
}

pub async fn export_collection<S: Store>(
    State(state): State<AppState<S>>,
    Path(collection): Path<String>,
) -> Result<Response, ApiError> {
    let documents = state.store.export_documents(&collection).await?;
    log::info!("exporting {} documents from {}", documents.len(), collection);

    let disposition = HeaderValue::from_str(&format!("attachment; filename={}.json", collection))
        .map_err(|e| ApiError::Operation(e.to_string()))?;

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/json")),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Json(documents_to_json(documents)),
    )
        .into_response())
}

pub async fn aggregate_collection<S: Store>(
    State(state): State<AppState<S>>,
    RequestBody(request): RequestBody<AggregateRequest>,
) -> Result<Json<AggregateResponse>, ApiError> {
    let spec = AggregateSpec::from_request(request, state.options.allow_write_stages)?;
    log::debug!("aggregate {} with {} stages", spec.collection, spec.pipeline.len());

    let documents = state.store.aggregate(&spec.collection, spec.pipeline).await?;
    Ok(Json(AggregateResponse::new(documents)))
}
