use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;

use crate::model::NormalizeError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: &str) -> Self {
        Self {
            error: message.to_string(),
        }
    }
}

/// Failure of a single gateway request
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unparseable filter or sort text; answered with 400
    #[error("{0}")]
    ClientInput(String),
    /// Anything else that stopped the request; answered with 500
    #[error("{0}")]
    Operation(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::ClientInput(_) => StatusCode::BAD_REQUEST,
            ApiError::Operation(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<NormalizeError> for ApiError {
    fn from(err: NormalizeError) -> Self {
        if err.is_client_input() {
            ApiError::ClientInput(err.to_string())
        } else {
            ApiError::Operation(err.to_string())
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Operation(format!("{:#}", err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ApiError::ClientInput(message) => log::warn!("rejected request: {}", message),
            ApiError::Operation(message) => log::error!("request failed: {}", message),
        }
        (status, Json(ErrorResponse::new(&self.to_string()))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::normalize::{normalize_document, normalize_pipeline, SpecField};

    #[test]
    fn normalize_errors_are_client_errors() {
        let raw = serde_json::json!("not json");
        let err: ApiError = normalize_document(SpecField::Query, Some(&raw)).unwrap_err().into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("Invalid JSON query"));
    }

    #[test]
    fn other_request_problems_are_operation_errors() {
        let raw = serde_json::json!("[{");
        let err: ApiError = normalize_pipeline(Some(&raw)).unwrap_err().into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.to_string().starts_with("Invalid JSON pipeline"));

        let err: ApiError = NormalizeError::MissingCollection.into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "collection is required");
    }

    #[test]
    fn store_errors_keep_the_underlying_message() {
        let source = anyhow::anyhow!("ns does not exist").context("aggregate failed");
        let err: ApiError = source.into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "aggregate failed: ns does not exist");
    }
}
