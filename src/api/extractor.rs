use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;

use crate::api::error::ApiError;

/// JSON request body whose rejections are answered with the gateway's
/// `{"error": ...}` body instead of axum's plain-text response.
///
/// A body that is missing, mistyped or not declared as JSON never reaches the
/// store and is reported as a 500 like every other failure outside the
/// filter/sort parsing step.
pub struct RequestBody<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for RequestBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(ApiError::from(rejection)),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Operation(rejection.body_text())
    }
}
