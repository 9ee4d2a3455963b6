use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::future::Future;

use crate::error::AppError;
use crate::state::AppState;

/// Serialized JSON body with its status. Cached and freshly computed
/// responses go through the same path so their bytes are identical.
pub fn json_response(status: StatusCode, body: String) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
        body,
    )
        .into_response()
}

pub fn to_json<T: Serialize>(value: &T) -> Result<String, AppError> {
    Ok(serde_json::to_string(value)?)
}

pub fn ok<T: Serialize>(value: &T) -> Result<Response, AppError> {
    Ok(json_response(StatusCode::OK, to_json(value)?))
}

pub fn created<T: Serialize>(value: &T) -> Result<Response, AppError> {
    Ok(json_response(StatusCode::CREATED, to_json(value)?))
}

pub fn no_content() -> Response {
    StatusCode::NO_CONTENT.into_response()
}

/// Serves `key` from the response cache, rendering it with `render` on a miss.
pub async fn cached<F, Fut>(state: &AppState, key: String, render: F) -> Result<Response, AppError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<String, AppError>>,
{
    let body = state.cache.get_or_compute(&key, render).await?;
    Ok(json_response(StatusCode::OK, body))
}
