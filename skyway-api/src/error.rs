use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use skyway_core::access::AccessError;
use skyway_core::models::TransitionError;
use skyway_core::repository::StoreError;
use skyway_core::validation::FieldErrors;
use skyway_core::CoreError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Validation failed")]
    Validation(FieldErrors),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthenticated(String),
    #[error("forbidden")]
    Forbidden,
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn not_found(what: &str) -> Self {
        AppError::NotFound(format!("{} not found", what))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::Validation(fields) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "Validation failed", "fields": fields }),
            ),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            AppError::Unauthenticated(msg) => (StatusCode::UNAUTHORIZED, json!({ "error": msg })),
            AppError::Forbidden => (StatusCode::FORBIDDEN, json!({ "error": "forbidden" })),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            AppError::Internal(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal Server Error" }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<FieldErrors> for AppError {
    fn from(fields: FieldErrors) -> Self {
        AppError::Validation(fields)
    }
}

impl From<TransitionError> for AppError {
    fn from(err: TransitionError) -> Self {
        AppError::Validation(err.into())
    }
}

impl From<AccessError> for AppError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::Unauthenticated => AppError::Unauthenticated(err.to_string()),
            AccessError::Forbidden => AppError::Forbidden,
        }
    }
}

/// Constraint violations are the caller's fault and come back in the
/// validation shape.
impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation { field } => {
                let message = format!("A record with this {} already exists.", field.replace('_', " "));
                AppError::Validation(FieldErrors::single(&field, message))
            }
            StoreError::ForeignKeyViolation { field } => {
                AppError::Validation(FieldErrors::single(&field, "Invalid pk - object does not exist."))
            }
            StoreError::Restricted { field } => AppError::Validation(FieldErrors::single(
                &field,
                format!("Cannot delete: still referenced by {}.", field.replace('_', " ")),
            )),
            StoreError::Backend(msg) => AppError::Internal(msg),
        }
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(fields) => AppError::Validation(fields),
            CoreError::Access(e) => e.into(),
            CoreError::NotFound(what) => AppError::not_found(what),
            CoreError::Store(e) => e.into(),
            CoreError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(format!("failed to serialize response: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_violation_reports_on_the_field() {
        let err = AppError::from(StoreError::UniqueViolation {
            field: "code".into(),
        });
        match err {
            AppError::Validation(fields) => assert!(fields.contains("code")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn statuses() {
        assert_eq!(AppError::Forbidden.into_response().status(), StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::from(AccessError::Unauthenticated).into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::from(StoreError::Backend("down".into())).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
