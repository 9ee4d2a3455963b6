use axum::{
    body::Bytes,
    extract::{FromRequest, FromRequestParts, Path, Request},
    http::request::Parts,
};
use serde::de::DeserializeOwned;
use skyway_core::validation::FieldErrors;

use crate::error::AppError;

/// Request body kept raw so handlers decode it only after the caller has
/// been authorized.
#[derive(Debug, Clone, Default)]
pub struct JsonBody(pub Bytes);

impl<S: Send + Sync> FromRequest<S> for JsonBody {
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        Ok(JsonBody(bytes))
    }
}

impl JsonBody {
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, AppError> {
        let raw: &[u8] = if self.0.iter().all(u8::is_ascii_whitespace) {
            b"{}"
        } else {
            &self.0
        };
        serde_json::from_slice(raw).map_err(|e| match missing_field(&e) {
            Some(field) => AppError::Validation(FieldErrors::single(&field, "This field is required.")),
            None => AppError::BadRequest(format!("Malformed JSON body: {}", e)),
        })
    }
}

fn missing_field(err: &serde_json::Error) -> Option<String> {
    let message = err.to_string();
    let rest = message.strip_prefix("missing field `")?;
    let end = rest.find('`')?;
    Some(rest[..end].to_string())
}

/// Numeric row id from the path. Anything else cannot name a row.
#[derive(Debug, Clone, Copy)]
pub struct RowId(pub i64);

impl<S: Send + Sync> FromRequestParts<S> for RowId {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(id) = Path::<i64>::from_request_parts(parts, state)
            .await
            .map_err(|_| AppError::NotFound("Not found.".into()))?;
        Ok(RowId(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Body {
        #[allow(dead_code)]
        companions: i32,
    }

    #[test]
    fn missing_fields_are_field_errors() {
        let body = JsonBody(Bytes::from_static(b"{\"notes\": \"x\"}"));
        match body.parse::<Body>() {
            Err(AppError::Validation(fields)) => assert!(fields.contains("companions")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn malformed_json_is_a_bad_request() {
        let body = JsonBody(Bytes::from_static(b"{\"companions\": "));
        assert!(matches!(body.parse::<Body>(), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn empty_body_reads_as_an_empty_object() {
        let body = JsonBody::default();
        assert!(matches!(body.parse::<Body>(), Err(AppError::Validation(_))));
    }
}
