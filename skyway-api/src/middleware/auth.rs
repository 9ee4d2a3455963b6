use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use skyway_core::access::{self, Caller, Resource, Role, Scope};
use std::convert::Infallible;
use tracing::debug;

use crate::error::AppError;
use crate::state::AppState;

// ============================================================================
// JWT Claims
// ============================================================================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Numeric user id.
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    pub role: String,
    pub exp: usize,
}

impl Claims {
    pub fn caller(&self) -> Option<Caller> {
        let user_id = self.sub.parse::<i64>().ok()?;
        let role = self.role.parse::<Role>().ok()?;
        Some(Caller { user_id, role })
    }
}

// ============================================================================
// Authentication Middleware
// ============================================================================

/// Requests without an `Authorization` header continue anonymously. A header
/// that is present but does not carry a valid bearer token is rejected.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(auth_header) = req.headers().get(header::AUTHORIZATION) else {
        return Ok(next.run(req).await);
    };

    let token = auth_header
        .to_str()
        .ok()
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::Unauthenticated("Invalid authorization header".into()))?;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.auth.secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| {
        debug!(error = %e, "rejected bearer token");
        AppError::Unauthenticated("Invalid or expired token".into())
    })?;

    let caller = token_data
        .claims
        .caller()
        .ok_or_else(|| AppError::Unauthenticated("Invalid token claims".into()))?;

    req.extensions_mut().insert(caller);
    Ok(next.run(req).await)
}

// ============================================================================
// Identity Extractor
// ============================================================================

/// The caller established by [`auth_middleware`], or anonymous.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity(pub Option<Caller>);

impl Identity {
    pub fn caller(&self) -> Option<&Caller> {
        self.0.as_ref()
    }

    pub fn authorize(&self, resource: Resource, action: &str) -> Result<(), AppError> {
        access::authorize(self.caller(), resource, action).map_err(AppError::from)
    }

    pub fn scope(&self) -> Scope {
        access::scope(self.caller())
    }

    pub fn is_admin(&self) -> bool {
        self.0.is_some_and(|c| c.is_admin())
    }

    /// The signed-in caller; handlers call this after `authorize` passed.
    pub fn require(&self) -> Result<Caller, AppError> {
        self.0.ok_or_else(|| AppError::from(access::AccessError::Unauthenticated))
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Identity(parts.extensions.get::<Caller>().copied()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(sub: &str, role: &str) -> Claims {
        Claims {
            sub: sub.to_string(),
            email: None,
            role: role.to_string(),
            exp: 0,
        }
    }

    #[test]
    fn claims_map_to_a_caller() {
        let caller = claims("42", "ADMIN").caller().unwrap();
        assert_eq!(caller.user_id, 42);
        assert!(caller.is_admin());
        assert!(claims("abc", "USER").caller().is_none());
        assert!(claims("1", "CUSTOMER").caller().is_none());
    }

    #[test]
    fn anonymous_identity_has_no_scope() {
        let anon = Identity::default();
        assert_eq!(anon.scope(), Scope::Nothing);
        assert!(!anon.is_admin());
        assert!(anon.require().is_err());
    }
}
