//! Authentication middleware
//!
//! Client routes carry a six digit `?code=`; admin routes carry
//! `Authorization: Bearer <admin_token>` when a token is configured.
//! Every rejection produces the same 403 body so callers cannot tell a
//! malformed code from a wrong or locked one.

use axum::{
    extract::{rejection::QueryRejection, Query, Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use serde::Deserialize;
use tracing::warn;

use crate::services::AuthError;
use crate::{ApiError, AppState};

/// Message of the uniform client rejection
pub const INVALID_CODE: &str = "invalid code";

#[derive(Debug, Default, Deserialize)]
pub struct CodeParams {
    #[serde(default)]
    pub code: String,
}

/// Verify `?code=` before any client handler runs
///
/// A query string that does not parse (e.g. a repeated `code`) is rejected
/// like a wrong code.
pub async fn client_code_middleware(
    State(state): State<AppState>,
    params: Result<Query<CodeParams>, QueryRejection>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Ok(Query(params)) = params else {
        return Err(ApiError::Forbidden(INVALID_CODE.to_string()));
    };
    match state.auth.verify(params.code.trim()).await {
        Ok(_) => Ok(next.run(request).await),
        Err(AuthError::Malformed) | Err(AuthError::Denied) => {
            Err(ApiError::Forbidden(INVALID_CODE.to_string()))
        }
        Err(AuthError::Database(e)) => Err(e.into()),
    }
}

/// Check the admin bearer token; open when no token is configured
pub async fn admin_token_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.admin_token.as_deref() else {
        return Ok(next.run(request).await);
    };

    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    if provided == Some(expected) {
        Ok(next.run(request).await)
    } else {
        warn!(path = %request.uri().path(), "Admin request rejected");
        Err(ApiError::Forbidden("invalid admin token".to_string()))
    }
}
