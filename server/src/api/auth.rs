//! api-key authentication middleware.
//!
//! Grounded on `api/auth.rs`'s `require_auth` middleware shape
//! (a `from_fn_with_state` guard inspecting a header before the handler
//! runs), but engauge has a single configured secret rather than a
//! database of hashed per-organization keys, so the comparison is a
//! constant-time equality check (`subtle::ConstantTimeEq`) against
//! `AppConfig.settings.api_key` instead of an HMAC generate/hash/lookup
//! pipeline.

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use subtle::ConstantTimeEq;

use super::types::ApiError;

const API_KEY_HEADER: &str = "api-key";

#[derive(Clone)]
pub struct AuthState {
    /// `None` when no key is configured — the check is a no-op.
    pub api_key: Option<String>,
    /// `true` in dev mode, where the check is always skipped.
    pub dev_mode: bool,
}

impl AuthState {
    fn required(&self) -> Option<&str> {
        if self.dev_mode { None } else { self.api_key.as_deref() }
    }
}

pub async fn require_api_key(
    State(state): State<AuthState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.required() else {
        return Ok(next.run(request).await);
    };

    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if provided.is_empty() || !bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) {
        return Err(ApiError::Unauthorized);
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_is_none_in_dev_mode() {
        let state = AuthState { api_key: Some("secret".into()), dev_mode: true };
        assert!(state.required().is_none());
    }

    #[test]
    fn required_is_none_without_configured_key() {
        let state = AuthState { api_key: None, dev_mode: false };
        assert!(state.required().is_none());
    }

    #[test]
    fn required_returns_key_in_prod_mode() {
        let state = AuthState { api_key: Some("secret".into()), dev_mode: false };
        assert_eq!(state.required(), Some("secret"));
    }
}
