//! Request authentication.
//!
//! Session issuance lives outside this service; requests present an API key
//! via `X-Api-Key` or `Authorization: Bearer`, resolved to the owning user.

use crate::error::HttpAppError;
use crate::state::AppState;
use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts, HeaderMap};
use skiff_core::models::User;
use skiff_core::AppError;
use std::sync::Arc;

/// Authenticated file owner, extracted per request.
#[derive(Debug, Clone)]
pub struct Owner {
    pub user: User,
}

/// Pull the presented API key out of the request headers, if any.
pub fn api_key_from_headers(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get("x-api-key") {
        if let Ok(key) = value.to_str() {
            return Some(key.trim().to_string());
        }
    }
    if let Some(value) = headers.get(header::AUTHORIZATION) {
        if let Ok(value) = value.to_str() {
            if let Some(key) = value.strip_prefix("Bearer ") {
                return Some(key.trim().to_string());
            }
        }
    }
    None
}

impl FromRequestParts<Arc<AppState>> for Owner {
    type Rejection = HttpAppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let api_key = api_key_from_headers(&parts.headers)
            .ok_or_else(|| AppError::Unauthorized("Missing API key".to_string()))?;

        let user = state
            .db
            .users
            .find_by_api_key(&api_key)
            .await
            .map_err(HttpAppError::from)?
            .ok_or_else(|| AppError::Unauthorized("Invalid API key".to_string()))?;

        Ok(Owner { user })
    }
}

/// Resolve the requester when credentials are optional (public downloads).
pub async fn maybe_owner(state: &Arc<AppState>, headers: &HeaderMap) -> Option<User> {
    let api_key = api_key_from_headers(headers)?;
    state.db.users.find_by_api_key(&api_key).await.ok().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn api_key_header_takes_precedence() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("sk-one"));
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer sk-two"),
        );
        assert_eq!(api_key_from_headers(&headers), Some("sk-one".to_string()));
    }

    #[test]
    fn bearer_token_is_accepted() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer sk-three"),
        );
        assert_eq!(api_key_from_headers(&headers), Some("sk-three".to_string()));
    }

    #[test]
    fn missing_credentials_yield_none() {
        let headers = HeaderMap::new();
        assert_eq!(api_key_from_headers(&headers), None);

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(api_key_from_headers(&headers), None);
    }
}
