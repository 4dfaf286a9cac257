//! Session authentication
//!
//! Every player-facing route carries `x-player-id` and `x-session-token`;
//! both are checked against the store before the handler runs.

use super::{errors::ApiError, handlers::AppState, middleware::RequestId};
use crate::common::types::{Player, PlayerId};
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use std::sync::Arc;

pub const PLAYER_ID_HEADER: &str = "x-player-id";
pub const SESSION_TOKEN_HEADER: &str = "x-session-token";

/// The authenticated caller
#[derive(Debug, Clone)]
pub struct AuthPlayer(pub Player);

/// Credentials from the request headers, if both are present and well formed
pub fn credentials_from_headers(headers: &HeaderMap) -> Option<(PlayerId, String)> {
    let player_id = headers
        .get(PLAYER_ID_HEADER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<PlayerId>()
        .ok()?;
    let token = headers.get(SESSION_TOKEN_HEADER)?.to_str().ok()?;
    Some((player_id, token.to_string()))
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthPlayer {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let request_id = parts
            .extensions
            .get::<RequestId>()
            .map(|id| id.0.clone())
            .unwrap_or_default();

        let Some((player_id, token)) = credentials_from_headers(&parts.headers) else {
            return Err(ApiError::unauthorized(request_id, "missing player credentials"));
        };

        state
            .engine
            .store()
            .authenticate(player_id, &token)
            .map(AuthPlayer)
            .map_err(|e| ApiError::from_bingo(request_id, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_credentials_need_both_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(PLAYER_ID_HEADER, HeaderValue::from_static("7"));
        assert_eq!(credentials_from_headers(&headers), None);

        headers.insert(SESSION_TOKEN_HEADER, HeaderValue::from_static("secret"));
        assert_eq!(credentials_from_headers(&headers), Some((7, "secret".to_string())));

        headers.insert(PLAYER_ID_HEADER, HeaderValue::from_static("seven"));
        assert_eq!(credentials_from_headers(&headers), None);
    }
}
