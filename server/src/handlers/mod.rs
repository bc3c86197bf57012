//! HTTP request handlers for Parley Server

pub mod conversations;
pub mod health;
pub mod messages;
pub mod presence;
pub mod websocket;

use axum::{extract::FromRequestParts, http::request::Parts};
use serde::Serialize;

use crate::{error::AppError, events::Ack, messages::Outcome, AppState};

/// Caller identity, set by the upstream gateway in the configured header
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(state.config.server.user_header.as_str())
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(AppError::Unauthorized)?;

        Ok(AuthUser {
            user_id: user_id.to_string(),
        })
    }
}

/// Rejections are ordinary results on REST: 200 with `success: false`
pub(crate) fn outcome_ack<T, D>(action: &str, outcome: Outcome<T>, data: impl FnOnce(T) -> D) -> Ack
where
    D: Serialize,
{
    match outcome {
        Outcome::Applied(value) => Ack::ok(action, serde_json::to_value(data(value)).ok()),
        Outcome::Rejected(rejection) => rejection.to_ack(action),
    }
}
