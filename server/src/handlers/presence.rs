//! Presence handlers

use axum::{
    extract::{Path, State},
    Json,
};

use crate::{
    error::{AppError, Result},
    models::*,
    AppState,
};

use super::AuthUser;

const MAX_BATCH_SIZE: usize = 200;

pub async fn get_status(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(user_id): Path<String>,
) -> Result<Json<PresenceStatus>> {
    Ok(Json(state.hub.presence().status_of(&user_id).await))
}

pub async fn batch_status(
    State(state): State<AppState>,
    _auth: AuthUser,
    Json(req): Json<BatchStatusRequest>,
) -> Result<Json<Vec<PresenceStatus>>> {
    if req.user_ids.len() > MAX_BATCH_SIZE {
        return Err(AppError::BadRequest(format!(
            "At most {} users per request",
            MAX_BATCH_SIZE
        )));
    }

    Ok(Json(state.hub.statuses(&req.user_ids).await))
}

pub async fn set_visibility(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<VisibilityRequest>,
) -> Result<Json<PresenceStatus>> {
    let status = state
        .hub
        .set_visibility(&auth.user_id, req.show_online_status)
        .await;
    Ok(Json(status))
}
