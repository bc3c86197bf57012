//! Message handlers

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};

use crate::{error::Result, events::Ack, models::*, AppState};

use super::{outcome_ack, AuthUser};

pub async fn unread_count(State(state): State<AppState>, auth: AuthUser) -> Result<Json<Value>> {
    let count = state.hub.messages().unread_count(&auth.user_id).await?;
    Ok(Json(json!({ "unreadCount": count })))
}

pub async fn edit_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(message_id): Path<String>,
    Json(req): Json<EditMessageRequest>,
) -> Result<Json<Ack>> {
    let outcome = state
        .hub
        .edit_message(&auth.user_id, &message_id, &req.content)
        .await?;

    Ok(Json(outcome_ack("editMessage", outcome, |m| m.message)))
}

pub async fn unsend_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(message_id): Path<String>,
) -> Result<Json<Ack>> {
    let outcome = state.hub.unsend_message(&auth.user_id, &message_id).await?;
    Ok(Json(outcome_ack("unsendMessage", outcome, |m| m.message)))
}

/// Delete for me
pub async fn delete_for_me(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(message_id): Path<String>,
) -> Result<Json<Ack>> {
    let mutation = state.hub.delete_for_me(&auth.user_id, &message_id).await?;
    Ok(Json(Ack::ok(
        "deleteForMe",
        Some(json!({
            "messageId": mutation.message.id,
            "conversationId": mutation.message.conversation_id,
        })),
    )))
}

pub async fn pin_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(message_id): Path<String>,
) -> Result<Json<Ack>> {
    let outcome = state.hub.pin_message(&auth.user_id, &message_id).await?;
    Ok(Json(outcome_ack("pinMessage", outcome, |m| m.message)))
}

pub async fn unpin_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(message_id): Path<String>,
) -> Result<Json<Ack>> {
    let mutation = state.hub.unpin_message(&auth.user_id, &message_id).await?;
    Ok(Json(Ack::ok(
        "unpinMessage",
        serde_json::to_value(mutation.message).ok(),
    )))
}
