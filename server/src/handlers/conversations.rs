//! Conversation handlers: polling-fallback reads plus send, settings and theme

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};

use crate::{error::Result, models::*, AppState};

use super::AuthUser;

pub async fn list_conversations(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<ConversationSummary>>> {
    let summaries = state.hub.messages().list_conversations(&auth.user_id).await?;
    Ok(Json(summaries))
}

/// Newest first
pub async fn list_messages(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(other_id): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<Message>>> {
    let messages = state
        .hub
        .messages()
        .list_messages(&auth.user_id, &other_id, &page)
        .await?;
    Ok(Json(messages))
}

pub async fn send_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(other_id): Path<String>,
    Json(body): Json<PostMessageBody>,
) -> Result<(StatusCode, Json<Message>)> {
    let req = SendMessageRequest {
        recipient_id: other_id,
        content: body.content,
        image_urls: body.image_urls,
        reply_to_id: body.reply_to_id,
    };

    let sent = state.hub.send_message(&auth.user_id, req).await?;
    Ok((StatusCode::CREATED, Json(sent.message)))
}

pub async fn search_messages(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(other_id): Path<String>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<Message>>> {
    let found = state
        .hub
        .messages()
        .search(&auth.user_id, &other_id, &query.q, query.limit)
        .await?;
    Ok(Json(found))
}

pub async fn list_media(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(other_id): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<Message>>> {
    let media = state
        .hub
        .messages()
        .media(&auth.user_id, &other_id, page.limit)
        .await?;
    Ok(Json(media))
}

pub async fn list_pinned(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(other_id): Path<String>,
) -> Result<Json<Vec<Message>>> {
    let pinned = state.hub.messages().pinned(&auth.user_id, &other_id).await?;
    Ok(Json(pinned))
}

pub async fn mark_read(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(other_id): Path<String>,
) -> Result<Json<Value>> {
    let receipt = state.hub.mark_read(&auth.user_id, &other_id).await?;
    Ok(Json(json!({
        "conversationId": receipt.conversation_id,
        "readAt": receipt.read_at,
        "count": receipt.count,
    })))
}

pub async fn get_settings(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(other_id): Path<String>,
) -> Result<Json<ConversationSettings>> {
    let settings = state
        .hub
        .conversations()
        .settings_for(&auth.user_id, &other_id)
        .await?;
    Ok(Json(settings))
}

pub async fn update_settings(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(other_id): Path<String>,
    Json(patch): Json<SettingsPatch>,
) -> Result<Json<ConversationSettings>> {
    let settings = state
        .hub
        .update_settings(&auth.user_id, &other_id, &patch)
        .await?;
    Ok(Json(settings))
}

pub async fn change_theme(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(other_id): Path<String>,
    Json(req): Json<ThemeRequest>,
) -> Result<Json<ConversationSettings>> {
    let settings = state
        .hub
        .change_theme(&auth.user_id, &other_id, &req.theme_color)
        .await?;
    Ok(Json(settings))
}
