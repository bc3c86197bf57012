//! WebSocket handler for real-time communication

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    events::{Ack, ClientCommand, ClientFrame, ServerEvent},
    AppState,
};

use super::{outcome_ack, AuthUser};

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    auth: AuthUser,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, auth.user_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: String) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let conn_id = Uuid::new_v4().to_string();

    // Channel for sending events to this client
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    // Task to forward events from channel to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if ws_sender.send(WsMessage::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!("Failed to encode {}: {}", event.name(), e),
            }
        }
    });

    state.hub.connect(&conn_id, &user_id, tx.clone()).await;
    tracing::info!("WebSocket connected: user={}, conn={}", user_id, conn_id);

    // Handle incoming frames
    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(WsMessage::Text(text)) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(frame) => {
                    let action = frame.command.action();
                    let reply = match dispatch(&state, &user_id, &conn_id, frame.command).await {
                        Ok(Some(ack)) => Some(ack),
                        Ok(None) => None,
                        Err(e) => Some(Ack::failed(action, e.public_message())),
                    };

                    if let Some(ack) = reply {
                        let _ = tx.send(ServerEvent::Ack(ack.with_request_id(frame.request_id)));
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to parse WebSocket message: {}", e);
                    let _ = tx.send(ServerEvent::Error {
                        code: "PARSE_ERROR".to_string(),
                        message: format!("Invalid message format: {}", e),
                    });
                }
            },
            Ok(WsMessage::Binary(_)) => {
                let _ = tx.send(ServerEvent::Error {
                    code: "UNSUPPORTED".to_string(),
                    message: "Binary frames are not supported".to_string(),
                });
            }
            Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) => {
                // Handled by the WebSocket library
            }
            Ok(WsMessage::Close(_)) => {
                break;
            }
            Err(e) => {
                tracing::warn!("WebSocket error: {}", e);
                break;
            }
        }
    }

    // Cleanup
    state.hub.disconnect(&conn_id).await;
    tracing::info!("WebSocket disconnected: user={}, conn={}", user_id, conn_id);

    send_task.abort();
}

/// Runs one command; `None` means the command has no ack (pong is its own reply)
async fn dispatch(
    state: &AppState,
    user_id: &str,
    conn_id: &str,
    command: ClientCommand,
) -> Result<Option<Ack>> {
    let hub = &state.hub;
    let action = command.action();

    let ack = match command {
        ClientCommand::SendMessage(req) => {
            let sent = hub.send_message(user_id, req).await?;
            Ack::ok(action, Some(json!({ "messageId": sent.message.id })))
        }

        ClientCommand::EditMessage { message_id, content } => {
            let outcome = hub.edit_message(user_id, &message_id, &content).await?;
            outcome_ack(action, outcome, |m| json!({ "messageId": m.message.id }))
        }

        ClientCommand::UnsendMessage { message_id } => {
            let outcome = hub.unsend_message(user_id, &message_id).await?;
            outcome_ack(action, outcome, |m| json!({ "messageId": m.message.id }))
        }

        ClientCommand::DeleteForMe { message_id } => {
            hub.delete_for_me(user_id, &message_id).await?;
            Ack::ok(action, Some(json!({ "messageId": message_id })))
        }

        ClientCommand::PinMessage { message_id } => {
            let outcome = hub.pin_message(user_id, &message_id).await?;
            outcome_ack(action, outcome, |m| json!({ "messageId": m.message.id }))
        }

        ClientCommand::UnpinMessage { message_id } => {
            hub.unpin_message(user_id, &message_id).await?;
            Ack::ok(action, Some(json!({ "messageId": message_id })))
        }

        ClientCommand::MarkRead { other_user_id } => {
            let receipt = hub.mark_read(user_id, &other_user_id).await?;
            Ack::ok(action, Some(json!({ "count": receipt.count })))
        }

        ClientCommand::Typing { recipient_id, is_typing } => {
            hub.typing(user_id, &recipient_id, is_typing)?;
            return Ok(None);
        }

        ClientCommand::ChangeTheme {
            other_user_id,
            theme_color,
        } => {
            let settings = hub.change_theme(user_id, &other_user_id, &theme_color).await?;
            Ack::ok(action, serde_json::to_value(settings).ok())
        }

        ClientCommand::UpdateSettings {
            other_user_id,
            settings,
        } => {
            let settings = hub.update_settings(user_id, &other_user_id, &settings).await?;
            Ack::ok(action, serde_json::to_value(settings).ok())
        }

        ClientCommand::SubscribeStatus { user_id: target } => {
            if target.trim().is_empty() {
                return Err(AppError::BadRequest("userId is required".to_string()));
            }
            let status = hub.subscribe_status(conn_id, &target).await;
            Ack::ok(action, serde_json::to_value(status).ok())
        }

        ClientCommand::UnsubscribeStatus { user_id: target } => {
            hub.unsubscribe_status(conn_id, &target);
            Ack::ok(action, None)
        }

        ClientCommand::GetStatuses { user_ids } => {
            let statuses = hub.statuses(&user_ids).await;
            Ack::ok(action, serde_json::to_value(statuses).ok())
        }

        ClientCommand::SetVisibility { show_online_status } => {
            let status = hub.set_visibility(user_id, show_online_status).await;
            Ack::ok(action, serde_json::to_value(status).ok())
        }

        ClientCommand::Ping => {
            hub.broadcaster().send_to_connection(conn_id, ServerEvent::Pong);
            return Ok(None);
        }
    };

    Ok(Some(ack))
}
