//! Parley Server - direct messaging and presence
//!
//! This crate handles:
//! - One-to-one conversations with per-participant settings
//! - The message lifecycle: send, edit, pin, delete-for-me, unsend
//! - Online presence across multiple devices, with a hidden mode
//! - Real-time fan-out over websockets, with REST reads as a polling fallback

pub mod clock;
pub mod config;
pub mod conversations;
pub mod error;
pub mod events;
pub mod external;
pub mod fanout;
pub mod gate;
pub mod handlers;
pub mod messages;
pub mod models;
pub mod presence;
pub mod realtime;
pub mod storage;

use std::sync::Arc;

use axum::{
    routing::{get, patch, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::realtime::Hub;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub hub: Arc<Hub>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health::health_check))

        // WebSocket for real-time communication
        .route("/ws", get(handlers::websocket::websocket_handler))

        // Conversations
        .route("/api/v1/conversations", get(handlers::conversations::list_conversations))
        .route(
            "/api/v1/conversations/:other_id/messages",
            get(handlers::conversations::list_messages).post(handlers::conversations::send_message),
        )
        .route(
            "/api/v1/conversations/:other_id/messages/search",
            get(handlers::conversations::search_messages),
        )
        .route("/api/v1/conversations/:other_id/media", get(handlers::conversations::list_media))
        .route("/api/v1/conversations/:other_id/pinned", get(handlers::conversations::list_pinned))
        .route("/api/v1/conversations/:other_id/read", post(handlers::conversations::mark_read))
        .route(
            "/api/v1/conversations/:other_id/settings",
            get(handlers::conversations::get_settings).patch(handlers::conversations::update_settings),
        )
        .route("/api/v1/conversations/:other_id/theme", put(handlers::conversations::change_theme))

        // Messages
        .route("/api/v1/messages/unread-count", get(handlers::messages::unread_count))
        .route(
            "/api/v1/messages/:message_id",
            patch(handlers::messages::edit_message).delete(handlers::messages::delete_for_me),
        )
        .route("/api/v1/messages/:message_id/unsend", post(handlers::messages::unsend_message))
        .route(
            "/api/v1/messages/:message_id/pin",
            post(handlers::messages::pin_message).delete(handlers::messages::unpin_message),
        )

        // Presence
        .route("/api/v1/presence/batch", post(handlers::presence::batch_status))
        .route("/api/v1/presence/visibility", put(handlers::presence::set_visibility))
        .route("/api/v1/presence/:user_id", get(handlers::presence::get_status))

        // Add middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
