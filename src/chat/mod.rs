pub mod dispatcher;
pub mod ingest;
pub mod participants;
pub mod registry;
pub mod ws;

mod conversation;

use axum::{
    Router,
    routing::{delete, get},
};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::chat_ws))
        .route("/health", get(conversation::health))
        .route("/conversation/{user_a}/{user_b}", get(conversation::find_or_create))
        .route("/conversations/{id}", get(conversation::show))
        .route("/conversations/{id}/participants/me", delete(conversation::leave))
}
