use axum::{
    Json, debug_handler,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::{
    AppResult, AppState,
    auth::Caller,
    error::ConversationError,
    model::{ConversationId, UserId},
};

/// GET /conversation/{user_a}/{user_b}
/// Returns the pair's conversation, creating it on first contact.
#[debug_handler(state = AppState)]
pub(crate) async fn find_or_create(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path((user_a, user_b)): Path<(UserId, UserId)>,
) -> AppResult<Response> {
    if caller != user_a && caller != user_b {
        return Ok((StatusCode::FORBIDDEN, "not your conversation").into_response());
    }

    let conversation_id = match state.resolver.find_or_create_conversation(user_a, user_b).await {
        Ok(id) => id,
        Err(ConversationError::InvalidParticipants(_)) => {
            return Ok((StatusCode::BAD_REQUEST, "a conversation needs two different users").into_response());
        }
        Err(e) => return Err(e.into()),
    };

    let Some(detail) = state.store.fetch_conversation(conversation_id).await? else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };

    Ok(Json(json!({ "conversation": detail })).into_response())
}

/// GET /conversations/{id}
#[debug_handler(state = AppState)]
pub(crate) async fn show(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(conversation_id): Path<ConversationId>,
) -> AppResult<Response> {
    if !state.resolver.is_active_participant(conversation_id, caller).await? {
        return Ok((StatusCode::FORBIDDEN, "not a participant").into_response());
    }

    let Some(detail) = state.store.fetch_conversation(conversation_id).await? else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };

    Ok(Json(json!({ "conversation": detail })).into_response())
}

/// DELETE /conversations/{id}/participants/me
#[debug_handler(state = AppState)]
pub(crate) async fn leave(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(conversation_id): Path<ConversationId>,
) -> AppResult<StatusCode> {
    if state.store.leave_conversation(conversation_id, caller).await? {
        tracing::info!(user_id = %caller, conversation_id = %conversation_id, "left conversation");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Ok(StatusCode::NOT_FOUND)
    }
}

/// GET /health
#[debug_handler(state = AppState)]
pub(crate) async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "online": state.registry.len(),
        "backlog": state.submitter.backlog(),
    }))
}
