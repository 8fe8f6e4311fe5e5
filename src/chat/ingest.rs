use async_trait::async_trait;

use crate::{
    AppState,
    error::TransportError,
    model::{InboundFrame, UserId},
};

use super::registry::{CloseReason, FrameSink, LiveConnection};

/// Inbound half of a client transport.
#[async_trait]
pub trait FrameSource: Send {
    /// The next frame, or `None` once the client has closed the connection.
    /// `TransportError::Malformed` reports a frame that could not be decoded;
    /// the connection is still usable after it.
    async fn receive_frame(&mut self) -> Result<Option<InboundFrame>, TransportError>;
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Rejected,
    Closed,
    TransportFailed,
    /// Evicted by the dispatcher or superseded by a newer session.
    ClosedByServer,
}

/// Drive one client connection from authentication to teardown.
///
/// Every accepted frame is stamped with the connection's user, persisted, and
/// only then handed to the dispatcher. Store failures drop the frame and keep
/// the connection; transport failures end the session. Closing the connection
/// from the server side ends the session without reading further frames.
pub async fn run_session(
    state: &AppState,
    token: Option<&str>,
    mut source: impl FrameSource,
    mut sink: impl FrameSink + 'static,
) -> SessionEnd {
    // Connecting
    let authenticated = match token {
        Some(token) => state.authenticator.authenticate(token),
        None => Err(crate::error::AuthError::Unauthenticated("missing token".to_owned())),
    };
    let user_id = match authenticated {
        Ok(user_id) => user_id,
        Err(e) => {
            tracing::warn!(error = %e, "websocket auth failed");
            sink.close(CloseReason::Unauthenticated).await;
            return SessionEnd::Rejected;
        }
    };

    let connection = LiveConnection::new(sink);
    if let Some(superseded) = state.registry.register(user_id, connection.clone()) {
        tracing::info!(user_id = %user_id, "closing superseded connection");
        superseded.close(CloseReason::Superseded).await;
    }
    tracing::info!(user_id = %user_id, connection_id = %connection.id(), "connection opened");

    // Reading
    let end = loop {
        let received = tokio::select! {
            biased;
            _ = connection.closed() => break SessionEnd::ClosedByServer,
            received = source.receive_frame() => received,
        };
        match received {
            Ok(Some(_)) if connection.is_closed() => break SessionEnd::ClosedByServer,
            Ok(Some(frame)) => accept_frame(state, user_id, frame).await,
            Ok(None) => break SessionEnd::Closed,
            Err(TransportError::Malformed(reason)) => {
                tracing::debug!(user_id = %user_id, reason = %reason, "skipping malformed frame");
            }
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "connection receive error");
                break SessionEnd::TransportFailed;
            }
        }
    };

    // Closed
    state.registry.deregister_connection(user_id, &connection);
    connection.close(CloseReason::Normal).await;
    tracing::info!(user_id = %user_id, connection_id = %connection.id(), end = ?end, "connection closed");
    end
}

/// Frames from users who are not active members of the target conversation
/// are dropped here and never persisted.
async fn accept_frame(state: &AppState, user_id: UserId, frame: InboundFrame) {
    if frame.content.trim().is_empty() {
        tracing::debug!(user_id = %user_id, "skipping empty message");
        return;
    }

    let conversation_id = frame.conversation_id;
    match state.resolver.is_active_participant(conversation_id, user_id).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!(
                user_id = %user_id,
                conversation_id = %conversation_id,
                "sender is not in conversation, dropping message"
            );
            return;
        }
        Err(e) => {
            tracing::warn!(user_id = %user_id, error = %e, "membership check failed, dropping message");
            return;
        }
    }

    let message = match state.store.persist_message(frame.stamp(user_id)).await {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(
                user_id = %user_id,
                conversation_id = %conversation_id,
                error = %e,
                "failed to persist message, dropping it"
            );
            return;
        }
    };

    if let Err(e) = state.submitter.submit(message) {
        tracing::error!(user_id = %user_id, message_id = e.0.id, "dispatcher gone, message not delivered");
    }
}
