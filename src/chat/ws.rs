use async_trait::async_trait;
use axum::{
    debug_handler,
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{CloseFrame, Message as WsMessage, WebSocket},
    },
    response::Response,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use serde::Deserialize;

use crate::{
    AppState,
    error::TransportError,
    model::{InboundFrame, Message},
};

use super::{
    ingest::{self, FrameSource},
    registry::{CloseReason, FrameSink},
};

pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_INTERNAL: u16 = 1011;
pub const CLOSE_SUPERSEDED: u16 = 4000;
pub const CLOSE_UNAUTHENTICATED: u16 = 4001;

#[derive(Debug, Deserialize)]
pub(crate) struct WsQuery {
    token: Option<String>,
}

/// GET /ws?token=JWT
#[debug_handler(state = AppState)]
pub(crate) async fn chat_ws(
    State(state): State<AppState>,
    Query(WsQuery { token }): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        let (sender, receiver) = socket.split();
        ingest::run_session(&state, token.as_deref(), WsSource(receiver), WsSink(sender)).await;
    })
}

pub struct WsSource(pub SplitStream<WebSocket>);

#[async_trait]
impl FrameSource for WsSource {
    async fn receive_frame(&mut self) -> Result<Option<InboundFrame>, TransportError> {
        loop {
            let msg = match self.0.next().await {
                None => return Ok(None),
                Some(Err(e)) => return Err(TransportError::Io(e.to_string())),
                Some(Ok(msg)) => msg,
            };

            return match msg {
                WsMessage::Text(text) => serde_json::from_str(text.as_str())
                    .map(Some)
                    .map_err(|e| TransportError::Malformed(e.to_string())),
                WsMessage::Binary(data) => serde_json::from_slice(&data)
                    .map(Some)
                    .map_err(|e| TransportError::Malformed(e.to_string())),
                WsMessage::Close(_) => Ok(None),
                // axum answers pings itself
                WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
            };
        }
    }
}

pub struct WsSink(pub SplitSink<WebSocket, WsMessage>);

#[async_trait]
impl FrameSink for WsSink {
    async fn send_frame(&mut self, message: &Message) -> Result<(), TransportError> {
        let json = serde_json::to_string(message).map_err(|e| TransportError::Io(e.to_string()))?;
        self.0
            .send(WsMessage::Text(json.into()))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn close(&mut self, reason: CloseReason) {
        let (code, text) = match reason {
            CloseReason::Normal => (CLOSE_NORMAL, "bye"),
            CloseReason::Superseded => (CLOSE_SUPERSEDED, "Connected elsewhere"),
            CloseReason::Unauthenticated => (CLOSE_UNAUTHENTICATED, "Token invalid"),
            CloseReason::Evicted => (CLOSE_INTERNAL, "Delivery failed"),
        };
        let frame = CloseFrame {
            code,
            reason: text.into(),
        };
        if let Err(e) = self.0.send(WsMessage::Close(Some(frame))).await {
            tracing::debug!(error = %e, ?reason, "close frame not sent");
        }
        if let Err(e) = self.0.close().await {
            tracing::debug!(error = %e, "websocket close failed");
        }
    }
}
