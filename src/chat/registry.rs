use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, watch};
use uuid::Uuid;

use crate::{
    error::TransportError,
    model::{Message, UserId},
};

/// Why a connection is being closed. Transports map this onto their own close codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client went away or the server is shutting the session down.
    Normal,
    /// A newer connection for the same user took over.
    Superseded,
    /// The credentials were missing or invalid.
    Unauthenticated,
    /// A push failed and the dispatcher dropped the connection.
    Evicted,
}

/// Outbound half of a client transport.
#[async_trait]
pub trait FrameSink: Send {
    async fn send_frame(&mut self, message: &Message) -> Result<(), TransportError>;
    async fn close(&mut self, reason: CloseReason);
}

/// Handle to one open transport. Clones share the same transport.
#[derive(Clone)]
pub struct LiveConnection {
    id: Uuid,
    sink: Arc<Mutex<Box<dyn FrameSink>>>,
    closed: Arc<watch::Sender<bool>>,
}

impl LiveConnection {
    pub fn new(sink: impl FrameSink + 'static) -> Self {
        Self {
            id: Uuid::now_v7(),
            sink: Arc::new(Mutex::new(Box::new(sink))),
            closed: Arc::new(watch::Sender::new(false)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once `close` has been called on this connection or any clone of it.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        // the sender is owned by `self`, so this can only return once the flag is set
        let _ = rx.wait_for(|closed| *closed).await;
    }

    pub async fn push(&self, message: &Message) -> Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        sink.send_frame(message).await
    }

    /// Idempotent; only the first call reaches the transport.
    pub async fn close(&self, reason: CloseReason) {
        let mut sink = self.sink.lock().await;
        if self.closed.send_replace(true) {
            return;
        }
        sink.close(reason).await;
    }
}

impl std::fmt::Debug for LiveConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveConnection")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Who is online and where to reach them. At most one connection per user.
///
/// Backed by a sharded map: operations on the same user serialize on that
/// user's shard lock, and no guard is ever held across an await.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<UserId, LiveConnection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace. The superseded connection is returned so the caller can close it.
    pub fn register(&self, user_id: UserId, connection: LiveConnection) -> Option<LiveConnection> {
        let previous = self.connections.insert(user_id, connection);
        tracing::debug!(
            user_id = %user_id,
            replaced = previous.is_some(),
            online = self.connections.len(),
            "connection registered"
        );
        previous
    }

    pub fn lookup(&self, user_id: UserId) -> Option<LiveConnection> {
        self.connections.get(&user_id).map(|entry| entry.value().clone())
    }

    pub fn deregister(&self, user_id: UserId) -> Option<LiveConnection> {
        let removed = self.connections.remove(&user_id).map(|(_, connection)| connection);
        if removed.is_some() {
            tracing::debug!(user_id = %user_id, "connection deregistered");
        }
        removed
    }

    /// Remove the entry only while it still holds `connection`, so tearing down a
    /// superseded connection never removes its replacement.
    pub fn deregister_connection(&self, user_id: UserId, connection: &LiveConnection) -> bool {
        let removed = self
            .connections
            .remove_if(&user_id, |_, current| current.id() == connection.id())
            .is_some();
        if removed {
            tracing::debug!(user_id = %user_id, connection_id = %connection.id(), "connection deregistered");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
