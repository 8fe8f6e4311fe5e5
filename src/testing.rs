//! In-process doubles for the store and transports, shared by unit tests.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::mpsc;

use crate::{
    chat::{
        ingest::FrameSource,
        registry::{CloseReason, FrameSink},
    },
    error::{StoreError, TransportError},
    model::{
        Conversation, ConversationDetail, ConversationId, InboundFrame, Message, NewMessage, ParticipantMembership,
        UserId,
    },
    store::Store,
};

pub fn message(id: i64, conversation: i64, sender: i64, content: &str) -> Message {
    Message {
        id,
        conversation_id: ConversationId(conversation),
        sender_id: UserId(sender),
        content: content.to_owned(),
        created_at: OffsetDateTime::UNIX_EPOCH,
    }
}

pub fn frame(conversation: i64, content: &str) -> InboundFrame {
    InboundFrame {
        conversation_id: ConversationId(conversation),
        content: content.to_owned(),
    }
}

#[derive(Clone, Default)]
pub struct RecordingSink {
    sent: Arc<Mutex<Vec<Message>>>,
    closes: Arc<Mutex<Vec<CloseReason>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingSink {
    pub fn failing() -> Self {
        let sink = Self::default();
        sink.failing.store(true, Ordering::SeqCst);
        sink
    }

    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }

    pub fn contents(&self) -> Vec<String> {
        self.sent().into_iter().map(|m| m.content).collect()
    }

    pub fn close_reasons(&self) -> Vec<CloseReason> {
        self.closes.lock().unwrap().clone()
    }
}

#[async_trait]
impl FrameSink for RecordingSink {
    async fn send_frame(&mut self, message: &Message) -> Result<(), TransportError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Io("broken pipe".to_owned()));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn close(&mut self, reason: CloseReason) {
        self.closes.lock().unwrap().push(reason);
    }
}

/// Replays a fixed script, then reports the connection closed.
pub struct ScriptedSource {
    script: VecDeque<Result<Option<InboundFrame>, TransportError>>,
}

impl ScriptedSource {
    pub fn new(script: impl IntoIterator<Item = Result<Option<InboundFrame>, TransportError>>) -> Self {
        Self {
            script: script.into_iter().collect(),
        }
    }

    pub fn closed() -> Self {
        Self {
            script: VecDeque::new(),
        }
    }
}

#[async_trait]
impl FrameSource for ScriptedSource {
    async fn receive_frame(&mut self) -> Result<Option<InboundFrame>, TransportError> {
        self.script.pop_front().unwrap_or(Ok(None))
    }
}

/// Frames fed by the test while the session runs. Dropping the sender closes it.
pub struct ChannelSource {
    rx: mpsc::UnboundedReceiver<Result<Option<InboundFrame>, TransportError>>,
}

impl ChannelSource {
    pub fn new() -> (mpsc::UnboundedSender<Result<Option<InboundFrame>, TransportError>>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }
}

#[async_trait]
impl FrameSource for ChannelSource {
    async fn receive_frame(&mut self) -> Result<Option<InboundFrame>, TransportError> {
        self.rx.recv().await.unwrap_or(Ok(None))
    }
}

#[derive(Default)]
struct Tables {
    conversations: Vec<Conversation>,
    memberships: Vec<ParticipantMembership>,
    messages: Vec<Message>,
}

/// A `Store` held in memory, with a switch to simulate an outage.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    offline: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Seed a conversation with a fixed id and active members.
    pub fn add_conversation(&self, id: i64, members: &[i64]) {
        let mut tables = self.tables.lock().unwrap();
        tables.conversations.push(Conversation {
            id: ConversationId(id),
            created_at: OffsetDateTime::UNIX_EPOCH,
            deleted_at: None,
        });
        for member in members {
            tables.memberships.push(ParticipantMembership {
                conversation_id: ConversationId(id),
                user_id: UserId(*member),
                joined_at: OffsetDateTime::UNIX_EPOCH,
                left_at: None,
            });
        }
    }

    pub fn add_departed(&self, conversation: i64, user: i64) {
        self.tables.lock().unwrap().memberships.push(ParticipantMembership {
            conversation_id: ConversationId(conversation),
            user_id: UserId(user),
            joined_at: OffsetDateTime::UNIX_EPOCH,
            left_at: Some(OffsetDateTime::UNIX_EPOCH),
        });
    }

    pub fn messages(&self) -> Vec<Message> {
        self.tables.lock().unwrap().messages.clone()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Offline("memory store switched off".to_owned()));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn persist_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        self.check()?;
        let mut tables = self.tables.lock().unwrap();
        let persisted = Message {
            id: tables.messages.len() as i64 + 1,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            content: message.content,
            created_at: OffsetDateTime::now_utc(),
        };
        tables.messages.push(persisted.clone());
        Ok(persisted)
    }

    async fn query_active_memberships(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<ParticipantMembership>, StoreError> {
        self.check()?;
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .memberships
            .iter()
            .filter(|m| m.conversation_id == conversation_id && m.is_active())
            .cloned()
            .collect())
    }

    async fn create_conversation_with_participants(
        &self,
        user_a: UserId,
        user_b: UserId,
    ) -> Result<Conversation, StoreError> {
        self.check()?;
        let mut tables = self.tables.lock().unwrap();
        let id = ConversationId(tables.conversations.iter().map(|c| c.id.0).max().unwrap_or(0) + 1);
        let conversation = Conversation {
            id,
            created_at: OffsetDateTime::now_utc(),
            deleted_at: None,
        };
        tables.conversations.push(conversation.clone());
        for user_id in [user_a, user_b] {
            tables.memberships.push(ParticipantMembership {
                conversation_id: id,
                user_id,
                joined_at: conversation.created_at,
                left_at: None,
            });
        }
        Ok(conversation)
    }

    async fn find_conversation_between(
        &self,
        user_a: UserId,
        user_b: UserId,
    ) -> Result<Option<ConversationId>, StoreError> {
        self.check()?;
        let tables = self.tables.lock().unwrap();
        Ok(tables.conversations.iter().map(|c| c.id).find(|id| {
            let mut active: Vec<UserId> = tables
                .memberships
                .iter()
                .filter(|m| m.conversation_id == *id && m.is_active())
                .map(|m| m.user_id)
                .collect();
            active.sort();
            let mut pair = vec![user_a, user_b];
            pair.sort();
            active == pair
        }))
    }

    async fn fetch_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Option<ConversationDetail>, StoreError> {
        self.check()?;
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .conversations
            .iter()
            .find(|c| c.id == conversation_id)
            .map(|conversation| ConversationDetail {
                conversation: conversation.clone(),
                participants: tables
                    .memberships
                    .iter()
                    .filter(|m| m.conversation_id == conversation_id)
                    .cloned()
                    .collect(),
                messages: tables
                    .messages
                    .iter()
                    .filter(|m| m.conversation_id == conversation_id)
                    .cloned()
                    .collect(),
            }))
    }

    async fn leave_conversation(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<bool, StoreError> {
        self.check()?;
        let mut tables = self.tables.lock().unwrap();
        let membership = tables
            .memberships
            .iter_mut()
            .find(|m| m.conversation_id == conversation_id && m.user_id == user_id && m.is_active());
        Ok(match membership {
            Some(membership) => {
                membership.left_at = Some(OffsetDateTime::now_utc());
                true
            }
            None => false,
        })
    }
}
