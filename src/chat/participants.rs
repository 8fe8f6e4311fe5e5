use std::{collections::HashSet, sync::Arc};

use crate::{
    error::{ConversationError, ResolveError},
    model::{ConversationId, UserId},
    store::Store,
};

/// Answers "who else is in this conversation right now".
#[derive(Clone)]
pub struct ParticipantResolver {
    store: Arc<dyn Store>,
}

impl ParticipantResolver {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Active members of the conversation other than `exclude`. Empty when nobody else is there.
    pub async fn resolve(
        &self,
        conversation_id: ConversationId,
        exclude: UserId,
    ) -> Result<HashSet<UserId>, ResolveError> {
        let memberships = self.store.query_active_memberships(conversation_id).await?;
        Ok(memberships
            .into_iter()
            .filter(|m| m.is_active() && m.user_id != exclude)
            .map(|m| m.user_id)
            .collect())
    }

    pub async fn is_active_participant(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<bool, ResolveError> {
        let memberships = self.store.query_active_memberships(conversation_id).await?;
        Ok(memberships.iter().any(|m| m.is_active() && m.user_id == user_id))
    }

    /// The conversation held by exactly these two users, created if missing.
    ///
    /// Two concurrent calls for the same pair can both miss the lookup and each
    /// create a conversation. The duplicate is harmless and is left in place.
    pub async fn find_or_create_conversation(
        &self,
        user_a: UserId,
        user_b: UserId,
    ) -> Result<ConversationId, ConversationError> {
        if user_a == user_b {
            return Err(ConversationError::InvalidParticipants(user_a));
        }

        if let Some(id) = self.store.find_conversation_between(user_a, user_b).await? {
            return Ok(id);
        }

        let conversation = self
            .store
            .create_conversation_with_participants(user_a, user_b)
            .await?;
        tracing::info!(
            conversation_id = %conversation.id,
            user_a = %user_a,
            user_b = %user_b,
            "conversation created"
        );
        Ok(conversation.id)
    }
}
