use async_trait::async_trait;
use sqlx::SqlitePool;
use time::OffsetDateTime;

use crate::{
    error::StoreError,
    model::{Conversation, ConversationDetail, ConversationId, Message, NewMessage, ParticipantMembership, UserId},
};

/// Durable storage for conversations, memberships and messages.
#[async_trait]
pub trait Store: Send + Sync {
    /// Persist a message and return it with its assigned id.
    async fn persist_message(&self, message: NewMessage) -> Result<Message, StoreError>;

    /// Memberships of a live conversation whose `left_at` is unset.
    async fn query_active_memberships(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<ParticipantMembership>, StoreError>;

    /// Create a conversation and two active memberships in one transaction.
    async fn create_conversation_with_participants(
        &self,
        user_a: UserId,
        user_b: UserId,
    ) -> Result<Conversation, StoreError>;

    /// A live conversation whose only active participants are exactly `user_a` and `user_b`.
    async fn find_conversation_between(
        &self,
        user_a: UserId,
        user_b: UserId,
    ) -> Result<Option<ConversationId>, StoreError>;

    async fn fetch_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Option<ConversationDetail>, StoreError>;

    /// Close the user's active membership. Returns false when there was none.
    async fn leave_conversation(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<bool, StoreError>;
}

#[derive(Clone)]
pub struct SqliteStore {
    db_pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn persist_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let created_at = OffsetDateTime::now_utc();
        let result = sqlx::query("INSERT INTO messages (conversation_id,sender_id,content,created_at) VALUES (?,?,?,?)")
            .bind(message.conversation_id)
            .bind(message.sender_id)
            .bind(&message.content)
            .bind(created_at)
            .execute(&self.db_pool)
            .await?;

        Ok(Message {
            id: result.last_insert_rowid(),
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            content: message.content,
            created_at,
        })
    }

    async fn query_active_memberships(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<ParticipantMembership>, StoreError> {
        let memberships = sqlx::query_as::<_, ParticipantMembership>(
            "SELECT p.conversation_id AS conversation_id,p.user_id AS user_id,
                    p.joined_at AS joined_at,p.left_at AS left_at
             FROM conversation_participants p
             JOIN conversations c ON c.id = p.conversation_id
             WHERE p.conversation_id=? AND p.left_at IS NULL AND c.deleted_at IS NULL",
        )
        .bind(conversation_id)
        .fetch_all(&self.db_pool)
        .await?;

        Ok(memberships)
    }

    async fn create_conversation_with_participants(
        &self,
        user_a: UserId,
        user_b: UserId,
    ) -> Result<Conversation, StoreError> {
        let now = OffsetDateTime::now_utc();
        let mut tx = self.db_pool.begin().await?;

        let id = sqlx::query("INSERT INTO conversations (created_at) VALUES (?)")
            .bind(now)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

        for user_id in [user_a, user_b] {
            sqlx::query("INSERT INTO conversation_participants (conversation_id,user_id,joined_at) VALUES (?,?,?)")
                .bind(id)
                .bind(user_id)
                .bind(now)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        Ok(Conversation {
            id: ConversationId(id),
            created_at: now,
            deleted_at: None,
        })
    }

    async fn find_conversation_between(
        &self,
        user_a: UserId,
        user_b: UserId,
    ) -> Result<Option<ConversationId>, StoreError> {
        let found: Option<(ConversationId,)> = sqlx::query_as(
            "SELECT c.id AS id FROM conversations c
             WHERE c.deleted_at IS NULL
               AND EXISTS (SELECT 1 FROM conversation_participants p
                           WHERE p.conversation_id=c.id AND p.user_id=? AND p.left_at IS NULL)
               AND EXISTS (SELECT 1 FROM conversation_participants p
                           WHERE p.conversation_id=c.id AND p.user_id=? AND p.left_at IS NULL)
               AND (SELECT COUNT(*) FROM conversation_participants p
                    WHERE p.conversation_id=c.id AND p.left_at IS NULL) = 2
             ORDER BY c.id
             LIMIT 1",
        )
        .bind(user_a)
        .bind(user_b)
        .fetch_optional(&self.db_pool)
        .await?;

        Ok(found.map(|(id,)| id))
    }

    async fn fetch_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Option<ConversationDetail>, StoreError> {
        let Some(conversation) = sqlx::query_as::<_, Conversation>(
            "SELECT id,created_at,deleted_at FROM conversations WHERE id=? AND deleted_at IS NULL",
        )
        .bind(conversation_id)
        .fetch_optional(&self.db_pool)
        .await?
        else {
            return Ok(None);
        };

        let participants = sqlx::query_as::<_, ParticipantMembership>(
            "SELECT conversation_id,user_id,joined_at,left_at FROM conversation_participants
             WHERE conversation_id=? ORDER BY joined_at,user_id",
        )
        .bind(conversation_id)
        .fetch_all(&self.db_pool)
        .await?;

        let messages = sqlx::query_as::<_, Message>(
            "SELECT id,conversation_id,sender_id,content,created_at FROM messages
             WHERE conversation_id=? ORDER BY id",
        )
        .bind(conversation_id)
        .fetch_all(&self.db_pool)
        .await?;

        Ok(Some(ConversationDetail {
            conversation,
            participants,
            messages,
        }))
    }

    async fn leave_conversation(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE conversation_participants SET left_at=?
             WHERE conversation_id=? AND user_id=? AND left_at IS NULL",
        )
        .bind(OffsetDateTime::now_utc())
        .bind(conversation_id)
        .bind(user_id)
        .execute(&self.db_pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    async fn store() -> SqliteStore {
        let db_pool = db::connect("sqlite::memory:", 1).await.unwrap();
        db::init_schema(&db_pool).await.unwrap();
        SqliteStore::new(db_pool)
    }

    #[tokio::test]
    async fn persisted_messages_get_increasing_ids() {
        let store = store().await;
        let conversation = store
            .create_conversation_with_participants(UserId(1), UserId(2))
            .await
            .unwrap();

        let first = store
            .persist_message(NewMessage {
                conversation_id: conversation.id,
                sender_id: UserId(1),
                content: "hi".to_owned(),
            })
            .await
            .unwrap();
        let second = store
            .persist_message(NewMessage {
                conversation_id: conversation.id,
                sender_id: UserId(2),
                content: "hello".to_owned(),
            })
            .await
            .unwrap();

        assert!(second.id > first.id);

        let detail = store.fetch_conversation(conversation.id).await.unwrap().unwrap();
        let ids: Vec<i64> = detail.messages.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
        assert_eq!(detail.messages[0].content, "hi");
        assert_eq!(detail.messages[1].sender_id, UserId(2));
        assert_eq!(detail.participants.len(), 2);
    }

    #[tokio::test]
    async fn departed_members_are_not_active() {
        let store = store().await;
        let conversation = store
            .create_conversation_with_participants(UserId(1), UserId(2))
            .await
            .unwrap();

        assert!(store.leave_conversation(conversation.id, UserId(2)).await.unwrap());
        assert!(!store.leave_conversation(conversation.id, UserId(2)).await.unwrap());

        let active = store.query_active_memberships(conversation.id).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].user_id, UserId(1));
    }

    #[tokio::test]
    async fn pair_lookup_requires_exactly_the_two_users() {
        let store = store().await;
        assert_eq!(store.find_conversation_between(UserId(1), UserId(2)).await.unwrap(), None);

        let conversation = store
            .create_conversation_with_participants(UserId(1), UserId(2))
            .await
            .unwrap();
        assert_eq!(
            store.find_conversation_between(UserId(2), UserId(1)).await.unwrap(),
            Some(conversation.id)
        );

        store.leave_conversation(conversation.id, UserId(1)).await.unwrap();
        assert_eq!(store.find_conversation_between(UserId(1), UserId(2)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn deleted_conversations_have_no_members() {
        let store = store().await;
        let conversation = store
            .create_conversation_with_participants(UserId(1), UserId(2))
            .await
            .unwrap();

        sqlx::query("UPDATE conversations SET deleted_at=? WHERE id=?")
            .bind(OffsetDateTime::now_utc())
            .bind(conversation.id)
            .execute(&store.db_pool)
            .await
            .unwrap();

        assert!(store.query_active_memberships(conversation.id).await.unwrap().is_empty());
        assert!(store.fetch_conversation(conversation.id).await.unwrap().is_none());
    }
}
