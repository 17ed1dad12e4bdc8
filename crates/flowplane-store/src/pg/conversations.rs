//! Conversation queries.

use async_trait::async_trait;

use flowplane_core::{AgentId, ConversationId, Page, UserId};

use crate::error::Result;
use crate::types::{Conversation, Message};
use crate::ConversationStore;

use super::{conversation_from_row, message_from_row, PgStore};

#[async_trait]
impl ConversationStore for PgStore {
    async fn insert_conversation(&self, conversation: &Conversation) -> Result<()> {
        sqlx::query(
            "INSERT INTO conversations
                 (id, owner_id, agent_id, title, metadata, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(conversation.id.as_uuid())
        .bind(conversation.owner_id.as_ref().map(UserId::as_uuid))
        .bind(conversation.agent_id.as_ref().map(AgentId::as_uuid))
        .bind(&conversation.title)
        .bind(&conversation.metadata)
        .bind(conversation.created_at)
        .bind(conversation.updated_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn get_conversation(&self, id: ConversationId) -> Result<Option<Conversation>> {
        sqlx::query("SELECT * FROM conversations WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(self.pool())
            .await?
            .map(|row| conversation_from_row(&row))
            .transpose()
    }

    async fn insert_message(&self, message: &Message) -> Result<()> {
        sqlx::query(
            "INSERT INTO messages (id, conversation_id, role, content, metadata, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(message.id.as_uuid())
        .bind(message.conversation_id.as_uuid())
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(&message.metadata)
        .bind(message.created_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn list_messages(
        &self,
        conversation_id: ConversationId,
        page: Page,
    ) -> Result<Vec<Message>> {
        #[allow(clippy::cast_possible_wrap)]
        let rows = sqlx::query(
            "SELECT * FROM messages WHERE conversation_id = $1
             ORDER BY created_at, id
             LIMIT $2 OFFSET $3",
        )
        .bind(conversation_id.as_uuid())
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(message_from_row).collect()
    }
}
