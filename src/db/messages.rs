//! Message rows: lookup, status tracking, pending scans, chat permissions.

use super::{Db, PermissionSource, WorkStore};
use crate::error::Result;
use crate::model::work::{ConversationMessage, PendingKey, WorkStatus, validate_transition};
use crate::telemetry::metrics;
use async_trait::async_trait;
use opentelemetry::KeyValue;

#[async_trait]
impl WorkStore for Db {
    async fn get_message(&self, message_id: &str) -> Result<Option<ConversationMessage>> {
        let row: Option<MessageRow> = sqlx::query_as(
            "SELECT message_id, user_id, chat_id, chat_type, role, content, create_time,
                    bot_name, root_message_id, reply_message_id, vector_status
             FROM conversation_messages WHERE message_id = $1",
        )
        .bind(message_id)
        .fetch_optional(self.pool())
        .await?;

        row.map(MessageRow::try_into_message).transpose()
    }

    /// Optimistic: the row only changes while it is still pending.
    async fn set_status(&self, message_id: &str, to: WorkStatus) -> Result<bool> {
        validate_transition(WorkStatus::Pending, to)?;

        let rows_affected = sqlx::query(
            "UPDATE conversation_messages SET vector_status = $1
             WHERE message_id = $2 AND vector_status = 'pending'",
        )
        .bind(to.as_str())
        .bind(message_id)
        .execute(self.pool())
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Ok(false);
        }
        metrics::work_status_transitions().add(
            1,
            &[
                KeyValue::new("from", WorkStatus::Pending.as_str()),
                KeyValue::new("to", to.as_str()),
            ],
        );
        Ok(true)
    }

    /// Keyset paging: each page starts below the last `(create_time, id)`
    /// returned, unaffected by rows leaving `pending` in between.
    async fn pending_since(
        &self,
        since_ms: i64,
        after: Option<&PendingKey>,
        limit: i64,
    ) -> Result<Vec<PendingKey>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT message_id, create_time FROM conversation_messages
             WHERE vector_status = 'pending' AND create_time > $1
               AND ($2::BIGINT IS NULL OR (create_time, message_id) < ($2, $3))
             ORDER BY create_time DESC, message_id DESC
             LIMIT $4",
        )
        .bind(since_ms)
        .bind(after.map(|k| k.create_time))
        .bind(after.map(|k| k.message_id.as_str()))
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows
            .into_iter()
            .map(|(message_id, create_time)| PendingKey {
                create_time,
                message_id,
            })
            .collect())
    }
}

impl Db {
    /// Insert a message as pending work. Re-recording an id is a no-op.
    pub async fn record_message(&self, message: &ConversationMessage) -> Result<bool> {
        let rows_affected = sqlx::query(
            "INSERT INTO conversation_messages
                (message_id, user_id, chat_id, chat_type, role, content, create_time,
                 bot_name, root_message_id, reply_message_id, vector_status)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'pending')
             ON CONFLICT (message_id) DO NOTHING",
        )
        .bind(&message.message_id)
        .bind(&message.user_id)
        .bind(&message.chat_id)
        .bind(&message.chat_type)
        .bind(&message.role)
        .bind(&message.content)
        .bind(message.create_time)
        .bind(&message.bot_name)
        .bind(&message.root_message_id)
        .bind(&message.reply_message_id)
        .execute(self.pool())
        .await?
        .rows_affected();
        Ok(rows_affected == 1)
    }
}

#[async_trait]
impl PermissionSource for Db {
    async fn download_setting(&self, chat_id: &str) -> Result<Option<String>> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT download_permission FROM group_chat_info WHERE chat_id = $1")
                .bind(chat_id)
                .fetch_optional(self.pool())
                .await?;
        Ok(row.and_then(|(setting,)| setting))
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct MessageRow {
    message_id: String,
    user_id: String,
    chat_id: String,
    chat_type: String,
    role: String,
    content: String,
    create_time: i64,
    bot_name: Option<String>,
    root_message_id: Option<String>,
    reply_message_id: Option<String>,
    vector_status: String,
}

impl MessageRow {
    fn try_into_message(self) -> Result<ConversationMessage> {
        Ok(ConversationMessage {
            vector_status: self.vector_status.parse()?,
            message_id: self.message_id,
            user_id: self.user_id,
            chat_id: self.chat_id,
            chat_type: self.chat_type,
            role: self.role,
            content: self.content,
            create_time: self.create_time,
            bot_name: self.bot_name,
            root_message_id: self.root_message_id,
            reply_message_id: self.reply_message_id,
        })
    }
}
