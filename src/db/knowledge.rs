//! Subject knowledge rows and the evidence queries that feed consolidation.

use super::{Db, KnowledgeStore, KnowledgeUpdate};
use crate::error::Result;
use crate::model::memory::{EventRecord, Evidence, Fact, Knowledge, SubjectCursor};
use crate::model::work::MessageContent;
use async_trait::async_trait;
use sqlx::types::Json;

/// Context shown around each subject event.
pub const CONTEXT_BEFORE: i64 = 3;
pub const CONTEXT_AFTER: i64 = 2;

#[async_trait]
impl KnowledgeStore for Db {
    async fn eligible_subjects(&self, min_events: i64, limit: i64) -> Result<Vec<SubjectCursor>> {
        let rows: Vec<(String, i64, i64)> = sqlx::query_as(
            "SELECT m.user_id, COALESCE(k.cursor_time, 0) AS since, COUNT(*) AS pending
             FROM conversation_messages m
             LEFT JOIN user_knowledge k ON k.user_id = m.user_id
             WHERE m.role = 'user' AND m.create_time > COALESCE(k.cursor_time, 0)
             GROUP BY m.user_id, k.cursor_time
             HAVING COUNT(*) >= $1
             ORDER BY pending DESC, m.user_id
             LIMIT $2",
        )
        .bind(min_events)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|(subject_id, since, pending_events)| SubjectCursor {
                subject_id,
                since,
                pending_events,
            })
            .collect())
    }

    async fn load_knowledge(&self, subject_id: &str) -> Result<Option<Knowledge>> {
        let row: Option<KnowledgeRow> = sqlx::query_as(
            "SELECT user_id, facts, personality_note, communication_style, cursor_time, updated_at
             FROM user_knowledge WHERE user_id = $1",
        )
        .bind(subject_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(Knowledge::from))
    }

    async fn collect_evidence(
        &self,
        subject_id: &str,
        since: i64,
        limit: i64,
    ) -> Result<Vec<Evidence>> {
        let events: Vec<EventRow> = sqlx::query_as(
            "SELECT message_id, user_id, chat_id, role, content, create_time, reply_message_id
             FROM conversation_messages
             WHERE user_id = $1 AND role = 'user' AND create_time > $2
             ORDER BY create_time ASC, message_id
             LIMIT $3",
        )
        .bind(subject_id)
        .bind(since)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        let mut evidence = Vec::with_capacity(events.len());
        for row in events {
            let mut before: Vec<EventRow> = sqlx::query_as(
                "SELECT message_id, user_id, chat_id, role, content, create_time, reply_message_id
                 FROM conversation_messages
                 WHERE chat_id = $1 AND create_time < $2
                 ORDER BY create_time DESC
                 LIMIT $3",
            )
            .bind(&row.chat_id)
            .bind(row.create_time)
            .bind(CONTEXT_BEFORE)
            .fetch_all(self.pool())
            .await?;
            before.reverse();

            let after: Vec<EventRow> = sqlx::query_as(
                "SELECT message_id, user_id, chat_id, role, content, create_time, reply_message_id
                 FROM conversation_messages
                 WHERE chat_id = $1 AND create_time > $2
                 ORDER BY create_time ASC
                 LIMIT $3",
            )
            .bind(&row.chat_id)
            .bind(row.create_time)
            .bind(CONTEXT_AFTER)
            .fetch_all(self.pool())
            .await?;

            let reply_to = match &row.reply_message_id {
                Some(reply_id) => sqlx::query_as::<_, EventRow>(
                    "SELECT message_id, user_id, chat_id, role, content, create_time, reply_message_id
                     FROM conversation_messages WHERE message_id = $1",
                )
                .bind(reply_id)
                .fetch_optional(self.pool())
                .await?
                .map(EventRow::into_record),
                None => None,
            };

            evidence.push(Evidence {
                chat_id: row.chat_id.clone(),
                before: before.into_iter().map(EventRow::into_record).collect(),
                after: after.into_iter().map(EventRow::into_record).collect(),
                reply_to,
                event: row.into_record(),
            });
        }
        Ok(evidence)
    }

    async fn advance_cursor(&self, subject_id: &str, cursor: i64) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_knowledge (user_id, cursor_time, updated_at)
             VALUES ($1, $2, now())
             ON CONFLICT (user_id) DO UPDATE
             SET cursor_time = GREATEST(user_knowledge.cursor_time, EXCLUDED.cursor_time),
                 updated_at = now()",
        )
        .bind(subject_id)
        .bind(cursor)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn save_knowledge(&self, update: KnowledgeUpdate) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_knowledge
                (user_id, facts, personality_note, communication_style, cursor_time, updated_at)
             VALUES ($1, $2, $3, $4, $5, now())
             ON CONFLICT (user_id) DO UPDATE
             SET facts = EXCLUDED.facts,
                 personality_note = EXCLUDED.personality_note,
                 communication_style = EXCLUDED.communication_style,
                 cursor_time = GREATEST(user_knowledge.cursor_time, EXCLUDED.cursor_time),
                 updated_at = now()",
        )
        .bind(&update.subject_id)
        .bind(Json(&update.facts))
        .bind(&update.personality_note)
        .bind(&update.communication_style)
        .bind(update.cursor)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct KnowledgeRow {
    user_id: String,
    facts: Json<Vec<Fact>>,
    personality_note: Option<String>,
    communication_style: Option<String>,
    cursor_time: i64,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<KnowledgeRow> for Knowledge {
    fn from(row: KnowledgeRow) -> Self {
        Self {
            subject_id: row.user_id,
            facts: row.facts.0,
            personality_note: row.personality_note,
            communication_style: row.communication_style,
            cursor: row.cursor_time,
            updated_at: Some(row.updated_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    message_id: String,
    user_id: String,
    chat_id: String,
    role: String,
    content: String,
    create_time: i64,
    reply_message_id: Option<String>,
}

impl EventRow {
    fn into_record(self) -> EventRecord {
        let content = MessageContent::parse(&self.content);
        let text = if content.text.is_empty() && !content.image_keys.is_empty() {
            "[image]".to_string()
        } else {
            content.text
        };
        EventRecord {
            message_id: self.message_id,
            user_id: self.user_id,
            role: self.role,
            text,
            create_time: self.create_time,
        }
    }
}
