//! Database connection pool, migrations, health check, and the store
//! contracts the workers are written against.
//!
//! `Db` implements every contract against Postgres; tests substitute
//! in-memory implementations.

pub mod knowledge;
pub mod messages;

use crate::config::tunables::DatabaseTunables;
use crate::error::{Error, Result};
use crate::model::memory::{Evidence, Fact, Knowledge, SubjectCursor};
use crate::model::work::{ConversationMessage, PendingKey, WorkStatus};
use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::debug;

/// Message rows as vectorize work.
#[async_trait]
pub trait WorkStore: Send + Sync {
    async fn get_message(&self, message_id: &str) -> Result<Option<ConversationMessage>>;

    /// Move a pending message to a terminal status. Returns false when the
    /// message was no longer pending (another consumer got there first).
    async fn set_status(&self, message_id: &str, to: WorkStatus) -> Result<bool>;

    /// Pending messages created after `since_ms`, newest first by
    /// `(create_time, message_id)`, starting strictly after `after`.
    async fn pending_since(
        &self,
        since_ms: i64,
        after: Option<&PendingKey>,
        limit: i64,
    ) -> Result<Vec<PendingKey>>;
}

/// Per-chat attachment download policy.
#[async_trait]
pub trait PermissionSource: Send + Sync {
    /// The chat's download setting, `None` when the chat has no record.
    async fn download_setting(&self, chat_id: &str) -> Result<Option<String>>;
}

/// A full replacement of a subject's knowledge together with its new cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeUpdate {
    pub subject_id: String,
    pub facts: Vec<Fact>,
    pub personality_note: Option<String>,
    pub communication_style: Option<String>,
    pub cursor: i64,
}

/// Subject knowledge and the event history it is built from.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Subjects with at least `min_events` events past their cursor, busiest first.
    async fn eligible_subjects(&self, min_events: i64, limit: i64) -> Result<Vec<SubjectCursor>>;

    async fn load_knowledge(&self, subject_id: &str) -> Result<Option<Knowledge>>;

    /// The subject's oldest `limit` events after `since`, with context.
    async fn collect_evidence(&self, subject_id: &str, since: i64, limit: i64)
    -> Result<Vec<Evidence>>;

    /// Move the cursor forward without touching facts. Never moves it back.
    async fn advance_cursor(&self, subject_id: &str, cursor: i64) -> Result<()>;

    /// Replace facts and notes and advance the cursor in one write.
    async fn save_knowledge(&self, update: KnowledgeUpdate) -> Result<()>;
}

/// Postgres handle shared by the work, permission and knowledge stores.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    pub async fn connect(url: &str, tunables: &DatabaseTunables) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(tunables.max_connections)
            .acquire_timeout(tunables.acquire_timeout())
            .connect(url)
            .await?;
        debug!(max_connections = tunables.max_connections, "postgres pool ready");
        Ok(Self { pool })
    }

    /// Apply the schema in `migrations/`.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Other(format!("migration failed: {e}")))?;
        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }
}
