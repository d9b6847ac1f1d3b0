//! Vectorize worker: turns a pending message into recall and cluster
//! vectors and settles its status.
//!
//! Deliveries carry only `{"message_id": ..}`; the worker reloads the
//! message, so a redelivered or republished id is harmless once the message
//! has left `pending`.

use crate::broker::{DeliveryHandler, Incoming};
use crate::cache::TtlCache;
use crate::clients::{
    AttachmentFetcher, EmbedInput, EmbedPurpose, Embedder, VectorPoint, VectorSink,
};
use crate::db::{PermissionSource, WorkStore};
use crate::error::{Error, Result};
use crate::model::work::{ConversationMessage, MessageContent, WorkStatus};
use crate::telemetry::metrics;
use crate::telemetry::work::{record_status_transition, start_work_span};
use async_trait::async_trait;
use futures::future::join_all;
use opentelemetry::KeyValue;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{Instrument, Span, debug, error, info, warn};
use uuid::Uuid;

pub const RECALL_COLLECTION: &str = "messages_recall";
pub const CLUSTER_COLLECTION: &str = "messages_cluster";

/// Group setting that forbids attachment downloads.
pub const DOWNLOAD_DENIED: &str = "not_anyone";

/// Stable vector id for a message, identical across reprocessing.
pub fn vector_id(message_id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, message_id.as_bytes())
}

/// What one delivery did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    /// Nothing embeddable after permission gating and downloads.
    Skipped,
    Failed(String),
    /// No such message.
    NotFound,
    /// Already terminal; nothing touched.
    AlreadySettled(WorkStatus),
}

impl Outcome {
    fn label(&self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::Skipped => "skipped",
            Outcome::Failed(_) => "failed",
            Outcome::NotFound => "not_found",
            Outcome::AlreadySettled(_) => "duplicate",
        }
    }
}

/// Collaborators of the pipeline.
#[derive(Clone)]
pub struct VectorizeDeps {
    pub store: Arc<dyn WorkStore>,
    pub permissions: Arc<dyn PermissionSource>,
    pub fetcher: Arc<dyn AttachmentFetcher>,
    pub embedder: Arc<dyn Embedder>,
    pub sink: Arc<dyn VectorSink>,
}

pub struct VectorizeWorker {
    deps: VectorizeDeps,
    permissions: TtlCache<String, bool>,
    permission_ttl: Duration,
    gate: Arc<Semaphore>,
}

#[derive(Deserialize)]
struct VectorizeRequest {
    #[serde(default)]
    message_id: Option<String>,
}

impl VectorizeWorker {
    /// `concurrency` bounds pipelines in flight in this process.
    pub fn new(deps: VectorizeDeps, concurrency: usize, permission_ttl: Duration) -> Self {
        Self {
            deps,
            permissions: TtlCache::new("chat_download_permission"),
            permission_ttl,
            gate: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Run the pipeline for one message id and settle its status.
    pub async fn process(&self, message_id: &str) -> Result<Outcome> {
        let _permit = Arc::clone(&self.gate)
            .acquire_owned()
            .await
            .map_err(|_| Error::Other("vectorize gate closed".to_string()))?;

        let span = start_work_span(crate::broker::topology::VECTORIZE.base_name, message_id);
        let started = Instant::now();
        let outcome = self.settle(message_id, &span).instrument(span.clone()).await?;

        metrics::operation_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[
                KeyValue::new("operation", "vectorize"),
                KeyValue::new("outcome", outcome.label()),
            ],
        );
        Ok(outcome)
    }

    async fn settle(&self, message_id: &str, span: &Span) -> Result<Outcome> {
        let Some(message) = self.deps.store.get_message(message_id).await? else {
            warn!(message_id, "message not found, nothing to vectorize");
            ignored("not_found");
            return Ok(Outcome::NotFound);
        };
        if message.vector_status.is_terminal() {
            debug!(message_id, status = %message.vector_status, "already settled");
            ignored("duplicate");
            return Ok(Outcome::AlreadySettled(message.vector_status));
        }

        let (status, outcome) = match self.vectorize(&message).await {
            Ok(true) => (WorkStatus::Completed, Outcome::Completed),
            Ok(false) => (WorkStatus::Skipped, Outcome::Skipped),
            Err(e) => {
                error!(message_id, error = %e, "vectorize failed");
                (WorkStatus::Failed, Outcome::Failed(e.to_string()))
            }
        };

        record_status_transition(span, WorkStatus::Pending.as_str(), status.as_str());
        if !self.deps.store.set_status(message_id, status).await? {
            warn!(message_id, %status, "message left pending concurrently, status not written");
        }
        Ok(outcome)
    }

    /// True when vectors were written, false when there was nothing to embed.
    async fn vectorize(&self, message: &ConversationMessage) -> Result<bool> {
        let content = MessageContent::parse(&message.content);
        if content.is_empty() {
            return Ok(false);
        }

        let mut image_keys = content.image_keys;
        if !image_keys.is_empty() && !self.allows_download(message).await {
            debug!(chat_id = %message.chat_id, "attachment download not permitted");
            image_keys.clear();
        }

        let images = self.fetch_images(message, &image_keys).await;
        if content.text.is_empty() && images.is_empty() {
            return Ok(false);
        }

        let input = EmbedInput {
            text: content.text,
            images,
        };
        let (recall, cluster) = tokio::try_join!(
            self.deps.embedder.embed(&input, EmbedPurpose::Recall),
            self.deps.embedder.embed(&input, EmbedPurpose::Cluster),
        )?;

        let id = vector_id(&message.message_id);
        let payload = json!({
            "message_id": message.message_id,
            "user_id": message.user_id,
            "chat_id": message.chat_id,
            "root_message_id": message.root_message_id,
            "create_time": message.create_time,
        });
        tokio::try_join!(
            self.deps.sink.upsert(
                RECALL_COLLECTION,
                VectorPoint {
                    id,
                    vector: recall,
                    payload: payload.clone(),
                },
            ),
            self.deps.sink.upsert(
                CLUSTER_COLLECTION,
                VectorPoint {
                    id,
                    vector: cluster,
                    payload,
                },
            ),
        )?;
        Ok(true)
    }

    /// Direct chats always allow downloads. Group chats allow them unless
    /// set to [`DOWNLOAD_DENIED`]; a failed lookup allows.
    async fn allows_download(&self, message: &ConversationMessage) -> bool {
        if message.is_p2p() {
            return true;
        }
        let permissions = Arc::clone(&self.deps.permissions);
        let chat_id = message.chat_id.clone();
        self.permissions
            .get_or_insert_with(message.chat_id.clone(), self.permission_ttl, || async move {
                match permissions.download_setting(&chat_id).await {
                    Ok(setting) => setting.as_deref() != Some(DOWNLOAD_DENIED),
                    Err(e) => {
                        warn!(chat_id = %chat_id, error = %e, "permission lookup failed, allowing download");
                        true
                    }
                }
            })
            .await
    }

    /// Download concurrently; failed or missing attachments are dropped.
    async fn fetch_images(&self, message: &ConversationMessage, keys: &[String]) -> Vec<String> {
        let downloads = keys
            .iter()
            .map(|key| self.deps.fetcher.fetch(message, key));
        join_all(downloads)
            .await
            .into_iter()
            .zip(keys)
            .filter_map(|(result, key)| match result {
                Ok(data) => data,
                Err(e) => {
                    warn!(message_id = %message.message_id, image_key = %key, error = %e, "attachment download failed");
                    None
                }
            })
            .collect()
    }
}

fn ignored(reason: &'static str) {
    metrics::work_ignored().add(1, &[KeyValue::new("reason", reason)]);
}

#[async_trait]
impl DeliveryHandler for VectorizeWorker {
    /// Malformed bodies go to the dead-letter queue; everything else is
    /// settled here and acknowledged.
    async fn handle(&self, delivery: Incoming) -> Result<()> {
        let request: VectorizeRequest = serde_json::from_slice(&delivery.body)?;
        let Some(message_id) = request.message_id.filter(|id| !id.is_empty()) else {
            warn!(queue = %delivery.queue, "vectorize request without message_id");
            ignored("bad_body");
            return Ok(());
        };

        let outcome = self.process(&message_id).await?;
        info!(message_id = %message_id, outcome = outcome.label(), redelivered = delivery.redelivered, "vectorize done");
        Ok(())
    }
}
