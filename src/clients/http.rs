//! HTTP implementations of the attachment, embedding and vector-store clients.

use super::{
    AttachmentFetcher, EmbedInput, EmbedPurpose, Embedder, ServiceClient, VectorPoint, VectorSink,
};
use crate::error::{Error, Result};
use crate::model::work::ConversationMessage;
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;

/// Bot identity used when a message does not record one.
pub const DEFAULT_BOT_NAME: &str = "bytedance";

pub struct HttpAttachmentFetcher {
    client: ServiceClient,
    service: String,
}

impl HttpAttachmentFetcher {
    pub fn new(client: ServiceClient, service: impl Into<String>) -> Self {
        Self {
            client,
            service: service.into(),
        }
    }
}

#[derive(Deserialize)]
struct DownloadResponse {
    #[serde(default)]
    base64: Option<String>,
}

#[async_trait]
impl AttachmentFetcher for HttpAttachmentFetcher {
    async fn fetch(&self, message: &ConversationMessage, image_key: &str) -> Result<Option<String>> {
        let body = json!({
            "image_key": image_key,
            "message_id": message.message_id,
            "bot_name": message.bot_name.as_deref().unwrap_or(DEFAULT_BOT_NAME),
        });
        let response: DownloadResponse = self
            .client
            .send_json(Method::POST, &self.service, "/api/image/download", &body)
            .await?;
        Ok(response.base64.filter(|data| !data.is_empty()))
    }
}

pub struct HttpEmbedder {
    client: ServiceClient,
    service: String,
}

impl HttpEmbedder {
    pub fn new(client: ServiceClient, service: impl Into<String>) -> Self {
        Self {
            client,
            service: service.into(),
        }
    }
}

#[derive(Deserialize)]
struct EmbedResponse {
    vector: Vec<f32>,
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, input: &EmbedInput, purpose: EmbedPurpose) -> Result<Vec<f32>> {
        let body = json!({
            "text": input.text,
            "images": input.images,
            "purpose": purpose,
        });
        let response: EmbedResponse = self
            .client
            .send_json(Method::POST, &self.service, "/v1/embed", &body)
            .await?;
        if response.vector.is_empty() {
            return Err(Error::Other(format!("empty {purpose:?} embedding")));
        }
        Ok(response.vector)
    }
}

/// Qdrant REST point upserts.
pub struct QdrantSink {
    client: ServiceClient,
    service: String,
}

impl QdrantSink {
    pub fn new(client: ServiceClient, service: impl Into<String>) -> Self {
        Self {
            client,
            service: service.into(),
        }
    }
}

#[async_trait]
impl VectorSink for QdrantSink {
    async fn upsert(&self, collection: &str, point: VectorPoint) -> Result<()> {
        let path = format!("/collections/{collection}/points?wait=true");
        let body = json!({ "points": [point] });
        let _: serde_json::Value = self
            .client
            .send_json(Method::PUT, &self.service, &path, &body)
            .await?;
        Ok(())
    }
}
