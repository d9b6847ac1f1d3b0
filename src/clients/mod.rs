//! Outbound collaborators of the workers.
//!
//! Each collaborator is a trait so the pipelines can be driven by in-memory
//! fakes. The HTTP implementations resolve their targets through the
//! [`LaneRouter`] and forward the lane header, so a worker running in a lane
//! calls that lane's deployment of each service when one exists.

pub mod http;
pub mod llm;

pub use http::{HttpAttachmentFetcher, HttpEmbedder, QdrantSink};
pub use llm::LlmExtractor;

use crate::error::Result;
use crate::lane::LaneRouter;
use crate::model::memory::{Evidence, Fact, FactDelta};
use crate::model::work::ConversationMessage;
use async_trait::async_trait;
use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Which vector space an embedding is computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedPurpose {
    /// Retrieval of similar messages.
    Recall,
    /// Topic clustering.
    Cluster,
}

/// Text plus base64-encoded images.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EmbedInput {
    pub text: String,
    pub images: Vec<String>,
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, input: &EmbedInput, purpose: EmbedPurpose) -> Result<Vec<f32>>;
}

#[async_trait]
pub trait AttachmentFetcher: Send + Sync {
    /// Base64 image data, `None` when the attachment no longer exists.
    async fn fetch(&self, message: &ConversationMessage, image_key: &str) -> Result<Option<String>>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorPoint {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: serde_json::Value,
}

#[async_trait]
pub trait VectorSink: Send + Sync {
    /// Insert or overwrite the point with the same id.
    async fn upsert(&self, collection: &str, point: VectorPoint) -> Result<()>;
}

#[async_trait]
pub trait FactExtractor: Send + Sync {
    /// Changes to `existing` supported by `evidence`. Any failure, including
    /// output that does not parse, is an error.
    async fn extract(
        &self,
        subject_id: &str,
        existing: &[Fact],
        evidence: &[Evidence],
    ) -> Result<FactDelta>;
}

/// JSON over HTTP to services named in the route table.
#[derive(Clone)]
pub struct ServiceClient {
    http: reqwest::Client,
    router: Arc<LaneRouter>,
}

impl ServiceClient {
    pub fn new(router: Arc<LaneRouter>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, router })
    }

    pub fn router(&self) -> &LaneRouter {
        &self.router
    }

    pub async fn send_json<B, T>(&self, method: Method, service: &str, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.router.resolve_url(service, path, None);
        let mut request = self.http.request(method, &url).json(body);
        for (name, value) in self.router.headers() {
            request = request.header(name, value);
        }
        let response = request.send().await?.error_for_status()?;
        Ok(response.json().await?)
    }
}
