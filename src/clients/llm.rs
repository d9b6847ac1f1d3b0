//! Fact extraction with an Anthropic model via rig-core.

use super::FactExtractor;
use crate::error::{Error, Result};
use crate::memory::{parse_fenced_json, render_evidence, render_facts};
use crate::model::memory::{Evidence, Fact, FactDelta};
use crate::telemetry::{metrics, work};
use async_trait::async_trait;
use opentelemetry::KeyValue;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use secrecy::{ExposeSecret, SecretString};
use std::future::IntoFuture;
use std::time::Instant;
use tracing::{Instrument, debug};

const PROVIDER: &str = "anthropic";
const MAX_TOKENS: u64 = 4096;

const PREAMBLE: &str = r#"You maintain long-term knowledge about one chat participant, called "subject".
You receive the facts already known and a batch of the subject's recent messages with surrounding conversation.
Report only durable facts about the subject (preferences, relationships, occupation, habits, plans), never about other people.
Answer with a single JSON object inside a ```json fence:
{
  "new_facts": [{"category": "...", "content": "...", "confidence": 0.0-1.0}],
  "updated_facts": [{"category": "...", "original_content": "exact existing content", "new_content": "...", "confidence": 0.0-1.0}],
  "removed_facts": [{"category": "...", "content": "exact existing content"}],
  "personality_note": "optional short note",
  "communication_style": "optional short note"
}
Use empty lists when nothing changes."#;

/// Create an Anthropic client from a secret API key.
pub fn anthropic_client(
    api_key: &SecretString,
) -> std::result::Result<rig::providers::anthropic::Client, rig::http_client::Error> {
    rig::providers::anthropic::Client::new(api_key.expose_secret())
}

pub struct LlmExtractor {
    client: rig::providers::anthropic::Client,
    model: String,
}

impl LlmExtractor {
    pub fn new(api_key: &SecretString, model: impl Into<String>) -> Result<Self> {
        let client = anthropic_client(api_key)
            .map_err(|e| Error::Config(format!("cannot build anthropic client: {e}")))?;
        Ok(Self {
            client,
            model: model.into(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

/// The user turn sent to the model.
pub fn extraction_prompt(subject_id: &str, existing: &[Fact], evidence: &[Evidence]) -> String {
    format!(
        "Known facts:\n{}\n\nRecent messages:\n{}",
        render_facts(existing),
        render_evidence(subject_id, evidence)
    )
}

#[async_trait]
impl FactExtractor for LlmExtractor {
    async fn extract(
        &self,
        subject_id: &str,
        existing: &[Fact],
        evidence: &[Evidence],
    ) -> Result<FactDelta> {
        let prompt = extraction_prompt(subject_id, existing, evidence);
        let agent = self
            .client
            .agent(&self.model)
            .preamble(PREAMBLE)
            .max_tokens(MAX_TOKENS)
            .build();

        let span = work::start_chat_span(&self.model, PROVIDER);
        let started = Instant::now();
        let response = agent
            .prompt(prompt.as_str())
            .into_future()
            .instrument(span)
            .await
            .map_err(|e| Error::Other(format!("extraction call failed: {e}")))?;
        metrics::operation_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[
                KeyValue::new("operation", "llm.extract"),
                KeyValue::new("model", self.model.clone()),
            ],
        );

        debug!(subject = subject_id, chars = response.len(), "extraction response");
        Ok(parse_fenced_json(&response)?)
    }
}
