//! In-memory collaborators for driving the workers without infrastructure.

#![allow(dead_code)]

use async_trait::async_trait;
use lanework::broker::{Publish, PublishOptions};
use lanework::clients::{
    AttachmentFetcher, EmbedInput, EmbedPurpose, Embedder, FactExtractor, VectorPoint, VectorSink,
};
use lanework::db::{KnowledgeStore, KnowledgeUpdate, PermissionSource, WorkStore};
use lanework::error::{Error, Result};
use lanework::model::memory::{EventRecord, Evidence, Fact, FactDelta, Knowledge, SubjectCursor};
use lanework::model::work::{ConversationMessage, PendingKey, WorkStatus};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

pub fn message(id: &str, content: &str) -> ConversationMessage {
    ConversationMessage {
        message_id: id.to_string(),
        user_id: "u1".to_string(),
        chat_id: "chat-1".to_string(),
        chat_type: "group".to_string(),
        role: "user".to_string(),
        content: content.to_string(),
        create_time: chrono::Utc::now().timestamp_millis(),
        bot_name: None,
        root_message_id: None,
        reply_message_id: None,
        vector_status: WorkStatus::Pending,
    }
}

// ---------------------------------------------------------------------------
// Work store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryWorkStore {
    messages: Mutex<HashMap<String, ConversationMessage>>,
    pub status_writes: AtomicUsize,
}

impl MemoryWorkStore {
    pub fn with(messages: impl IntoIterator<Item = ConversationMessage>) -> Self {
        let store = Self::default();
        for m in messages {
            store.insert(m);
        }
        store
    }

    pub fn insert(&self, message: ConversationMessage) {
        self.messages
            .lock()
            .insert(message.message_id.clone(), message);
    }

    pub fn status(&self, id: &str) -> Option<WorkStatus> {
        self.messages.lock().get(id).map(|m| m.vector_status)
    }
}

#[async_trait]
impl WorkStore for MemoryWorkStore {
    async fn get_message(&self, message_id: &str) -> Result<Option<ConversationMessage>> {
        Ok(self.messages.lock().get(message_id).cloned())
    }

    async fn set_status(&self, message_id: &str, to: WorkStatus) -> Result<bool> {
        let mut messages = self.messages.lock();
        match messages.get_mut(message_id) {
            Some(m) if m.vector_status.can_transition_to(to) => {
                m.vector_status = to;
                self.status_writes.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn pending_since(
        &self,
        since_ms: i64,
        after: Option<&PendingKey>,
        limit: i64,
    ) -> Result<Vec<PendingKey>> {
        let mut pending: Vec<PendingKey> = self
            .messages
            .lock()
            .values()
            .filter(|m| m.vector_status == WorkStatus::Pending && m.create_time > since_ms)
            .map(|m| PendingKey {
                create_time: m.create_time,
                message_id: m.message_id.clone(),
            })
            .filter(|key| after.is_none_or(|after| key < after))
            .collect();
        pending.sort_by(|a, b| b.cmp(a));
        pending.truncate(limit as usize);
        Ok(pending)
    }
}

// ---------------------------------------------------------------------------
// Permissions, attachments, embeddings, vectors
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakePermissions {
    pub settings: Mutex<HashMap<String, String>>,
    pub fail: bool,
    pub lookups: AtomicUsize,
}

impl FakePermissions {
    pub fn deny(chat_id: &str) -> Self {
        let p = Self::default();
        p.settings
            .lock()
            .insert(chat_id.to_string(), "not_anyone".to_string());
        p
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl PermissionSource for FakePermissions {
    async fn download_setting(&self, chat_id: &str) -> Result<Option<String>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::Other("permission store down".into()));
        }
        Ok(self.settings.lock().get(chat_id).cloned())
    }
}

#[derive(Default)]
pub struct FakeFetcher {
    pub broken: HashSet<String>,
    pub calls: AtomicUsize,
}

impl FakeFetcher {
    pub fn broken(keys: &[&str]) -> Self {
        Self {
            broken: keys.iter().map(|k| k.to_string()).collect(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl AttachmentFetcher for FakeFetcher {
    async fn fetch(&self, _message: &ConversationMessage, image_key: &str) -> Result<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.broken.contains(image_key) {
            return Err(Error::Other(format!("cannot download {image_key}")));
        }
        Ok(Some(format!("b64:{image_key}")))
    }
}

#[derive(Default)]
pub struct FakeEmbedder {
    pub fail: bool,
    pub inputs: Mutex<Vec<(EmbedPurpose, EmbedInput)>>,
}

impl FakeEmbedder {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, input: &EmbedInput, purpose: EmbedPurpose) -> Result<Vec<f32>> {
        if self.fail {
            return Err(Error::Other("embedding service unavailable".into()));
        }
        self.inputs.lock().push((purpose, input.clone()));
        let seed = match purpose {
            EmbedPurpose::Recall => 1.0,
            EmbedPurpose::Cluster => 2.0,
        };
        Ok(vec![seed; 4])
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub points: Mutex<Vec<(String, VectorPoint)>>,
}

impl RecordingSink {
    pub fn collections(&self) -> Vec<String> {
        let mut names: Vec<_> = self.points.lock().iter().map(|(c, _)| c.clone()).collect();
        names.sort();
        names
    }
}

#[async_trait]
impl VectorSink for RecordingSink {
    async fn upsert(&self, collection: &str, point: VectorPoint) -> Result<()> {
        self.points.lock().push((collection.to_string(), point));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingPublisher {
    pub published: Mutex<Vec<(String, serde_json::Value)>>,
    /// Fail every publish after this many successes.
    pub fail_after: Option<usize>,
}

impl RecordingPublisher {
    pub fn ids(&self) -> Vec<String> {
        self.published
            .lock()
            .iter()
            .filter_map(|(_, body)| body["message_id"].as_str().map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl Publish for RecordingPublisher {
    async fn publish(
        &self,
        routing_key: &str,
        body: &serde_json::Value,
        _options: PublishOptions,
    ) -> Result<()> {
        let mut published = self.published.lock();
        if self.fail_after.is_some_and(|n| published.len() >= n) {
            return Err(Error::Other("broker unavailable".into()));
        }
        published.push((routing_key.to_string(), body.clone()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Knowledge store and extractor
// ---------------------------------------------------------------------------

pub fn event(id: &str, subject: &str, create_time: i64, text: &str) -> EventRecord {
    EventRecord {
        message_id: id.to_string(),
        user_id: subject.to_string(),
        role: "user".to_string(),
        text: text.to_string(),
        create_time,
    }
}

#[derive(Default)]
pub struct MemoryKnowledgeStore {
    pub events: Mutex<HashMap<String, Vec<EventRecord>>>,
    pub knowledge: Mutex<HashMap<String, Knowledge>>,
    pub saves: AtomicUsize,
}

impl MemoryKnowledgeStore {
    pub fn add_events(&self, subject: &str, times: impl IntoIterator<Item = i64>) {
        let mut events = self.events.lock();
        let list = events.entry(subject.to_string()).or_default();
        for t in times {
            list.push(event(&format!("{subject}-{t}"), subject, t, &format!("message at {t}")));
        }
    }

    pub fn set_facts(&self, subject: &str, facts: Vec<Fact>) {
        self.knowledge
            .lock()
            .entry(subject.to_string())
            .or_insert_with(|| Knowledge {
                subject_id: subject.to_string(),
                ..Default::default()
            })
            .facts = facts;
    }

    pub fn cursor(&self, subject: &str) -> i64 {
        self.knowledge
            .lock()
            .get(subject)
            .map(|k| k.cursor)
            .unwrap_or(0)
    }

    pub fn facts(&self, subject: &str) -> Vec<Fact> {
        self.knowledge
            .lock()
            .get(subject)
            .map(|k| k.facts.clone())
            .unwrap_or_default()
    }

    pub fn knowledge(&self, subject: &str) -> Option<Knowledge> {
        self.knowledge.lock().get(subject).cloned()
    }
}

#[async_trait]
impl KnowledgeStore for MemoryKnowledgeStore {
    async fn eligible_subjects(&self, min_events: i64, limit: i64) -> Result<Vec<SubjectCursor>> {
        let events = self.events.lock();
        let mut subjects: Vec<SubjectCursor> = events
            .iter()
            .map(|(subject, list)| {
                let since = self.cursor(subject);
                SubjectCursor {
                    subject_id: subject.clone(),
                    since,
                    pending_events: list.iter().filter(|e| e.create_time > since).count() as i64,
                }
            })
            .filter(|s| s.pending_events >= min_events)
            .collect();
        subjects.sort_by(|a, b| {
            b.pending_events
                .cmp(&a.pending_events)
                .then_with(|| a.subject_id.cmp(&b.subject_id))
        });
        subjects.truncate(limit as usize);
        Ok(subjects)
    }

    async fn load_knowledge(&self, subject_id: &str) -> Result<Option<Knowledge>> {
        Ok(self.knowledge(subject_id))
    }

    async fn collect_evidence(
        &self,
        subject_id: &str,
        since: i64,
        limit: i64,
    ) -> Result<Vec<Evidence>> {
        let events = self.events.lock();
        let mut list: Vec<_> = events
            .get(subject_id)
            .map(|l| l.iter().filter(|e| e.create_time > since).cloned().collect())
            .unwrap_or_default();
        list.sort_by_key(|e| e.create_time);
        list.truncate(limit as usize);
        Ok(list
            .into_iter()
            .map(|event| Evidence {
                chat_id: "chat-1".to_string(),
                event,
                before: Vec::new(),
                after: Vec::new(),
                reply_to: None,
            })
            .collect())
    }

    async fn advance_cursor(&self, subject_id: &str, cursor: i64) -> Result<()> {
        let mut knowledge = self.knowledge.lock();
        let entry = knowledge
            .entry(subject_id.to_string())
            .or_insert_with(|| Knowledge {
                subject_id: subject_id.to_string(),
                ..Default::default()
            });
        entry.cursor = entry.cursor.max(cursor);
        Ok(())
    }

    async fn save_knowledge(&self, update: KnowledgeUpdate) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        let mut knowledge = self.knowledge.lock();
        let entry = knowledge
            .entry(update.subject_id.clone())
            .or_insert_with(|| Knowledge {
                subject_id: update.subject_id.clone(),
                ..Default::default()
            });
        entry.facts = update.facts;
        entry.personality_note = update.personality_note;
        entry.communication_style = update.communication_style;
        entry.cursor = entry.cursor.max(update.cursor);
        Ok(())
    }
}

/// Replies per subject, in order; a subject with no scripted reply gets an
/// empty delta.
#[derive(Default)]
pub struct ScriptedExtractor {
    replies: Mutex<HashMap<String, VecDeque<Result<FactDelta>>>>,
    pub calls: Mutex<Vec<(String, usize)>>,
}

impl ScriptedExtractor {
    pub fn reply(&self, subject: &str, reply: Result<FactDelta>) {
        self.replies
            .lock()
            .entry(subject.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn calls_for(&self, subject: &str) -> usize {
        self.calls.lock().iter().filter(|(s, _)| s == subject).count()
    }
}

#[async_trait]
impl FactExtractor for ScriptedExtractor {
    async fn extract(
        &self,
        subject_id: &str,
        _existing: &[Fact],
        evidence: &[Evidence],
    ) -> Result<FactDelta> {
        self.calls
            .lock()
            .push((subject_id.to_string(), evidence.len()));
        self.replies
            .lock()
            .get_mut(subject_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(FactDelta::default()))
    }
}
