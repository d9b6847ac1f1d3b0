//! Consolidation: periodically folds each active subject's new events into
//! their long-term facts.
//!
//! The cursor of a subject only moves when its events have been accounted
//! for: either a delta was merged and saved, or the extractor found nothing
//! to change. An extraction failure leaves the cursor where it was so the
//! same events are offered again next run.

use super::control::{JobRun, run_every};
use crate::clients::FactExtractor;
use crate::config::tunables::ConsolidationTunables;
use crate::db::{KnowledgeStore, KnowledgeUpdate};
use crate::error::{Error, Result};
use crate::lock::DistributedLock;
use crate::memory::merge_facts;
use crate::model::memory::SubjectCursor;
use crate::telemetry::metrics;
use crate::telemetry::work::start_subject_span;
use futures::future::join_all;
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, watch};
use tracing::{Instrument, debug, info, warn};

pub const LOCK_KEY: &str = "memory:consolidation:lock";

/// Per-subject result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectOutcome {
    /// Facts changed and were saved with the new cursor.
    Updated {
        added: usize,
        updated: usize,
        removed: usize,
        evicted: usize,
        cursor: i64,
    },
    /// Nothing to change; cursor advanced past the evidence.
    Unchanged { cursor: i64 },
    /// No events past the cursor; nothing touched.
    NoEvidence,
}

impl SubjectOutcome {
    fn label(&self) -> &'static str {
        match self {
            SubjectOutcome::Updated { .. } => "updated",
            SubjectOutcome::Unchanged { .. } => "unchanged",
            SubjectOutcome::NoEvidence => "no_evidence",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub eligible: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
}

pub struct Consolidation {
    store: Arc<dyn KnowledgeStore>,
    extractor: Arc<dyn FactExtractor>,
    lock: DistributedLock,
    config: ConsolidationTunables,
}

impl Consolidation {
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        extractor: Arc<dyn FactExtractor>,
        lock: DistributedLock,
        config: ConsolidationTunables,
    ) -> Self {
        Self {
            store,
            extractor,
            lock,
            config,
        }
    }

    /// One pass over eligible subjects under the job lock.
    pub async fn run_once(&self) -> Result<JobRun<RunSummary>> {
        let ttl = Duration::from_secs(self.config.lock_ttl_secs);
        let Some(guard) = self.lock.try_acquire(LOCK_KEY, ttl).await? else {
            return Ok(JobRun::Skipped);
        };
        let result = self.consolidate_eligible().await;
        if let Err(e) = guard.release().await {
            warn!(error = %e, "consolidation lock release failed, relying on TTL");
        }
        result.map(JobRun::Ran)
    }

    /// Process every eligible subject, a bounded number at a time. One
    /// subject failing never affects the others.
    pub async fn consolidate_eligible(&self) -> Result<RunSummary> {
        let subjects = self
            .store
            .eligible_subjects(self.config.min_events, self.config.max_subjects)
            .await?;
        let mut summary = RunSummary {
            eligible: subjects.len(),
            ..Default::default()
        };
        if subjects.is_empty() {
            debug!("no subjects eligible for consolidation");
            return Ok(summary);
        }

        let gate = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let runs = subjects.iter().map(|subject| {
            let gate = Arc::clone(&gate);
            async move {
                let _permit = gate
                    .acquire_owned()
                    .await
                    .map_err(|_| Error::Other("consolidation gate closed".to_string()))?;
                self.consolidate_subject(subject).await
            }
        });

        for (subject, result) in subjects.iter().zip(join_all(runs).await) {
            let label = match &result {
                Ok(SubjectOutcome::Updated { .. }) => {
                    summary.updated += 1;
                    "updated"
                }
                Ok(_) => {
                    summary.unchanged += 1;
                    "unchanged"
                }
                Err(e) => {
                    warn!(subject = %subject.subject_id, error = %e, "consolidation failed, cursor kept");
                    summary.failed += 1;
                    "failed"
                }
            };
            metrics::consolidation_subjects().add(1, &[KeyValue::new("outcome", label)]);
        }

        info!(
            eligible = summary.eligible,
            updated = summary.updated,
            unchanged = summary.unchanged,
            failed = summary.failed,
            "consolidation run finished"
        );
        Ok(summary)
    }

    pub async fn consolidate_subject(&self, subject: &SubjectCursor) -> Result<SubjectOutcome> {
        let span = start_subject_span(&subject.subject_id, subject.since);
        let outcome = self.consolidate_in_span(subject).instrument(span.clone()).await?;
        span.record("subject.outcome", outcome.label());
        Ok(outcome)
    }

    async fn consolidate_in_span(&self, subject: &SubjectCursor) -> Result<SubjectOutcome> {
        let id = subject.subject_id.as_str();
        let knowledge = self.store.load_knowledge(id).await?.unwrap_or_default();
        let since = knowledge.cursor.max(subject.since);

        let evidence = self
            .store
            .collect_evidence(id, since, self.config.evidence_limit)
            .await?;
        let Some(cursor) = evidence.iter().map(|e| e.event.create_time).max() else {
            return Ok(SubjectOutcome::NoEvidence);
        };

        let delta = self.extractor.extract(id, &knowledge.facts, &evidence).await?;

        if delta.is_empty() {
            self.store.advance_cursor(id, cursor).await?;
            debug!(subject = id, cursor, "no fact changes");
            return Ok(SubjectOutcome::Unchanged { cursor });
        }

        let merged = merge_facts(
            knowledge.facts,
            &delta,
            chrono::Utc::now(),
            self.config.max_facts,
        );
        let outcome = SubjectOutcome::Updated {
            added: merged.added,
            updated: merged.updated,
            removed: merged.removed,
            evicted: merged.evicted.len(),
            cursor,
        };

        self.store
            .save_knowledge(KnowledgeUpdate {
                subject_id: id.to_string(),
                facts: merged.facts,
                personality_note: delta.personality_note.or(knowledge.personality_note),
                communication_style: delta.communication_style.or(knowledge.communication_style),
                cursor,
            })
            .await?;

        info!(subject = id, ?outcome, "facts consolidated");
        Ok(outcome)
    }

    pub async fn run_periodic(&self, stop: watch::Receiver<bool>) {
        let interval = Duration::from_secs(self.config.interval_secs);
        run_every("consolidation", interval, stop, || self.run_once()).await;
    }
}
