//! Consolidation cursor semantics, merging and isolation between subjects.

mod common;

use common::*;
use lanework::clients::FactExtractor;
use lanework::config::tunables::ConsolidationTunables;
use lanework::db::KnowledgeStore;
use lanework::engine::consolidate::LOCK_KEY;
use lanework::engine::{Consolidation, JobRun, RunSummary, SubjectOutcome};
use lanework::error::{Error, ParseError};
use lanework::kv::MemoryKv;
use lanework::lock::DistributedLock;
use lanework::model::memory::{Fact, FactDelta, FactKey, NewFact};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    store: Arc<MemoryKnowledgeStore>,
    extractor: Arc<ScriptedExtractor>,
    lock: DistributedLock,
    job: Consolidation,
}

fn harness(config: ConsolidationTunables) -> Harness {
    let store = Arc::new(MemoryKnowledgeStore::default());
    let extractor = Arc::new(ScriptedExtractor::default());
    let lock = DistributedLock::new(Arc::new(MemoryKv::new()));
    let job = Consolidation::new(
        Arc::clone(&store) as Arc<dyn KnowledgeStore>,
        Arc::clone(&extractor) as Arc<dyn FactExtractor>,
        lock.clone(),
        config,
    );
    Harness {
        store,
        extractor,
        lock,
        job,
    }
}

fn config() -> ConsolidationTunables {
    ConsolidationTunables {
        min_events: 3,
        ..Default::default()
    }
}

fn adds(content: &str) -> FactDelta {
    FactDelta {
        new_facts: vec![NewFact {
            category: "misc".into(),
            content: content.into(),
            confidence: Some(0.9),
        }],
        ..Default::default()
    }
}

#[tokio::test]
async fn updated_subject_saves_facts_and_advances_cursor() {
    let h = harness(config());
    h.store.add_events("alice", [10, 20, 30]);
    h.extractor.reply(
        "alice",
        Ok(FactDelta {
            personality_note: Some("cheerful".into()),
            ..adds("likes tea")
        }),
    );

    let run = h.job.run_once().await.unwrap();

    assert_eq!(
        run,
        JobRun::Ran(RunSummary {
            eligible: 1,
            updated: 1,
            unchanged: 0,
            failed: 0,
        })
    );
    assert_eq!(h.store.cursor("alice"), 30);
    let knowledge = h.store.knowledge("alice").unwrap();
    assert_eq!(knowledge.facts.len(), 1);
    assert_eq!(knowledge.facts[0].content, "likes tea");
    assert_eq!(knowledge.personality_note.as_deref(), Some("cheerful"));
}

#[tokio::test]
async fn empty_delta_advances_cursor_without_saving_facts() {
    let h = harness(config());
    h.store.add_events("bob", [5, 6, 7]);
    h.store.set_facts("bob", vec![Fact::new("job", "baker", 0.7)]);

    let summary = h.job.run_once().await.unwrap().ran().unwrap();

    assert_eq!(summary.unchanged, 1);
    assert_eq!(h.store.cursor("bob"), 7);
    assert_eq!(h.store.saves.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert_eq!(h.store.facts("bob"), vec![Fact::new("job", "baker", 0.7)]);
}

#[tokio::test]
async fn extraction_failure_keeps_cursor_and_retries_same_events() {
    let h = harness(config());
    h.store.add_events("carol", [100, 200, 300]);
    h.extractor.reply(
        "carol",
        Err(Error::Parse(ParseError::UnterminatedFence)),
    );

    let summary = h.job.run_once().await.unwrap().ran().unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(h.store.cursor("carol"), 0);

    h.extractor.reply("carol", Ok(adds("plays chess")));
    let summary = h.job.run_once().await.unwrap().ran().unwrap();
    assert_eq!(summary.updated, 1);
    assert_eq!(h.store.cursor("carol"), 300);

    let calls = h.extractor.calls.lock().clone();
    assert_eq!(calls, vec![("carol".to_string(), 3), ("carol".to_string(), 3)]);
}

#[tokio::test]
async fn one_failing_subject_does_not_affect_others() {
    let h = harness(config());
    h.store.add_events("good", [1, 2, 3]);
    h.store.add_events("bad", [1, 2, 3, 4]);
    h.extractor.reply("good", Ok(adds("fine")));
    h.extractor
        .reply("bad", Err(Error::Other("model unavailable".into())));

    let summary = h.job.run_once().await.unwrap().ran().unwrap();

    assert_eq!(summary.eligible, 2);
    assert_eq!(summary.updated, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(h.store.cursor("good"), 3);
    assert_eq!(h.store.cursor("bad"), 0);
}

#[tokio::test]
async fn subjects_below_threshold_are_not_considered() {
    let h = harness(config());
    h.store.add_events("quiet", [1, 2]);

    let summary = h.job.run_once().await.unwrap().ran().unwrap();
    assert_eq!(summary, RunSummary::default());
    assert_eq!(h.extractor.calls_for("quiet"), 0);
}

#[tokio::test]
async fn evidence_window_is_bounded_and_cursor_follows_it() {
    let h = harness(ConsolidationTunables {
        min_events: 1,
        evidence_limit: 2,
        ..Default::default()
    });
    h.store.add_events("dave", [1, 2, 3, 4, 5]);

    h.job.run_once().await.unwrap();
    assert_eq!(h.store.cursor("dave"), 2);
    h.job.run_once().await.unwrap();
    assert_eq!(h.store.cursor("dave"), 4);
}

#[tokio::test]
async fn merge_respects_cap_and_removals() {
    let h = harness(ConsolidationTunables {
        min_events: 1,
        max_facts: 2,
        ..Default::default()
    });
    h.store.add_events("erin", [1]);
    h.store.set_facts(
        "erin",
        vec![
            Fact::new("pet", "has a dog", 0.6),
            Fact::new("city", "Oslo", 0.4),
            Fact::new("food", "vegan", 0.95),
        ],
    );
    h.extractor.reply(
        "erin",
        Ok(FactDelta {
            removed_facts: vec![FactKey {
                category: "pet".into(),
                content: "has a dog".into(),
            }],
            ..adds("runs marathons")
        }),
    );

    h.job.run_once().await.unwrap();

    let contents: Vec<_> = h
        .store
        .facts("erin")
        .into_iter()
        .map(|f| f.content)
        .collect();
    assert_eq!(contents, vec!["vegan".to_string(), "runs marathons".to_string()]);
}

#[tokio::test]
async fn consolidate_subject_without_evidence_touches_nothing() {
    let h = harness(config());
    let subject = lanework::model::memory::SubjectCursor {
        subject_id: "ghost".into(),
        since: 0,
        pending_events: 0,
    };

    let outcome = h.job.consolidate_subject(&subject).await.unwrap();
    assert_eq!(outcome, SubjectOutcome::NoEvidence);
    assert_eq!(h.extractor.calls_for("ghost"), 0);
    assert!(h.store.knowledge("ghost").is_none());
}

#[tokio::test]
async fn skips_while_lock_is_held() {
    let h = harness(config());
    h.store.add_events("alice", [1, 2, 3]);

    let _held = h
        .lock
        .try_acquire(LOCK_KEY, Duration::from_secs(1800))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(h.job.run_once().await.unwrap(), JobRun::Skipped);
    assert_eq!(h.extractor.calls_for("alice"), 0);
}
