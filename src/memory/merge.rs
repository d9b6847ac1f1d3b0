//! Applying an extraction delta to a subject's fact list.
//!
//! Order is fixed: removals, then updates, then additions, then eviction down
//! to the cap. Removals and updates match on exact `(category, content)`.

use crate::model::memory::{DEFAULT_CONFIDENCE, Fact, FactDelta};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

/// Result of [`merge_facts`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    pub facts: Vec<Fact>,
    /// Facts dropped to respect the cap, lowest confidence first.
    pub evicted: Vec<Fact>,
    pub removed: usize,
    pub updated: usize,
    pub added: usize,
}

pub fn merge_facts(
    existing: Vec<Fact>,
    delta: &FactDelta,
    now: DateTime<Utc>,
    max_facts: usize,
) -> MergeOutcome {
    let mut facts = existing;
    let mut outcome = MergeOutcome::default();

    if !delta.removed_facts.is_empty() {
        let before = facts.len();
        facts.retain(|fact| {
            !delta
                .removed_facts
                .iter()
                .any(|key| fact.matches(&key.category, &key.content))
        });
        outcome.removed = before - facts.len();
    }

    for update in &delta.updated_facts {
        let Some(fact) = facts
            .iter_mut()
            .find(|f| f.matches(&update.category, &update.original_content))
        else {
            continue;
        };
        if let Some(content) = &update.new_content {
            fact.content = content.clone();
        }
        if let Some(confidence) = update.confidence {
            fact.confidence = clamp_confidence(confidence);
        }
        fact.last_confirmed_at = Some(now);
        outcome.updated += 1;
    }

    for new in &delta.new_facts {
        facts.push(Fact {
            category: new.category.clone(),
            content: new.content.clone(),
            confidence: clamp_confidence(new.confidence.unwrap_or(DEFAULT_CONFIDENCE)),
            extracted_at: Some(now),
            last_confirmed_at: Some(now),
        });
        outcome.added += 1;
    }

    outcome.evicted = evict_lowest(&mut facts, max_facts);
    outcome.facts = facts;
    outcome
}

fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        DEFAULT_CONFIDENCE
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Eviction candidate; the heap's top is the next fact to drop.
struct Candidate {
    confidence: f64,
    index: usize,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // Lower confidence ranks higher; among equals, the earlier insert.
        other
            .confidence
            .total_cmp(&self.confidence)
            .then_with(|| other.index.cmp(&self.index))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

/// Drop the lowest-confidence facts until at most `max_facts` remain. Kept
/// facts stay in their original order.
fn evict_lowest(facts: &mut Vec<Fact>, max_facts: usize) -> Vec<Fact> {
    let excess = facts.len().saturating_sub(max_facts);
    if excess == 0 {
        return Vec::new();
    }

    let mut heap: BinaryHeap<Candidate> = facts
        .iter()
        .enumerate()
        .map(|(index, f)| Candidate {
            confidence: f.confidence,
            index,
        })
        .collect();
    let mut doomed = HashSet::with_capacity(excess);
    let mut order = Vec::with_capacity(excess);
    while order.len() < excess {
        let Some(candidate) = heap.pop() else { break };
        doomed.insert(candidate.index);
        order.push(candidate.index);
    }

    let mut slots: Vec<Option<Fact>> = std::mem::take(facts).into_iter().map(Some).collect();
    let evicted = order
        .into_iter()
        .filter_map(|index| slots[index].take())
        .collect();
    facts.extend(
        slots
            .into_iter()
            .enumerate()
            .filter(|(index, _)| !doomed.contains(index))
            .filter_map(|(_, slot)| slot),
    );
    evicted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::memory::{FactKey, FactUpdate, NewFact};

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn new_fact(category: &str, content: &str, confidence: Option<f64>) -> NewFact {
        NewFact {
            category: category.into(),
            content: content.into(),
            confidence,
        }
    }

    #[test]
    fn remove_then_update_then_add() {
        let existing = vec![
            Fact::new("pet", "has a dog", 0.9),
            Fact::new("job", "nurse", 0.7),
        ];
        let delta = FactDelta {
            removed_facts: vec![FactKey {
                category: "pet".into(),
                content: "has a dog".into(),
            }],
            updated_facts: vec![FactUpdate {
                category: "job".into(),
                original_content: "nurse".into(),
                new_content: Some("principal".into()),
                confidence: Some(0.95),
            }],
            new_facts: vec![new_fact("pet", "has a cat", None)],
            ..Default::default()
        };

        let out = merge_facts(existing, &delta, now(), 30);

        assert_eq!((out.removed, out.updated, out.added), (1, 1, 1));
        assert_eq!(out.facts.len(), 2);
        assert_eq!(out.facts[0].content, "principal");
        assert_eq!(out.facts[0].confidence, 0.95);
        assert_eq!(out.facts[0].last_confirmed_at, Some(now()));
        assert_eq!(out.facts[1].content, "has a cat");
        assert_eq!(out.facts[1].confidence, DEFAULT_CONFIDENCE);
        assert_eq!(out.facts[1].extracted_at, Some(now()));
    }

    #[test]
    fn unmatched_keys_change_nothing() {
        let existing = vec![Fact::new("pet", "has a dog", 0.9)];
        let delta = FactDelta {
            removed_facts: vec![FactKey {
                category: "hobby".into(),
                content: "has a dog".into(),
            }],
            updated_facts: vec![FactUpdate {
                category: "pet".into(),
                original_content: "has a cat".into(),
                new_content: Some("x".into()),
                confidence: None,
            }],
            ..Default::default()
        };

        let out = merge_facts(existing.clone(), &delta, now(), 30);
        assert_eq!(out.facts, existing);
        assert_eq!((out.removed, out.updated), (0, 0));
    }

    #[test]
    fn overflow_evicts_lowest_confidence_and_keeps_order() {
        let existing: Vec<Fact> = (0..30)
            .map(|i| Fact::new("misc", format!("fact {i}"), 0.5 + (i as f64) / 100.0))
            .collect();
        let delta = FactDelta {
            new_facts: vec![
                new_fact("misc", "strong", Some(0.99)),
                new_fact("misc", "weak", Some(0.1)),
            ],
            ..Default::default()
        };

        let out = merge_facts(existing, &delta, now(), 30);

        assert_eq!(out.facts.len(), 30);
        let evicted: Vec<_> = out.evicted.iter().map(|f| f.content.as_str()).collect();
        assert_eq!(evicted, vec!["weak", "fact 0"]);
        let min_kept = out
            .facts
            .iter()
            .map(|f| f.confidence)
            .fold(f64::INFINITY, f64::min);
        assert!(out.evicted.iter().all(|f| f.confidence <= min_kept));
        assert_eq!(out.facts[0].content, "fact 1");
        assert_eq!(out.facts[29].content, "strong");
    }

    #[test]
    fn ties_evict_earliest_inserted() {
        let existing = vec![
            Fact::new("a", "first", 0.5),
            Fact::new("a", "second", 0.5),
            Fact::new("a", "third", 0.5),
        ];
        let out = merge_facts(existing, &FactDelta::default(), now(), 2);
        assert_eq!(out.evicted[0].content, "first");
        let kept: Vec<_> = out.facts.iter().map(|f| f.content.as_str()).collect();
        assert_eq!(kept, vec!["second", "third"]);
    }

    #[test]
    fn confidence_is_clamped() {
        let delta = FactDelta {
            new_facts: vec![
                new_fact("a", "high", Some(4.0)),
                new_fact("a", "nan", Some(f64::NAN)),
            ],
            ..Default::default()
        };
        let out = merge_facts(Vec::new(), &delta, now(), 30);
        assert_eq!(out.facts[0].confidence, 1.0);
        assert_eq!(out.facts[1].confidence, DEFAULT_CONFIDENCE);
    }
}
