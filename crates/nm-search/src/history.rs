//! Append-only evaluation history shared by all strategies.

use chrono::{DateTime, Utc};
use nm_space::ArchitectureVector;
use nm_types::Metrics;
use parking_lot::RwLock;

use crate::config::ObjectiveDirection;

/// One completed evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub vector: ArchitectureVector,
    pub metrics: Metrics,
    /// Position in the history, starting at 0.
    pub sequence: usize,
    pub recorded_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }
}

/// Ordered (vector, metrics) pairs.
///
/// Entries are never modified once appended. Concurrent appends are
/// serialized by the internal lock.
#[derive(Debug, Default)]
pub struct History {
    entries: RwLock<Vec<HistoryEntry>>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an evaluation and return its sequence number.
    pub fn append(&self, vector: ArchitectureVector, metrics: Metrics) -> usize {
        let mut entries = self.entries.write();
        let sequence = entries.len();
        entries.push(HistoryEntry {
            vector,
            metrics,
            sequence,
            recorded_at: Utc::now(),
        });
        sequence
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn snapshot(&self) -> Vec<HistoryEntry> {
        self.entries.read().clone()
    }

    /// Top `k` entries by `metric`, highest first.
    ///
    /// Entries without the metric are skipped; ties keep insertion order.
    pub fn best(&self, metric: &str, k: usize) -> Vec<HistoryEntry> {
        let entries = self.entries.read();
        let mut scored: Vec<(f64, &HistoryEntry)> = entries
            .iter()
            .filter_map(|entry| entry.metric(metric).map(|value| (value, entry)))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored
            .into_iter()
            .take(k)
            .map(|(_, entry)| entry.clone())
            .collect()
    }

    /// Surrogate training data: raw vector slots and the objective, sign
    /// flipped for minimization so larger is always better.
    pub fn training_set(
        &self,
        objective: &str,
        direction: ObjectiveDirection,
    ) -> (Vec<Vec<f64>>, Vec<f64>) {
        let entries = self.entries.read();
        entries
            .iter()
            .filter_map(|entry| {
                entry.metric(objective).filter(|v| v.is_finite()).map(|value| {
                    let target = match direction {
                        ObjectiveDirection::Maximize => value,
                        ObjectiveDirection::Minimize => -value,
                    };
                    (entry.vector.values().to_vec(), target)
                })
            })
            .unzip()
    }
}
