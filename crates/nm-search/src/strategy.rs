//! The search strategy interface.

use nm_space::{ArchitectureVector, SearchSpace};
use nm_types::{ArchitectureError, Metrics, NmError, NmResult};
use std::sync::Arc;

use crate::history::HistoryEntry;

/// Common trait for all search strategies.
///
/// Strategies are shared across concurrently running cycles, so every method
/// takes `&self` and implementations serialize their own state changes.
/// None of the methods block on I/O.
pub trait SearchStrategy: Send + Sync {
    /// Propose the next vector to evaluate.
    ///
    /// Fails with `SearchError::SpaceExhausted` instead of blocking once the
    /// strategy has nothing left to offer.
    fn suggest_architecture(&self) -> NmResult<ArchitectureVector>;

    /// Record an evaluated vector.
    ///
    /// Fails with `NmError::MissingField` when `metrics` lacks the strategy's
    /// objective, leaving the history unchanged.
    fn update_with_results(&self, vector: ArchitectureVector, metrics: Metrics) -> NmResult<()>;

    /// Top `k` history entries by `metric`, highest first. Never fails.
    fn get_best_architectures(&self, metric: &str, k: usize) -> Vec<HistoryEntry>;

    /// Snapshot of the evaluation history in insertion order.
    fn history(&self) -> Vec<HistoryEntry>;

    fn history_len(&self) -> usize;

    fn space(&self) -> &Arc<SearchSpace>;

    /// Metric the strategy learns from.
    fn objective(&self) -> &str;

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}

/// Shared precondition of `update_with_results`.
pub(crate) fn check_update(
    space: &SearchSpace,
    objective: &str,
    vector: &ArchitectureVector,
    metrics: &Metrics,
) -> NmResult<()> {
    if !vector.same_space(space) {
        return Err(ArchitectureError::DimensionMismatch {
            expected: space.dimensionality(),
            actual: vector.len(),
        }
        .into());
    }
    if !metrics.contains_key(objective) {
        return Err(NmError::missing_field(objective));
    }
    Ok(())
}
