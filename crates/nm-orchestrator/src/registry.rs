//! Concurrent table of named experiments.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use nm_types::{ExperimentError, NmResult};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;

use crate::experiment::{ExperimentLogEntry, ExperimentSnapshot, ExperimentState, ExperimentStatus};

struct TrackedExperiment {
    state: Arc<RwLock<ExperimentState>>,
    stop: watch::Sender<bool>,
}

/// What the driving task needs to run a freshly registered experiment.
pub(crate) struct Registration {
    pub(crate) state: Arc<RwLock<ExperimentState>>,
    pub(crate) stop: watch::Receiver<bool>,
}

/// Experiment id -> state. Entries are never removed.
#[derive(Default)]
pub(crate) struct ExperimentRegistry {
    experiments: DashMap<String, TrackedExperiment>,
}

impl ExperimentRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Track a new experiment in the `scheduled` state.
    pub(crate) fn register(&self, id: &str) -> NmResult<Registration> {
        match self.experiments.entry(id.to_string()) {
            Entry::Occupied(_) => Err(ExperimentError::AlreadyScheduled {
                experiment_id: id.to_string(),
            }
            .into()),
            Entry::Vacant(slot) => {
                let state = Arc::new(RwLock::new(ExperimentState::new(id)));
                let (stop, stop_rx) = watch::channel(false);
                slot.insert(TrackedExperiment {
                    state: Arc::clone(&state),
                    stop,
                });
                Ok(Registration { state, stop: stop_rx })
            }
        }
    }

    fn state(&self, id: &str) -> NmResult<Arc<RwLock<ExperimentState>>> {
        self.experiments
            .get(id)
            .map(|tracked| Arc::clone(&tracked.state))
            .ok_or_else(|| {
                ExperimentError::NotFound {
                    experiment_id: id.to_string(),
                }
                .into()
            })
    }

    /// Mark the experiment `stopping` and signal its driver. Returns false
    /// when it had already finished.
    pub(crate) fn request_stop(&self, id: &str) -> NmResult<bool> {
        let tracked = self.experiments.get(id).ok_or_else(|| ExperimentError::NotFound {
            experiment_id: id.to_string(),
        })?;
        // Signal under the state lock so a driver that sees `Stopping` also sees the flag.
        let mut state = tracked.state.write();
        let stopping = state.mark_stopping();
        if stopping {
            tracked.stop.send_replace(true);
        }
        Ok(stopping)
    }

    pub(crate) fn snapshot(&self, id: &str) -> NmResult<ExperimentSnapshot> {
        Ok(self.state(id)?.read().snapshot())
    }

    pub(crate) fn logs(&self, id: &str, since: Option<DateTime<Utc>>) -> NmResult<Vec<ExperimentLogEntry>> {
        Ok(self.state(id)?.read().logs_since(since))
    }

    /// Sorted ids of experiments that are running or winding down.
    pub(crate) fn running(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .experiments
            .iter()
            .filter(|tracked| {
                matches!(
                    tracked.state.read().status,
                    ExperimentStatus::Running | ExperimentStatus::Stopping
                )
            })
            .map(|tracked| tracked.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Snapshots of every tracked experiment, ordered by id.
    pub(crate) fn all(&self) -> Vec<ExperimentSnapshot> {
        let mut snapshots: Vec<ExperimentSnapshot> = self
            .experiments
            .iter()
            .map(|tracked| tracked.state.read().snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        snapshots
    }
}
