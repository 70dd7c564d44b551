//! Named experiment records and their lifecycle.

use chrono::{DateTime, Utc};
use nm_types::RunResult;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a named experiment.
///
/// `Scheduled -> Running -> Completed | Failed`, with `Stopping` entered from
/// either active state when a stop is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    Scheduled,
    Running,
    Stopping,
    Completed,
    Failed,
}

impl ExperimentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentLogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Mutable state of one tracked experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentState {
    pub id: String,
    pub status: ExperimentStatus,
    pub scheduled_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub logs: Vec<ExperimentLogEntry>,
    pub result: Option<RunResult>,
    pub error: Option<String>,
}

impl ExperimentState {
    pub fn new(id: impl Into<String>) -> Self {
        let mut state = Self {
            id: id.into(),
            status: ExperimentStatus::Scheduled,
            scheduled_at: Utc::now(),
            start_time: None,
            finished_at: None,
            logs: Vec::new(),
            result: None,
            error: None,
        };
        state.log("experiment scheduled");
        state
    }

    pub fn log(&mut self, message: impl Into<String>) {
        self.logs.push(ExperimentLogEntry {
            timestamp: Utc::now(),
            message: message.into(),
        });
    }

    /// A stop that already landed keeps the experiment `stopping`.
    pub fn mark_running(&mut self) {
        if self.status != ExperimentStatus::Stopping {
            self.status = ExperimentStatus::Running;
        }
        self.start_time = Some(Utc::now());
        self.log("experiment started");
    }

    /// Returns false when the experiment already finished.
    pub fn mark_stopping(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = ExperimentStatus::Stopping;
        self.log("stop requested");
        true
    }

    pub fn mark_completed(&mut self, result: RunResult) {
        self.status = ExperimentStatus::Completed;
        self.finished_at = Some(Utc::now());
        self.log(format!("cycle completed for {}", result.architecture_id));
        self.result = Some(result);
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = ExperimentStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.log(format!("experiment failed: {error}"));
        self.error = Some(error);
    }

    /// Entries logged at or after `since`, or all of them.
    pub fn logs_since(&self, since: Option<DateTime<Utc>>) -> Vec<ExperimentLogEntry> {
        self.logs
            .iter()
            .filter(|entry| since.map_or(true, |t| entry.timestamp >= t))
            .cloned()
            .collect()
    }

    pub fn snapshot(&self) -> ExperimentSnapshot {
        ExperimentSnapshot {
            id: self.id.clone(),
            status: self.status,
            scheduled_at: self.scheduled_at,
            start_time: self.start_time,
            finished_at: self.finished_at,
            result: self.result.clone(),
            error: self.error.clone(),
            log_count: self.logs.len(),
        }
    }
}

/// Read-only view returned by status queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSnapshot {
    pub id: String,
    pub status: ExperimentStatus,
    pub scheduled_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<RunResult>,
    pub error: Option<String>,
    pub log_count: usize,
}
