//! Local collaborator implementations: an in-memory results store and a
//! directory of content-addressed code snapshots.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use nm_types::{NmResult, RunResult, StorageError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

use crate::collaborators::{ResultsStore, VersionControl};

/// A run as held by [`InMemoryResultsStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRun {
    pub record_id: String,
    pub result: RunResult,
    pub saved_at: DateTime<Utc>,
}

/// Results store backed by a concurrent map.
#[derive(Debug, Default)]
pub struct InMemoryResultsStore {
    runs: DashMap<String, StoredRun>,
}

impl InMemoryResultsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, record_id: &str) -> Option<StoredRun> {
        self.runs.get(record_id).map(|run| run.clone())
    }

    /// All runs for one architecture, oldest first.
    pub fn runs_for_architecture(&self, architecture_id: &str) -> Vec<StoredRun> {
        let mut runs: Vec<StoredRun> = self
            .runs
            .iter()
            .filter(|run| run.result.architecture_id == architecture_id)
            .map(|run| run.clone())
            .collect();
        runs.sort_by_key(|run| run.saved_at);
        runs
    }

    /// Every stored run, best first by `metric`; runs without it are skipped.
    pub fn top_by_metric(&self, metric: &str, k: usize) -> Vec<StoredRun> {
        let mut runs: Vec<(f64, StoredRun)> = self
            .runs
            .iter()
            .filter_map(|run| run.result.metric(metric).map(|v| (v, run.clone())))
            .collect();
        runs.sort_by(|a, b| b.0.total_cmp(&a.0));
        runs.into_iter().take(k).map(|(_, run)| run).collect()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

#[async_trait]
impl ResultsStore for InMemoryResultsStore {
    async fn save_run_info(&self, result: &RunResult) -> NmResult<String> {
        let record_id = Uuid::new_v4().to_string();
        self.runs.insert(
            record_id.clone(),
            StoredRun {
                record_id: record_id.clone(),
                result: result.clone(),
                saved_at: Utc::now(),
            },
        );
        debug!(record = %record_id, architecture_id = %result.architecture_id, "run stored");
        Ok(record_id)
    }
}

/// SHA-256 hex digest of generated code; used as its version id.
pub fn code_version(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())
}

/// Writes each code snapshot to `<root>/model_<hash8>.py`.
///
/// Identical code maps to the same file and version id.
#[derive(Debug, Clone)]
pub struct DirectorySnapshotter {
    root: PathBuf,
}

impl DirectorySnapshotter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn snapshot_path(&self, version: &str) -> PathBuf {
        let prefix = version.get(..8).unwrap_or(version);
        self.root.join(format!("model_{prefix}.py"))
    }

    /// Read back the code committed under `version`.
    pub async fn read_snapshot(&self, version: &str) -> NmResult<String> {
        tokio::fs::read_to_string(self.snapshot_path(version))
            .await
            .map_err(|e| {
                StorageError::SnapshotFailed {
                    message: format!("cannot read snapshot {version}: {e}"),
                }
                .into()
            })
    }
}

#[async_trait]
impl VersionControl for DirectorySnapshotter {
    async fn commit_code(&self, code: &str) -> NmResult<String> {
        let version = code_version(code);
        let path = self.snapshot_path(&version);

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StorageError::SnapshotFailed {
                message: format!("cannot create {}: {e}", self.root.display()),
            })?;
        tokio::fs::write(&path, code)
            .await
            .map_err(|e| StorageError::SnapshotFailed {
                message: format!("cannot write {}: {e}", path.display()),
            })?;

        debug!(version = %version, path = %path.display(), "code snapshot written");
        Ok(version)
    }
}
