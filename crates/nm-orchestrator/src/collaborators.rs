//! Interfaces of the services a cycle drives: code generation, versioned
//! snapshots, sandboxed execution and result persistence.

use async_trait::async_trait;
use nm_types::{ArchitectureSpec, Metrics, NmResult, RunResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Turns an architecture specification into training code.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    /// Fails with `GenerationError` when no usable code could be produced.
    async fn generate_code(&self, spec: &ArchitectureSpec) -> NmResult<String>;
}

/// Stores code snapshots and hands back a version id.
#[async_trait]
pub trait VersionControl: Send + Sync {
    async fn commit_code(&self, code: &str) -> NmResult<String>;
}

/// Persists run records.
#[async_trait]
pub trait ResultsStore: Send + Sync {
    /// Save a run and return the store's record id.
    async fn save_run_info(&self, result: &RunResult) -> NmResult<String>;
}

/// What a sandbox is created with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxSpec {
    pub code: String,
    pub requirements: Vec<String>,
    pub data_path: Option<PathBuf>,
}

/// Opaque identifier of a live sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SandboxHandle(pub String);

impl SandboxHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SandboxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failed,
}

/// Outcome of running code in a sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxOutcome {
    pub status: RunStatus,
    #[serde(default)]
    pub metrics: Metrics,
    /// Logs or error details reported by the sandbox.
    #[serde(default)]
    pub diagnostics: serde_json::Value,
}

impl SandboxOutcome {
    pub fn success(metrics: Metrics) -> Self {
        Self {
            status: RunStatus::Success,
            metrics,
            diagnostics: serde_json::Value::Null,
        }
    }

    pub fn failure(diagnostics: serde_json::Value) -> Self {
        Self {
            status: RunStatus::Failed,
            metrics: Metrics::new(),
            diagnostics,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}

/// Isolated execution environment.
///
/// Every handle returned by `create` must eventually be passed to `cleanup`.
/// Timeouts are the sandbox's own concern.
#[async_trait]
pub trait ExecutionSandbox: Send + Sync {
    async fn create(&self, spec: &SandboxSpec) -> NmResult<SandboxHandle>;

    /// Run the sandboxed code, optionally with a custom command.
    async fn run(&self, handle: &SandboxHandle, command: Option<&str>) -> NmResult<SandboxOutcome>;

    async fn cleanup(&self, handle: &SandboxHandle) -> NmResult<()>;
}

/// The set of services an orchestrator is wired with.
#[derive(Clone)]
pub struct Collaborators {
    pub generator: Arc<dyn CodeGenerator>,
    pub version_control: Arc<dyn VersionControl>,
    pub sandbox: Arc<dyn ExecutionSandbox>,
    pub store: Arc<dyn ResultsStore>,
}

impl Collaborators {
    pub fn new(
        generator: Arc<dyn CodeGenerator>,
        version_control: Arc<dyn VersionControl>,
        sandbox: Arc<dyn ExecutionSandbox>,
        store: Arc<dyn ResultsStore>,
    ) -> Self {
        Self {
            generator,
            version_control,
            sandbox,
            store,
        }
    }
}
