//! # nm-orchestrator
//!
//! Drives architecture search: each cycle asks the search strategy for a
//! vector, generates and snapshots code for it, runs the code in a sandbox
//! and feeds the metrics back to the strategy.
//!
//! Provides the collaborator traits, the [`Orchestrator`] with single-cycle,
//! batch and named-experiment entry points, and local implementations of the
//! results store and code snapshotter.

mod collaborators;
mod config;
mod experiment;
mod lease;
mod local;
mod orchestrator;
mod registry;
pub mod telemetry;

pub use collaborators::{
    CodeGenerator, Collaborators, ExecutionSandbox, ResultsStore, RunStatus, SandboxHandle,
    SandboxOutcome, SandboxSpec, VersionControl,
};
pub use config::{OrchestratorConfig, SandboxDefaults};
pub use experiment::{ExperimentLogEntry, ExperimentSnapshot, ExperimentState, ExperimentStatus};
pub use local::{code_version, DirectorySnapshotter, InMemoryResultsStore, StoredRun};
pub use orchestrator::{architecture_id, BatchEntry, Orchestrator, STOPPED_BY_REQUEST};
