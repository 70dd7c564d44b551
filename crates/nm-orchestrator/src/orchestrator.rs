//! Search cycles, batches and named experiments.

use chrono::{DateTime, Utc};
use nm_search::SearchStrategy;
use nm_space::{ArchitectureVector, SearchSpace};
use nm_types::{
    internal_error, ArchitectureError, ArchitectureSpec, ExperimentError, Metrics, NmError,
    NmResult, ResultSubmission, RunResult, SandboxError,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::collaborators::{Collaborators, SandboxSpec};
use crate::config::OrchestratorConfig;
use crate::experiment::{ExperimentLogEntry, ExperimentSnapshot, ExperimentState};
use crate::lease::SandboxLease;
use crate::registry::ExperimentRegistry;

/// Error recorded on experiments ended by `stop_experiment`.
pub const STOPPED_BY_REQUEST: &str = "stopped by request";

/// Per-slot outcome of [`Orchestrator::run_batch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchEntry {
    Success(RunResult),
    Failed { error: String },
}

impl BatchEntry {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn result(&self) -> Option<&RunResult> {
        match self {
            Self::Success(result) => Some(result),
            Self::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Success(_) => None,
            Self::Failed { error } => Some(error),
        }
    }
}

impl From<NmResult<RunResult>> for BatchEntry {
    fn from(outcome: NmResult<RunResult>) -> Self {
        match outcome {
            Ok(result) => Self::Success(result),
            Err(e) => Self::Failed { error: e.to_string() },
        }
    }
}

/// Short id derived from a code version.
pub fn architecture_id(version: &str) -> String {
    let prefix: String = version.chars().take(8).collect();
    format!("arch_{prefix}")
}

/// Drives the search loop: suggest, generate, snapshot, run, record.
///
/// Cloning is cheap and every clone shares the same strategy and experiment
/// table.
#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<OrchestratorConfig>,
    strategy: Arc<dyn SearchStrategy>,
    collaborators: Collaborators,
    cycle_slots: Option<Arc<Semaphore>>,
    experiments: Arc<ExperimentRegistry>,
}

impl Orchestrator {
    /// Validate `config` and resolve its strategy.
    pub fn new(config: OrchestratorConfig, collaborators: Collaborators) -> NmResult<Self> {
        config.validate()?;
        let space = Arc::new(config.search_space.clone());
        let strategy = config.strategy.build(space)?;
        Ok(Self::assemble(config, strategy, collaborators))
    }

    /// Use a prebuilt strategy; its space replaces the configured one.
    pub fn with_strategy(
        mut config: OrchestratorConfig,
        strategy: Arc<dyn SearchStrategy>,
        collaborators: Collaborators,
    ) -> NmResult<Self> {
        config.search_space = SearchSpace::clone(strategy.space());
        config.validate()?;
        Ok(Self::assemble(config, strategy, collaborators))
    }

    fn assemble(
        config: OrchestratorConfig,
        strategy: Arc<dyn SearchStrategy>,
        collaborators: Collaborators,
    ) -> Self {
        info!(
            strategy = strategy.name(),
            dims = strategy.space().dimensionality(),
            max_parallel_cycles = ?config.max_parallel_cycles,
            "orchestrator ready"
        );
        Self {
            cycle_slots: config.max_parallel_cycles.map(|n| Arc::new(Semaphore::new(n))),
            config: Arc::new(config),
            strategy,
            collaborators,
            experiments: Arc::new(ExperimentRegistry::new()),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn strategy(&self) -> &Arc<dyn SearchStrategy> {
        &self.strategy
    }

    pub fn space(&self) -> &Arc<SearchSpace> {
        self.strategy.space()
    }

    /// Ask the strategy for the next vector and check it belongs to our space.
    pub async fn next_architecture(&self) -> NmResult<ArchitectureVector> {
        let strategy = Arc::clone(&self.strategy);
        let vector = tokio::task::spawn_blocking(move || strategy.suggest_architecture())
            .await
            .map_err(|e| internal_error!("suggestion task failed: {e}"))??;

        if !vector.same_space(self.space()) || !vector.is_well_formed() {
            return Err(ArchitectureError::Malformed {
                message: format!(
                    "strategy {} returned a vector of length {} for a {}-dimensional space",
                    self.strategy.name(),
                    vector.len(),
                    self.space().dimensionality()
                ),
            }
            .into());
        }
        Ok(vector)
    }

    /// Run one full evaluation cycle.
    ///
    /// Any sandbox created along the way is cleaned up whether the cycle
    /// succeeds, fails or is cancelled.
    pub async fn run_cycle(&self) -> NmResult<RunResult> {
        self.run_cycle_until(std::future::pending()).await
    }

    /// Run one cycle that `interrupt` may cut short.
    ///
    /// The interrupt is only honoured until the sandbox run returns. From
    /// there on the result is recorded and the sandbox released without
    /// racing it, so a late stop cannot orphan a persisted run.
    async fn run_cycle_until<F>(&self, interrupt: F) -> NmResult<RunResult>
    where
        F: Future<Output = NmError>,
    {
        let span = info_span!("cycle", cycle_id = %Uuid::new_v4());
        self.interruptible_cycle(interrupt).instrument(span).await
    }

    async fn interruptible_cycle<F>(&self, interrupt: F) -> NmResult<RunResult>
    where
        F: Future<Output = NmError>,
    {
        let started = tokio::select! {
            biased;
            e = interrupt => Err(e),
            evaluation = self.start_cycle() => evaluation,
        };
        let outcome = match started {
            Ok(evaluation) => self.finish_cycle(evaluation).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(result) => {
                info!(architecture_id = %result.architecture_id, "cycle completed");
                Ok(result)
            }
            Err(e) => {
                warn!(error = %e, "cycle failed");
                Err(e)
            }
        }
    }

    /// Suggest, generate, commit, create the sandbox and run it.
    async fn start_cycle(&self) -> NmResult<Evaluation> {
        let slot = match &self.cycle_slots {
            Some(slots) => Some(
                Arc::clone(slots)
                    .acquire_owned()
                    .await
                    .map_err(|e| internal_error!("cycle limiter closed: {e}"))?,
            ),
            None => None,
        };

        let vector = self.next_architecture().await?;
        let arch_spec = vector.decode();
        debug!(parameters = arch_spec.len(), "architecture decoded");

        let code = self.collaborators.generator.generate_code(&arch_spec).await?;
        let version = self.collaborators.version_control.commit_code(&code).await?;
        debug!(version = %version, "code committed");

        let sandbox_spec = SandboxSpec {
            code,
            requirements: self.config.sandbox.requirements.clone(),
            data_path: self.config.sandbox.data_path.clone(),
        };
        let lease = SandboxLease::acquire(Arc::clone(&self.collaborators.sandbox), &sandbox_spec).await?;
        let run = self.run_sandbox(&lease).await;

        Ok(Evaluation {
            _slot: slot,
            lease,
            vector,
            arch_spec,
            version,
            run,
        })
    }

    async fn run_sandbox(&self, lease: &SandboxLease) -> NmResult<Metrics> {
        let outcome = lease
            .sandbox()
            .run(lease.handle(), self.config.sandbox.command.as_deref())
            .await?;
        if !outcome.is_success() {
            return Err(SandboxError::RunFailed {
                diagnostics: outcome.diagnostics.to_string(),
            }
            .into());
        }
        Ok(outcome.metrics)
    }

    /// Record a successful run, then release the sandbox either way.
    async fn finish_cycle(&self, evaluation: Evaluation) -> NmResult<RunResult> {
        let Evaluation {
            _slot,
            lease,
            vector,
            arch_spec,
            version,
            run,
        } = evaluation;

        let outcome = match run {
            Ok(metrics) => {
                let submission = ResultSubmission {
                    architecture_id: Some(architecture_id(&version)),
                    metrics: Some(metrics),
                    code_version: Some(version),
                    arch_spec: Some(arch_spec),
                };
                self.submit_results(vector, submission).await
            }
            Err(e) => Err(e),
        };
        lease.release().await;
        outcome
    }

    /// Validate, persist and learn from an evaluated architecture.
    ///
    /// Fails with `MissingField` before touching the store when
    /// `architecture_id` or `metrics` is absent.
    pub async fn submit_results(
        &self,
        vector: ArchitectureVector,
        submission: ResultSubmission,
    ) -> NmResult<RunResult> {
        let result = submission.validate()?;
        let record_id = self.collaborators.store.save_run_info(&result).await?;
        self.strategy.update_with_results(vector, result.metrics.clone())?;
        info!(
            architecture_id = %result.architecture_id,
            record = %record_id,
            history = self.strategy.history_len(),
            "results recorded"
        );
        Ok(result)
    }

    /// Run `batch_size` cycles and return one entry per cycle, in order.
    ///
    /// Failures never abort the batch. In parallel mode every cycle runs as
    /// its own task.
    pub async fn run_batch(&self, batch_size: usize, parallel: bool) -> Vec<BatchEntry> {
        info!(batch_size, parallel, "batch started");
        let mut entries = Vec::with_capacity(batch_size);

        if parallel {
            let tasks: Vec<_> = (0..batch_size)
                .map(|_| {
                    let this = self.clone();
                    tokio::spawn(async move { this.run_cycle().await })
                })
                .collect();
            for task in tasks {
                entries.push(match task.await {
                    Ok(outcome) => BatchEntry::from(outcome),
                    Err(e) => BatchEntry::Failed {
                        error: format!("cycle task aborted: {e}"),
                    },
                });
            }
        } else {
            for _ in 0..batch_size {
                entries.push(BatchEntry::from(self.run_cycle().await));
            }
        }

        let failed = entries.iter().filter(|entry| !entry.is_success()).count();
        info!(batch_size, failed, "batch finished");
        entries
    }

    /// Start a named experiment running one cycle in the background.
    pub async fn schedule_experiment(&self, experiment_id: &str) -> NmResult<()> {
        let registration = self.experiments.register(experiment_id)?;
        info!(experiment = %experiment_id, "experiment scheduled");

        let state = Arc::clone(&registration.state);
        let driver = tokio::spawn(self.clone().drive_experiment(
            experiment_id.to_string(),
            registration.state,
            registration.stop,
        ));

        // A panicking driver would otherwise leave the experiment active forever.
        let id = experiment_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = driver.await {
                warn!(experiment = %id, error = %e, "experiment driver aborted");
                state.write().mark_failed(format!("experiment task aborted: {e}"));
            }
        });
        Ok(())
    }

    async fn drive_experiment(
        self,
        experiment_id: String,
        state: Arc<RwLock<ExperimentState>>,
        mut stop: watch::Receiver<bool>,
    ) {
        {
            let mut state = state.write();
            if state.status.is_terminal() || *stop.borrow() {
                if !state.status.is_terminal() {
                    state.mark_failed(STOPPED_BY_REQUEST.to_string());
                }
                return;
            }
            state.mark_running();
        }
        info!(experiment = %experiment_id, "experiment running");

        let cancelled_id = experiment_id.clone();
        let outcome = self
            .run_cycle_until(async move {
                stop_requested(&mut stop).await;
                NmError::from(ExperimentError::Cancelled {
                    experiment_id: cancelled_id,
                })
            })
            .await;

        let mut state = state.write();
        match outcome {
            Ok(result) => {
                info!(experiment = %experiment_id, architecture_id = %result.architecture_id, "experiment completed");
                state.mark_completed(result);
            }
            Err(NmError::Experiment(ExperimentError::Cancelled { .. })) => {
                info!(experiment = %experiment_id, "experiment stopped");
                state.mark_failed(STOPPED_BY_REQUEST.to_string());
            }
            Err(e) => {
                warn!(experiment = %experiment_id, error = %e, "experiment failed");
                state.mark_failed(e.to_string());
            }
        }
    }

    /// Request a stop. A cycle still waiting on its sandbox run is cancelled
    /// and the experiment ends `failed`. Once the run has returned, the cycle
    /// finishes and its result stands. Stopping a finished experiment does
    /// nothing.
    pub fn stop_experiment(&self, experiment_id: &str) -> NmResult<()> {
        if self.experiments.request_stop(experiment_id)? {
            info!(experiment = %experiment_id, "stop requested");
        } else {
            debug!(experiment = %experiment_id, "stop ignored, experiment already finished");
        }
        Ok(())
    }

    pub fn get_experiment_status(&self, experiment_id: &str) -> NmResult<ExperimentSnapshot> {
        self.experiments.snapshot(experiment_id)
    }

    /// Log entries of an experiment, optionally only those at or after `since`.
    pub fn get_experiment_logs(
        &self,
        experiment_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> NmResult<Vec<ExperimentLogEntry>> {
        self.experiments.logs(experiment_id, since)
    }

    /// Ids of experiments currently running or stopping, sorted.
    pub fn list_running_experiments(&self) -> Vec<String> {
        self.experiments.running()
    }

    pub fn list_experiments(&self) -> Vec<ExperimentSnapshot> {
        self.experiments.all()
    }
}

/// A cycle whose sandbox run has returned.
struct Evaluation {
    _slot: Option<OwnedSemaphorePermit>,
    lease: SandboxLease,
    vector: ArchitectureVector,
    arch_spec: ArchitectureSpec,
    version: String,
    run: NmResult<Metrics>,
}

/// Resolves once the stop flag is raised; never if the sender goes away.
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    while !*stop.borrow_and_update() {
        if stop.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{
        CodeGenerator, ExecutionSandbox, ResultsStore, SandboxHandle, SandboxOutcome, VersionControl,
    };
    use crate::experiment::ExperimentStatus;
    use crate::local::{code_version, InMemoryResultsStore};
    use async_trait::async_trait;
    use nm_search::{BayesianConfig, HistoryEntry, RandomSearchConfig, StrategyConfig};
    use nm_types::GenerationError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct TemplateGenerator;

    #[async_trait]
    impl CodeGenerator for TemplateGenerator {
        async fn generate_code(&self, spec: &ArchitectureSpec) -> NmResult<String> {
            Ok(format!("# generated model\nCONFIG = {}\n", serde_json::to_string(spec)?))
        }
    }

    struct BrokenGenerator;

    #[async_trait]
    impl CodeGenerator for BrokenGenerator {
        async fn generate_code(&self, _spec: &ArchitectureSpec) -> NmResult<String> {
            Err(GenerationError::Failed {
                attempts: 3,
                message: "model refused".into(),
            }
            .into())
        }
    }

    #[derive(Default)]
    struct SequencedVersions {
        commits: AtomicUsize,
    }

    #[async_trait]
    impl VersionControl for SequencedVersions {
        async fn commit_code(&self, code: &str) -> NmResult<String> {
            let n = self.commits.fetch_add(1, Ordering::SeqCst);
            Ok(code_version(&format!("{n}:{code}")))
        }
    }

    #[derive(Default)]
    struct MockSandbox {
        created: AtomicUsize,
        runs: AtomicUsize,
        cleanups_started: AtomicUsize,
        cleanups: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        /// 1-based run number that reports failure.
        fail_on_run: Option<usize>,
        hang: bool,
        delay: Option<Duration>,
        cleanup_delay: Option<Duration>,
        fail_cleanup: bool,
    }

    #[async_trait]
    impl ExecutionSandbox for MockSandbox {
        async fn create(&self, _spec: &SandboxSpec) -> NmResult<SandboxHandle> {
            let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(SandboxHandle::new(format!("sbx-{n}")))
        }

        async fn run(&self, _handle: &SandboxHandle, _command: Option<&str>) -> NmResult<SandboxOutcome> {
            let n = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            if self.hang {
                return std::future::pending().await;
            }
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail_on_run == Some(n) {
                return Ok(SandboxOutcome::failure(serde_json::json!({"stderr": "CUDA out of memory"})));
            }
            Ok(SandboxOutcome::success(Metrics::from([
                ("accuracy".to_string(), 0.5 + n as f64 * 0.01),
                ("latency_ms".to_string(), 12.0),
            ])))
        }

        async fn cleanup(&self, handle: &SandboxHandle) -> NmResult<()> {
            self.cleanups_started.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.cleanup_delay {
                tokio::time::sleep(delay).await;
            }
            self.cleanups.fetch_add(1, Ordering::SeqCst);
            if self.fail_cleanup {
                return Err(SandboxError::CleanupFailed {
                    handle: handle.to_string(),
                    message: "container already gone".into(),
                }
                .into());
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingStore {
        saves: AtomicUsize,
        inner: InMemoryResultsStore,
    }

    #[async_trait]
    impl ResultsStore for CountingStore {
        async fn save_run_info(&self, result: &RunResult) -> NmResult<String> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            self.inner.save_run_info(result).await
        }
    }

    fn space() -> SearchSpace {
        SearchSpace::new()
            .add_int("num_layers", 2, 12)
            .add_log_float("learning_rate", 1e-5, 1e-2)
            .add_choice("activation", ["relu", "gelu", "swish"])
    }

    fn config() -> OrchestratorConfig {
        OrchestratorConfig::new(
            space(),
            StrategyConfig::Random(RandomSearchConfig::default().with_seed(17)),
        )
        .with_command("python train.py")
    }

    struct Harness {
        orchestrator: Orchestrator,
        sandbox: Arc<MockSandbox>,
        store: Arc<CountingStore>,
    }

    fn harness_with(config: OrchestratorConfig, sandbox: MockSandbox) -> Harness {
        let sandbox = Arc::new(sandbox);
        let store = Arc::new(CountingStore::default());
        let collaborators = Collaborators::new(
            Arc::new(TemplateGenerator),
            Arc::new(SequencedVersions::default()),
            sandbox.clone(),
            store.clone(),
        );
        Harness {
            orchestrator: Orchestrator::new(config, collaborators).unwrap(),
            sandbox,
            store,
        }
    }

    fn harness(sandbox: MockSandbox) -> Harness {
        harness_with(config(), sandbox)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..300 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn test_architecture_id_uses_version_prefix() {
        assert_eq!(architecture_id("0123456789abcdef"), "arch_01234567");
        assert_eq!(architecture_id("abc"), "arch_abc");
    }

    #[test]
    fn test_batch_entry_serializes_with_status_tag() {
        let failed = BatchEntry::Failed {
            error: "boom".into(),
        };
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json, serde_json::json!({"status": "failed", "error": "boom"}));

        let ok = BatchEntry::Success(RunResult {
            architecture_id: "arch_1".into(),
            metrics: Metrics::new(),
            code_version: "1".into(),
            arch_spec: Default::default(),
        });
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["architecture_id"], "arch_1");
    }

    #[tokio::test]
    async fn test_run_cycle_records_result() {
        let h = harness(MockSandbox::default());
        let result = h.orchestrator.run_cycle().await.unwrap();

        assert!(result.architecture_id.starts_with("arch_"));
        assert_eq!(result.architecture_id.len(), "arch_".len() + 8);
        assert!(result.code_version.starts_with(&result.architecture_id["arch_".len()..]));
        assert!((result.metric("accuracy").unwrap() - 0.51).abs() < 1e-12);
        assert_eq!(result.arch_spec.len(), 3);

        assert_eq!(h.sandbox.cleanups.load(Ordering::SeqCst), 1);
        assert_eq!(h.store.saves.load(Ordering::SeqCst), 1);
        assert_eq!(h.store.inner.runs_for_architecture(&result.architecture_id).len(), 1);

        let history: Vec<HistoryEntry> = h.orchestrator.strategy().history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].vector.decode(), result.arch_spec);
    }

    #[tokio::test]
    async fn test_failed_run_cleans_up_and_records_nothing() {
        let h = harness(MockSandbox {
            fail_on_run: Some(1),
            ..Default::default()
        });
        match h.orchestrator.run_cycle().await {
            Err(NmError::Sandbox(SandboxError::RunFailed { diagnostics })) => {
                assert!(diagnostics.contains("CUDA out of memory"))
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(h.sandbox.cleanups.load(Ordering::SeqCst), 1);
        assert_eq!(h.store.saves.load(Ordering::SeqCst), 0);
        assert_eq!(h.orchestrator.strategy().history_len(), 0);
    }

    #[tokio::test]
    async fn test_failed_cleanup_does_not_mask_run_failure() {
        let h = harness(MockSandbox {
            fail_on_run: Some(1),
            fail_cleanup: true,
            ..Default::default()
        });
        match h.orchestrator.run_cycle().await {
            Err(NmError::Sandbox(SandboxError::RunFailed { diagnostics })) => {
                assert!(diagnostics.contains("CUDA out of memory"))
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(h.sandbox.cleanups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_cleanup_keeps_successful_result() {
        let h = harness(MockSandbox {
            fail_cleanup: true,
            ..Default::default()
        });
        let result = h.orchestrator.run_cycle().await.unwrap();
        assert!(result.architecture_id.starts_with("arch_"));
        assert_eq!(h.sandbox.cleanups.load(Ordering::SeqCst), 1);
        assert_eq!(h.store.saves.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_generation_failure_creates_no_sandbox() {
        let sandbox = Arc::new(MockSandbox::default());
        let collaborators = Collaborators::new(
            Arc::new(BrokenGenerator),
            Arc::new(SequencedVersions::default()),
            sandbox.clone(),
            Arc::new(InMemoryResultsStore::new()),
        );
        let orchestrator = Orchestrator::new(config(), collaborators).unwrap();

        assert!(matches!(
            orchestrator.run_cycle().await,
            Err(NmError::Generation(GenerationError::Failed { attempts: 3, .. }))
        ));
        assert_eq!(sandbox.created.load(Ordering::SeqCst), 0);
        assert_eq!(sandbox.cleanups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_batch_isolates_failures() {
        let h = harness(MockSandbox {
            fail_on_run: Some(3),
            delay: Some(Duration::from_millis(5)),
            ..Default::default()
        });
        let entries = h.orchestrator.run_batch(5, true).await;

        assert_eq!(entries.len(), 5);
        assert_eq!(entries.iter().filter(|e| e.is_success()).count(), 4);
        let failed: Vec<&BatchEntry> = entries.iter().filter(|e| !e.is_success()).collect();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].error().unwrap().contains("CUDA out of memory"));

        assert_eq!(h.sandbox.cleanups.load(Ordering::SeqCst), 5);
        assert_eq!(h.store.saves.load(Ordering::SeqCst), 4);
        assert_eq!(h.orchestrator.strategy().history_len(), 4);
    }

    #[tokio::test]
    async fn test_sequential_batch_keeps_going_after_failure() {
        let h = harness(MockSandbox {
            fail_on_run: Some(1),
            ..Default::default()
        });
        let entries = h.orchestrator.run_batch(3, false).await;
        let outcomes: Vec<bool> = entries.iter().map(BatchEntry::is_success).collect();
        assert_eq!(outcomes, vec![false, true, true]);
        assert_eq!(h.sandbox.cleanups.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_strategy_fails_remaining_slots() {
        let config = OrchestratorConfig::new(
            space(),
            StrategyConfig::Random(RandomSearchConfig::default().with_seed(1).with_num_samples(2)),
        );
        let h = harness_with(config, MockSandbox::default());
        let entries = h.orchestrator.run_batch(3, false).await;

        assert!(entries[0].is_success() && entries[1].is_success());
        assert!(entries[2].error().unwrap().contains("exhausted"));
        assert_eq!(h.sandbox.created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_batch_of_zero_is_empty() {
        let h = harness(MockSandbox::default());
        assert!(h.orchestrator.run_batch(0, true).await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_max_parallel_cycles_bounds_concurrency() {
        let h = harness_with(
            config().with_max_parallel_cycles(1),
            MockSandbox {
                delay: Some(Duration::from_millis(20)),
                ..Default::default()
            },
        );
        let entries = h.orchestrator.run_batch(4, true).await;
        assert!(entries.iter().all(BatchEntry::is_success));
        assert_eq!(h.sandbox.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_submit_without_architecture_id_never_reaches_store() {
        let h = harness(MockSandbox::default());
        let vector = h.orchestrator.next_architecture().await.unwrap();

        let submission = ResultSubmission {
            metrics: Some(Metrics::from([("accuracy".to_string(), 0.9)])),
            ..Default::default()
        };
        match h.orchestrator.submit_results(vector.clone(), submission).await {
            Err(NmError::MissingField { field }) => assert_eq!(field, "architecture_id"),
            other => panic!("unexpected outcome {other:?}"),
        }

        let submission = ResultSubmission {
            architecture_id: Some("arch_manual".into()),
            ..Default::default()
        };
        match h.orchestrator.submit_results(vector, submission).await {
            Err(NmError::MissingField { field }) => assert_eq!(field, "metrics"),
            other => panic!("unexpected outcome {other:?}"),
        }

        assert_eq!(h.store.saves.load(Ordering::SeqCst), 0);
        assert_eq!(h.orchestrator.strategy().history_len(), 0);
    }

    #[tokio::test]
    async fn test_submit_without_objective_is_persisted_but_not_learned() {
        let h = harness(MockSandbox::default());
        let vector = h.orchestrator.next_architecture().await.unwrap();
        let submission = ResultSubmission {
            architecture_id: Some("arch_manual".into()),
            metrics: Some(Metrics::from([("latency_ms".to_string(), 4.0)])),
            ..Default::default()
        };
        assert!(matches!(
            h.orchestrator.submit_results(vector, submission).await,
            Err(NmError::MissingField { .. })
        ));
        assert_eq!(h.store.saves.load(Ordering::SeqCst), 1);
        assert_eq!(h.orchestrator.strategy().history_len(), 0);
    }

    struct ForeignStrategy {
        space: Arc<SearchSpace>,
    }

    impl SearchStrategy for ForeignStrategy {
        fn suggest_architecture(&self) -> NmResult<ArchitectureVector> {
            let other = Arc::new(SearchSpace::new().add_float("x", 0.0, 1.0));
            ArchitectureVector::new(other)
        }

        fn update_with_results(&self, _vector: ArchitectureVector, _metrics: Metrics) -> NmResult<()> {
            Ok(())
        }

        fn get_best_architectures(&self, _metric: &str, _k: usize) -> Vec<HistoryEntry> {
            Vec::new()
        }

        fn history(&self) -> Vec<HistoryEntry> {
            Vec::new()
        }

        fn history_len(&self) -> usize {
            0
        }

        fn space(&self) -> &Arc<SearchSpace> {
            &self.space
        }

        fn objective(&self) -> &str {
            "accuracy"
        }

        fn name(&self) -> &str {
            "foreign"
        }
    }

    #[tokio::test]
    async fn test_malformed_suggestion_is_rejected() {
        let sandbox = Arc::new(MockSandbox::default());
        let collaborators = Collaborators::new(
            Arc::new(TemplateGenerator),
            Arc::new(SequencedVersions::default()),
            sandbox.clone(),
            Arc::new(InMemoryResultsStore::new()),
        );
        let strategy = Arc::new(ForeignStrategy {
            space: Arc::new(space()),
        });
        let orchestrator =
            Orchestrator::with_strategy(OrchestratorConfig::default(), strategy, collaborators).unwrap();

        assert!(matches!(
            orchestrator.run_cycle().await,
            Err(NmError::Architecture(ArchitectureError::Malformed { .. }))
        ));
        assert_eq!(sandbox.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_bayesian_strategy_runs_past_cold_start() {
        let config = OrchestratorConfig::new(
            space(),
            StrategyConfig::BayesianOptimization(BayesianConfig::default().with_seed(5).with_restarts(3)),
        );
        let h = harness_with(config, MockSandbox::default());
        let dims = h.orchestrator.space().dimensionality();

        let entries = h.orchestrator.run_batch(dims + 2, false).await;
        assert!(entries.iter().all(BatchEntry::is_success), "{entries:?}");
        assert_eq!(h.orchestrator.strategy().history_len(), dims + 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_experiment_completes_and_reports_result() {
        let h = harness(MockSandbox::default());
        h.orchestrator.schedule_experiment("exp-1").await.unwrap();

        assert!(matches!(
            h.orchestrator.schedule_experiment("exp-1").await,
            Err(NmError::Experiment(ExperimentError::AlreadyScheduled { .. }))
        ));

        let orchestrator = h.orchestrator.clone();
        wait_until(|| {
            orchestrator
                .get_experiment_status("exp-1")
                .map(|s| s.status.is_terminal())
                .unwrap_or(false)
        })
        .await;

        let status = h.orchestrator.get_experiment_status("exp-1").unwrap();
        assert_eq!(status.status, ExperimentStatus::Completed);
        assert!(status.start_time.is_some() && status.finished_at.is_some());
        let result = status.result.unwrap();
        assert!(result.architecture_id.starts_with("arch_"));
        assert!(status.error.is_none());

        let logs = h.orchestrator.get_experiment_logs("exp-1", None).unwrap();
        let messages: Vec<&str> = logs.iter().map(|l| l.message.as_str()).collect();
        assert_eq!(messages[0], "experiment scheduled");
        assert!(messages.contains(&"experiment started"));

        assert!(h.orchestrator.list_running_experiments().is_empty());
        assert_eq!(h.orchestrator.list_experiments().len(), 1);

        // Still tracked after completion, so the id cannot be reused.
        assert!(h.orchestrator.schedule_experiment("exp-1").await.is_err());
        // Stopping a finished experiment changes nothing.
        h.orchestrator.stop_experiment("exp-1").unwrap();
        assert_eq!(
            h.orchestrator.get_experiment_status("exp-1").unwrap().status,
            ExperimentStatus::Completed
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_cancels_running_experiment() {
        let h = harness(MockSandbox {
            hang: true,
            ..Default::default()
        });
        h.orchestrator.schedule_experiment("exp-stuck").await.unwrap();

        let sandbox = h.sandbox.clone();
        wait_until(|| sandbox.runs.load(Ordering::SeqCst) == 1).await;
        assert_eq!(h.orchestrator.list_running_experiments(), vec!["exp-stuck".to_string()]);

        h.orchestrator.stop_experiment("exp-stuck").unwrap();
        let orchestrator = h.orchestrator.clone();
        wait_until(|| {
            orchestrator
                .get_experiment_status("exp-stuck")
                .map(|s| s.status.is_terminal())
                .unwrap_or(false)
        })
        .await;

        let status = h.orchestrator.get_experiment_status("exp-stuck").unwrap();
        assert_eq!(status.status, ExperimentStatus::Failed);
        assert_eq!(status.error.as_deref(), Some(STOPPED_BY_REQUEST));

        // The interrupted cycle's sandbox is still released.
        wait_until(|| sandbox.cleanups.load(Ordering::SeqCst) == 1).await;
        assert_eq!(h.store.saves.load(Ordering::SeqCst), 0);
        assert!(h.orchestrator.list_running_experiments().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_during_cleanup_keeps_recorded_result() {
        let h = harness(MockSandbox {
            cleanup_delay: Some(Duration::from_millis(300)),
            ..Default::default()
        });
        h.orchestrator.schedule_experiment("exp-late").await.unwrap();

        let sandbox = h.sandbox.clone();
        wait_until(|| sandbox.cleanups_started.load(Ordering::SeqCst) == 1).await;
        h.orchestrator.stop_experiment("exp-late").unwrap();

        let orchestrator = h.orchestrator.clone();
        wait_until(|| {
            orchestrator
                .get_experiment_status("exp-late")
                .map(|s| s.status.is_terminal())
                .unwrap_or(false)
        })
        .await;

        let status = h.orchestrator.get_experiment_status("exp-late").unwrap();
        assert_eq!(status.status, ExperimentStatus::Completed);
        assert!(status.error.is_none());
        let result = status.result.unwrap();
        assert_eq!(h.store.inner.runs_for_architecture(&result.architecture_id).len(), 1);
        assert_eq!(h.orchestrator.strategy().history_len(), 1);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(sandbox.cleanups_started.load(Ordering::SeqCst), 1);
        assert_eq!(sandbox.cleanups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_experiment_is_not_found() {
        let h = harness(MockSandbox::default());
        assert!(matches!(
            h.orchestrator.stop_experiment("nope"),
            Err(NmError::Experiment(ExperimentError::NotFound { .. }))
        ));
        assert!(h.orchestrator.get_experiment_status("nope").is_err());
        assert!(h.orchestrator.get_experiment_logs("nope", None).is_err());
    }

    #[tokio::test]
    async fn test_failed_experiment_records_error() {
        let h = harness(MockSandbox {
            fail_on_run: Some(1),
            ..Default::default()
        });
        h.orchestrator.schedule_experiment("exp-bad").await.unwrap();
        let orchestrator = h.orchestrator.clone();
        wait_until(|| {
            orchestrator
                .get_experiment_status("exp-bad")
                .map(|s| s.status.is_terminal())
                .unwrap_or(false)
        })
        .await;

        let status = h.orchestrator.get_experiment_status("exp-bad").unwrap();
        assert_eq!(status.status, ExperimentStatus::Failed);
        assert!(status.error.unwrap().contains("CUDA out of memory"));
        assert!(status.result.is_none());
    }
}
