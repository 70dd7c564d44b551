use async_trait::async_trait;
use dashmap::DashMap;
use nm_orchestrator::{
    telemetry, CodeGenerator, Collaborators, DirectorySnapshotter, ExecutionSandbox,
    InMemoryResultsStore, Orchestrator, OrchestratorConfig, SandboxHandle, SandboxOutcome,
    SandboxSpec,
};
use nm_search::{BayesianConfig, StrategyConfig};
use nm_space::SearchSpace;
use nm_types::{ArchitectureSpec, Metrics, NmResult, SandboxError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Emits a stub training script with the specification embedded as JSON.
struct TemplateGenerator;

#[async_trait]
impl CodeGenerator for TemplateGenerator {
    async fn generate_code(&self, spec: &ArchitectureSpec) -> NmResult<String> {
        Ok(format!(
            "import torch\n\nCONFIG = {}\n\ndef build():\n    ...\n",
            serde_json::to_string(spec)?
        ))
    }
}

/// "Trains" by scoring the embedded configuration with a synthetic landscape.
#[derive(Default)]
struct SyntheticSandbox {
    next_id: AtomicUsize,
    live: DashMap<String, ArchitectureSpec>,
}

impl SyntheticSandbox {
    fn score(spec: &ArchitectureSpec) -> Metrics {
        let layers = spec.get("num_layers").and_then(|v| v.as_f64()).unwrap_or(2.0);
        let lr = spec.get("learning_rate").and_then(|v| v.as_f64()).unwrap_or(1e-3);
        let activation_bonus = match spec.get("activation").and_then(|v| v.as_str()) {
            Some("gelu") => 0.03,
            Some("swish") => 0.02,
            _ => 0.0,
        };
        let depth_term = -((layers - 8.0) / 6.0).powi(2);
        let lr_term = -((lr.log10() + 3.5) / 2.0).powi(2);
        let accuracy = (0.85 + 0.1 * depth_term + 0.1 * lr_term + activation_bonus).clamp(0.0, 1.0);
        Metrics::from([
            ("accuracy".to_string(), accuracy),
            ("latency_ms".to_string(), 2.0 + layers * 1.5),
        ])
    }
}

#[async_trait]
impl ExecutionSandbox for SyntheticSandbox {
    async fn create(&self, spec: &SandboxSpec) -> NmResult<SandboxHandle> {
        let config = spec
            .code
            .lines()
            .find_map(|line| line.strip_prefix("CONFIG = "))
            .ok_or_else(|| SandboxError::CreateFailed {
                message: "script has no CONFIG line".into(),
            })?;
        let arch: ArchitectureSpec = serde_json::from_str(config)?;
        let handle = SandboxHandle::new(format!("sbx-{}", self.next_id.fetch_add(1, Ordering::SeqCst)));
        self.live.insert(handle.id().to_string(), arch);
        Ok(handle)
    }

    async fn run(&self, handle: &SandboxHandle, _command: Option<&str>) -> NmResult<SandboxOutcome> {
        let arch = self
            .live
            .get(handle.id())
            .map(|entry| entry.clone())
            .ok_or_else(|| SandboxError::RunFailed {
                diagnostics: format!("unknown sandbox {handle}"),
            })?;
        Ok(SandboxOutcome::success(Self::score(&arch)))
    }

    async fn cleanup(&self, handle: &SandboxHandle) -> NmResult<()> {
        self.live.remove(handle.id());
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing("info");

    let space = SearchSpace::new()
        .add_int("num_layers", 2, 16)
        .add_log_float("learning_rate", 1e-5, 1e-2)
        .add_float("dropout", 0.0, 0.5)
        .add_choice("activation", ["relu", "gelu", "swish"]);
    let config = OrchestratorConfig::new(
        space,
        StrategyConfig::BayesianOptimization(BayesianConfig::default().with_seed(7)),
    )
    .with_command("python train.py --epochs 1")
    .with_max_parallel_cycles(4);

    let snapshots = tempfile::tempdir()?;
    let store = Arc::new(InMemoryResultsStore::new());
    let sandbox = Arc::new(SyntheticSandbox::default());
    let collaborators = Collaborators::new(
        Arc::new(TemplateGenerator),
        Arc::new(DirectorySnapshotter::new(snapshots.path())),
        sandbox.clone(),
        store.clone(),
    );
    let orchestrator = Orchestrator::new(config, collaborators)?;

    for round in 0..4 {
        let entries = orchestrator.run_batch(4, true).await;
        let ok = entries.iter().filter(|e| e.is_success()).count();
        println!("round {round}: {ok}/{} cycles succeeded", entries.len());
    }

    println!("stored runs: {}, live sandboxes: {}", store.len(), sandbox.live.len());
    for entry in orchestrator.strategy().get_best_architectures("accuracy", 3) {
        println!(
            "#{:<3} accuracy {:.4}  {}",
            entry.sequence,
            entry.metric("accuracy").unwrap_or_default(),
            serde_json::to_string(&entry.vector.decode())?
        );
    }
    Ok(())
}
