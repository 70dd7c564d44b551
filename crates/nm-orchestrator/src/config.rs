use nm_search::StrategyConfig;
use nm_space::SearchSpace;
use nm_types::{config_error, NmResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Run settings applied to every sandbox the orchestrator creates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxDefaults {
    /// Command passed to `ExecutionSandbox::run`; `None` uses the sandbox's own.
    pub command: Option<String>,
    pub requirements: Vec<String>,
    pub data_path: Option<PathBuf>,
}

/// Orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub search_space: SearchSpace,
    pub strategy: StrategyConfig,
    pub sandbox: SandboxDefaults,
    /// Upper bound on cycles in flight across batches and experiments.
    pub max_parallel_cycles: Option<usize>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            search_space: SearchSpace::transformer_default(),
            strategy: StrategyConfig::default(),
            sandbox: SandboxDefaults::default(),
            max_parallel_cycles: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn new(search_space: SearchSpace, strategy: StrategyConfig) -> Self {
        Self {
            search_space,
            strategy,
            ..Self::default()
        }
    }

    pub fn with_command(mut self, command: &str) -> Self {
        self.sandbox.command = Some(command.to_string());
        self
    }

    pub fn with_requirements<S: Into<String>>(mut self, requirements: impl IntoIterator<Item = S>) -> Self {
        self.sandbox.requirements = requirements.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_data_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.sandbox.data_path = Some(path.into());
        self
    }

    pub fn with_max_parallel_cycles(mut self, n: usize) -> Self {
        self.max_parallel_cycles = Some(n);
        self
    }

    pub fn validate(&self) -> NmResult<()> {
        self.search_space.validate()?;
        if self.search_space.is_empty() {
            return Err(config_error!("search space has no parameters"));
        }
        if self.max_parallel_cycles == Some(0) {
            return Err(config_error!("max_parallel_cycles must be at least 1"));
        }
        Ok(())
    }
}
