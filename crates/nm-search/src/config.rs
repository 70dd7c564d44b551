//! Strategy configuration and the registry that resolves it.

use nm_space::SearchSpace;
use nm_types::NmResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::bayes::BayesianOptimization;
use crate::random::RandomSearch;
use crate::strategy::SearchStrategy;

/// Whether we are maximizing or minimizing the objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveDirection {
    #[default]
    Maximize,
    Minimize,
}

fn default_objective() -> String {
    "accuracy".to_string()
}

/// Settings for [`RandomSearch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomSearchConfig {
    /// Sample cap; `None` samples forever.
    #[serde(default)]
    pub num_samples: Option<usize>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_objective")]
    pub objective: String,
}

impl Default for RandomSearchConfig {
    fn default() -> Self {
        Self {
            num_samples: None,
            seed: None,
            objective: default_objective(),
        }
    }
}

impl RandomSearchConfig {
    pub fn with_num_samples(mut self, n: usize) -> Self {
        self.num_samples = Some(n);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_objective(mut self, metric: &str) -> Self {
        self.objective = metric.to_string();
        self
    }
}

/// Settings for [`BayesianOptimization`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BayesianConfig {
    /// `expected_improvement` (default), `upper_confidence_bound` or
    /// `probability_of_improvement`.
    pub acquisition_function: String,
    pub exploration_weight: f64,
    /// Independent local maximizations per suggestion.
    pub num_restarts: usize,
    /// `matern` (5/2, default) or `rbf`.
    pub kernel: String,
    pub length_scale: f64,
    /// Diagonal jitter added to the kernel matrix.
    pub noise: f64,
    pub objective: String,
    pub direction: ObjectiveDirection,
    pub seed: Option<u64>,
    /// Iteration cap of each local search.
    pub max_local_iterations: usize,
    pub initial_step: f64,
    pub min_step: f64,
}

impl Default for BayesianConfig {
    fn default() -> Self {
        Self {
            acquisition_function: "expected_improvement".to_string(),
            exploration_weight: 0.1,
            num_restarts: 10,
            kernel: "matern".to_string(),
            length_scale: 1.0,
            noise: 1e-6,
            objective: default_objective(),
            direction: ObjectiveDirection::Maximize,
            seed: None,
            max_local_iterations: 100,
            initial_step: 0.25,
            min_step: 1e-3,
        }
    }
}

impl BayesianConfig {
    pub fn with_acquisition(mut self, name: &str) -> Self {
        self.acquisition_function = name.to_string();
        self
    }

    pub fn with_exploration_weight(mut self, weight: f64) -> Self {
        self.exploration_weight = weight;
        self
    }

    pub fn with_restarts(mut self, n: usize) -> Self {
        self.num_restarts = n;
        self
    }

    pub fn with_objective(mut self, metric: &str, direction: ObjectiveDirection) -> Self {
        self.objective = metric.to_string();
        self.direction = direction;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Which strategy to run, tagged by `type` when serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyConfig {
    Random(RandomSearchConfig),
    BayesianOptimization(BayesianConfig),
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self::Random(RandomSearchConfig::default())
    }
}

impl StrategyConfig {
    /// Resolve the configuration into a strategy instance over `space`.
    pub fn build(&self, space: Arc<SearchSpace>) -> NmResult<Arc<dyn SearchStrategy>> {
        Ok(match self {
            Self::Random(config) => Arc::new(RandomSearch::new(space, config.clone())?),
            Self::BayesianOptimization(config) => {
                Arc::new(BayesianOptimization::new(space, config.clone())?)
            }
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Random(_) => "random",
            Self::BayesianOptimization(_) => "bayesian_optimization",
        }
    }
}
