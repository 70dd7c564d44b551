//! Surrogate-guided Bayesian optimization.

use nm_space::{ArchitectureVector, SearchSpace};
use nm_types::{config_error, Metrics, NmResult, SearchError};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use std::sync::Arc;
use tracing::{debug, info};

use crate::acquisition::AcquisitionFunction;
use crate::config::BayesianConfig;
use crate::history::{History, HistoryEntry};
use crate::strategy::{check_update, SearchStrategy};
use crate::surrogate::{GaussianProcess, Kernel, Surrogate};

/// Bayesian optimization over the unit box of an architecture space.
///
/// Until the history holds as many results as the space has dimensions,
/// suggestions are random samples and the surrogate is left alone. After
/// that, each suggestion refits the surrogate on the full history and
/// maximizes the acquisition function with `num_restarts` independent
/// compass searches run in parallel. Every local optimum is re-scored with
/// the acquisition function and the highest score wins.
pub struct BayesianOptimization {
    space: Arc<SearchSpace>,
    config: BayesianConfig,
    acquisition: AcquisitionFunction,
    surrogate: Mutex<Box<dyn Surrogate>>,
    rng: Mutex<ChaCha8Rng>,
    history: History,
}

impl BayesianOptimization {
    pub fn new(space: Arc<SearchSpace>, config: BayesianConfig) -> NmResult<Self> {
        space.validate()?;
        let acquisition: AcquisitionFunction = config.acquisition_function.parse()?;
        let kernel: Kernel = config.kernel.parse()?;

        if config.num_restarts == 0 {
            return Err(config_error!("num_restarts must be at least 1"));
        }
        if config.length_scale.is_nan() || config.length_scale <= 0.0 {
            return Err(config_error!(
                "length_scale must be positive, got {}",
                config.length_scale
            ));
        }
        if config.min_step.is_nan() || config.min_step <= 0.0 || config.initial_step < config.min_step {
            return Err(config_error!(
                "local search steps must satisfy 0 < min_step <= initial_step, got {} and {}",
                config.min_step,
                config.initial_step
            ));
        }

        let rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let surrogate = GaussianProcess::new(kernel, config.length_scale, config.noise);

        info!(
            acquisition = acquisition.name(),
            kernel = ?kernel,
            restarts = config.num_restarts,
            "Bayesian optimization ready"
        );

        Ok(Self {
            space,
            config,
            acquisition,
            surrogate: Mutex::new(Box::new(surrogate)),
            rng: Mutex::new(rng),
            history: History::new(),
        })
    }

    /// Replace the default Gaussian process.
    pub fn with_surrogate(self, surrogate: Box<dyn Surrogate>) -> Self {
        Self {
            surrogate: Mutex::new(surrogate),
            ..self
        }
    }

    pub fn acquisition(&self) -> AcquisitionFunction {
        self.acquisition
    }

    fn cold_start(&self) -> NmResult<ArchitectureVector> {
        let values: Vec<f64> = {
            let mut rng = self.rng.lock();
            (0..self.space.dimensionality())
                .map(|_| rng.gen_range(0.0..=1.0))
                .collect()
        };
        let mut vector = ArchitectureVector::from_values(Arc::clone(&self.space), values)?;
        vector.repair();
        Ok(vector)
    }

    fn score(&self, model: &dyn Surrogate, x: &[f64], best: f64) -> f64 {
        match model.predict(x) {
            Ok((mean, std)) => {
                self.acquisition
                    .evaluate(mean, std, best, self.config.exploration_weight)
            }
            Err(_) => f64::NEG_INFINITY,
        }
    }

    /// Compass search maximizing the acquisition inside [0, 1]^d.
    fn local_maximize(&self, model: &dyn Surrogate, start: Vec<f64>, best: f64) -> Vec<f64> {
        let mut x = start;
        let mut fx = self.score(model, &x, best);
        let mut step = self.config.initial_step;
        let mut iterations = 0;

        while step >= self.config.min_step && iterations < self.config.max_local_iterations {
            iterations += 1;
            let mut improved = false;
            for dim in 0..x.len() {
                for direction in [1.0, -1.0] {
                    let moved = (x[dim] + direction * step).clamp(0.0, 1.0);
                    if moved == x[dim] {
                        continue;
                    }
                    let mut candidate = x.clone();
                    candidate[dim] = moved;
                    let fc = self.score(model, &candidate, best);
                    if fc > fx {
                        x = candidate;
                        fx = fc;
                        improved = true;
                    }
                }
            }
            if !improved {
                step *= 0.5;
            }
        }
        x
    }

    fn optimize_acquisition(&self) -> NmResult<ArchitectureVector> {
        let (inputs, targets) = self
            .history
            .training_set(&self.config.objective, self.config.direction);
        if inputs.is_empty() {
            return self.cold_start();
        }
        let best = targets.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let mut surrogate = self.surrogate.lock();
        surrogate.fit(&inputs, &targets)?;
        let model: &dyn Surrogate = &**surrogate;

        let seeds: Vec<u64> = {
            let mut rng = self.rng.lock();
            (0..self.config.num_restarts).map(|_| rng.gen()).collect()
        };
        let dims = self.space.dimensionality();

        let optima: Vec<(Vec<f64>, f64)> = seeds
            .par_iter()
            .map(|seed| {
                let mut rng = ChaCha8Rng::seed_from_u64(*seed);
                let start: Vec<f64> = (0..dims).map(|_| rng.gen_range(0.0..=1.0)).collect();
                let x = self.local_maximize(model, start, best);
                let value = self.score(model, &x, best);
                (x, value)
            })
            .collect();

        let (x, value) = select_best(optima).ok_or_else(|| SearchError::Optimization {
            message: format!(
                "no restart of {} produced a finite acquisition value",
                self.acquisition.name()
            ),
        })?;
        debug!(
            acquisition = self.acquisition.name(),
            value,
            training_points = inputs.len(),
            "acquisition maximized"
        );

        let mut vector = ArchitectureVector::from_values(Arc::clone(&self.space), x)?;
        vector.repair();
        Ok(vector)
    }
}

/// Highest finite score; the earliest candidate wins ties.
fn select_best(candidates: Vec<(Vec<f64>, f64)>) -> Option<(Vec<f64>, f64)> {
    candidates
        .into_iter()
        .filter(|(_, value)| value.is_finite())
        .fold(None, |best, candidate| match best {
            Some((_, best_value)) if candidate.1 <= best_value => best,
            _ => Some(candidate),
        })
}

impl SearchStrategy for BayesianOptimization {
    fn suggest_architecture(&self) -> NmResult<ArchitectureVector> {
        if self.history.len() < self.space.dimensionality() {
            debug!(
                history = self.history.len(),
                dims = self.space.dimensionality(),
                "cold start sample"
            );
            return self.cold_start();
        }
        self.optimize_acquisition()
    }

    fn update_with_results(&self, vector: ArchitectureVector, metrics: Metrics) -> NmResult<()> {
        check_update(&self.space, &self.config.objective, &vector, &metrics)?;
        let sequence = self.history.append(vector, metrics);
        debug!(sequence, "recorded Bayesian optimization result");
        Ok(())
    }

    fn get_best_architectures(&self, metric: &str, k: usize) -> Vec<HistoryEntry> {
        self.history.best(metric, k)
    }

    fn history(&self) -> Vec<HistoryEntry> {
        self.history.snapshot()
    }

    fn history_len(&self) -> usize {
        self.history.len()
    }

    fn space(&self) -> &Arc<SearchSpace> {
        &self.space
    }

    fn objective(&self) -> &str {
        &self.config.objective
    }

    fn name(&self) -> &str {
        "bayesian_optimization"
    }
}
