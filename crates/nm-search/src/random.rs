//! Uniform random search.

use nm_space::{ArchitectureVector, SearchSpace};
use nm_types::{Metrics, NmResult, SearchError};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use tracing::debug;

use crate::config::RandomSearchConfig;
use crate::history::{History, HistoryEntry};
use crate::strategy::{check_update, SearchStrategy};

/// Draw a well-formed vector: uniform continuous slots and a uniformly chosen
/// one-hot in every categorical block.
pub(crate) fn sample_one_hot<R: Rng + ?Sized>(space: &Arc<SearchSpace>, rng: &mut R) -> NmResult<ArchitectureVector> {
    let mut values = Vec::with_capacity(space.dimensionality());
    for _ in space.continuous() {
        values.push(rng.gen_range(0.0..=1.0));
    }
    for (_, param) in space.categorical_blocks() {
        let hot = rng.gen_range(0..param.cardinality());
        values.extend((0..param.cardinality()).map(|i| if i == hot { 1.0 } else { 0.0 }));
    }
    ArchitectureVector::from_values(Arc::clone(space), values)
}

struct SamplerState {
    rng: ChaCha8Rng,
    issued: usize,
}

/// Samples the space uniformly, optionally up to a fixed number of
/// suggestions. Ignores history when suggesting.
pub struct RandomSearch {
    space: Arc<SearchSpace>,
    config: RandomSearchConfig,
    state: Mutex<SamplerState>,
    history: History,
}

impl RandomSearch {
    pub fn new(space: Arc<SearchSpace>, config: RandomSearchConfig) -> NmResult<Self> {
        space.validate()?;
        let rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Ok(Self {
            space,
            config,
            state: Mutex::new(SamplerState { rng, issued: 0 }),
            history: History::new(),
        })
    }

    /// Suggestions handed out so far.
    pub fn issued(&self) -> usize {
        self.state.lock().issued
    }
}

impl SearchStrategy for RandomSearch {
    fn suggest_architecture(&self) -> NmResult<ArchitectureVector> {
        let mut state = self.state.lock();
        if let Some(cap) = self.config.num_samples {
            if state.issued >= cap {
                return Err(SearchError::SpaceExhausted {
                    message: format!("random search issued all {cap} samples"),
                }
                .into());
            }
        }
        let vector = sample_one_hot(&self.space, &mut state.rng)?;
        state.issued += 1;
        debug!(issued = state.issued, "random search suggestion");
        Ok(vector)
    }

    fn update_with_results(&self, vector: ArchitectureVector, metrics: Metrics) -> NmResult<()> {
        check_update(&self.space, &self.config.objective, &vector, &metrics)?;
        let sequence = self.history.append(vector, metrics);
        debug!(sequence, "recorded random search result");
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
        "random"
    }
}
