//! # nm-search
//!
//! Search strategies that propose architecture vectors and learn from their
//! evaluated metrics.
//!
//! Provides the [`SearchStrategy`] trait, the append-only evaluation
//! [`History`], uniform [`RandomSearch`], surrogate-guided
//! [`BayesianOptimization`], and the [`StrategyConfig`] registry that resolves
//! a configured strategy once at construction time.

mod acquisition;
mod bayes;
mod config;
mod history;
mod random;
mod strategy;
mod surrogate;

pub use acquisition::{norm_cdf, norm_pdf, AcquisitionFunction};
pub use bayes::BayesianOptimization;
pub use config::{BayesianConfig, ObjectiveDirection, RandomSearchConfig, StrategyConfig};
pub use history::{History, HistoryEntry};
pub use random::RandomSearch;
pub use strategy::SearchStrategy;
pub use surrogate::{GaussianProcess, Kernel, Surrogate};
