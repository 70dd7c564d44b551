//! Acquisition functions scoring candidates from surrogate predictions.

use nm_types::{NmError, SearchError};
use std::str::FromStr;

/// Below this standard deviation the surrogate is treated as certain.
const MIN_STD: f64 = 1e-12;

/// Standard normal cumulative distribution function (Abramowitz & Stegun 7.1.26).
pub fn norm_cdf(x: f64) -> f64 {
    if x >= 8.0 {
        return 1.0;
    }
    if x <= -8.0 {
        return 0.0;
    }

    let a1 = 0.254829592_f64;
    let a2 = -0.284496736_f64;
    let a3 = 1.421413741_f64;
    let a4 = -1.453152027_f64;
    let a5 = 1.061405429_f64;
    let p = 0.3275911_f64;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let z = x.abs() / std::f64::consts::SQRT_2;
    let t = 1.0 / (1.0 + p * z);
    let erf = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-z * z).exp();

    0.5 * (1.0 + sign * erf)
}

/// Standard normal probability density function.
pub fn norm_pdf(x: f64) -> f64 {
    const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;
    INV_SQRT_2PI * (-0.5 * x * x).exp()
}

/// Scoring rule balancing predicted gain against uncertainty. Higher is better.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionFunction {
    /// `σ·(z·Φ(z) + φ(z)) + w·σ` with `z = (μ − best)/σ`.
    ExpectedImprovement,
    /// `μ + w·σ`.
    UpperConfidenceBound,
    /// `Φ(z)`.
    ProbabilityOfImprovement,
}

impl AcquisitionFunction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ExpectedImprovement => "expected_improvement",
            Self::UpperConfidenceBound => "upper_confidence_bound",
            Self::ProbabilityOfImprovement => "probability_of_improvement",
        }
    }

    /// Score a candidate with surrogate mean `mean` and standard deviation
    /// `std`, given the best objective observed so far.
    pub fn evaluate(&self, mean: f64, std: f64, best: f64, exploration_weight: f64) -> f64 {
        if std <= MIN_STD {
            return match self {
                Self::ExpectedImprovement => (mean - best).max(0.0),
                Self::UpperConfidenceBound => mean,
                Self::ProbabilityOfImprovement => {
                    if mean > best {
                        1.0
                    } else {
                        0.0
                    }
                }
            };
        }

        let z = (mean - best) / std;
        match self {
            Self::ExpectedImprovement => {
                std * (z * norm_cdf(z) + norm_pdf(z)) + exploration_weight * std
            }
            Self::UpperConfidenceBound => mean + exploration_weight * std,
            Self::ProbabilityOfImprovement => norm_cdf(z),
        }
    }
}

impl FromStr for AcquisitionFunction {
    type Err = NmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "expected_improvement" | "ei" => Ok(Self::ExpectedImprovement),
            "upper_confidence_bound" | "ucb" => Ok(Self::UpperConfidenceBound),
            "probability_of_improvement" | "pi" => Ok(Self::ProbabilityOfImprovement),
            _ => Err(SearchError::UnsupportedConfiguration {
                setting: "acquisition function".to_string(),
                value: s.to_string(),
            }
            .into()),
        }
    }
}
