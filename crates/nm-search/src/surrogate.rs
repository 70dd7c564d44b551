//! Surrogate regression models for Bayesian optimization.

use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
use nm_types::{ArchitectureError, NmResult, SearchError};
use std::str::FromStr;
use tracing::debug;

/// Regression model over (vector -> objective) pairs.
pub trait Surrogate: Send + Sync {
    /// Fit on the full training set, replacing any previous fit.
    fn fit(&mut self, inputs: &[Vec<f64>], targets: &[f64]) -> NmResult<()>;

    /// Predictive mean and standard deviation at `x`.
    fn predict(&self, x: &[f64]) -> NmResult<(f64, f64)>;

    fn name(&self) -> &str;
}

/// Covariance function of the Gaussian process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kernel {
    /// Squared exponential.
    Rbf,
    /// Matérn with ν = 5/2.
    Matern52,
}

impl Kernel {
    fn covariance(&self, a: &[f64], b: &[f64], length_scale: f64) -> f64 {
        let sq_dist: f64 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
        match self {
            Self::Rbf => (-0.5 * sq_dist / (length_scale * length_scale)).exp(),
            Self::Matern52 => {
                let r = sq_dist.sqrt() / length_scale;
                let s5 = 5.0_f64.sqrt() * r;
                (1.0 + s5 + 5.0 * r * r / 3.0) * (-s5).exp()
            }
        }
    }
}

impl FromStr for Kernel {
    type Err = nm_types::NmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rbf" | "squared_exponential" => Ok(Self::Rbf),
            "matern" | "matern52" => Ok(Self::Matern52),
            _ => Err(SearchError::UnsupportedConfiguration {
                setting: "kernel".to_string(),
                value: s.to_string(),
            }
            .into()),
        }
    }
}

/// Exact Gaussian process regression with a unit signal variance.
///
/// Targets are standardized before fitting and predictions are mapped back,
/// so the kernel's fixed amplitude does not depend on the metric's scale.
#[derive(Debug, Clone)]
pub struct GaussianProcess {
    kernel: Kernel,
    length_scale: f64,
    noise: f64,
    inputs: Vec<Vec<f64>>,
    /// Lower-triangular Cholesky factor of K + noise·I.
    lower: DMatrix<f64>,
    /// (K + noise·I)^-1 · standardized targets.
    alpha: DVector<f64>,
    target_mean: f64,
    target_scale: f64,
}

const MAX_JITTER_ATTEMPTS: usize = 6;

impl GaussianProcess {
    pub fn new(kernel: Kernel, length_scale: f64, noise: f64) -> Self {
        Self {
            kernel,
            length_scale,
            noise,
            inputs: Vec::new(),
            lower: DMatrix::zeros(0, 0),
            alpha: DVector::zeros(0),
            target_mean: 0.0,
            target_scale: 1.0,
        }
    }

    pub fn is_fitted(&self) -> bool {
        !self.inputs.is_empty()
    }

    fn covariance_matrix(&self, inputs: &[Vec<f64>], jitter: f64) -> DMatrix<f64> {
        let n = inputs.len();
        DMatrix::from_fn(n, n, |i, j| {
            let c = self.kernel.covariance(&inputs[i], &inputs[j], self.length_scale);
            if i == j {
                c + jitter
            } else {
                c
            }
        })
    }

    /// Factor K + jitter·I, raising the jitter tenfold until it is positive definite.
    fn factor(&self, inputs: &[Vec<f64>]) -> Option<Cholesky<f64, Dyn>> {
        let mut jitter = self.noise.max(1e-10);
        for attempt in 0..MAX_JITTER_ATTEMPTS {
            if let Some(chol) = self.covariance_matrix(inputs, jitter).cholesky() {
                if chol.l_dirty().diagonal().iter().all(|d| d.is_finite() && *d > 0.0) {
                    return Some(chol);
                }
            }
            debug!(attempt, jitter, "kernel matrix not positive definite, raising jitter");
            jitter *= 10.0;
        }
        None
    }
}

impl Surrogate for GaussianProcess {
    fn fit(&mut self, inputs: &[Vec<f64>], targets: &[f64]) -> NmResult<()> {
        if inputs.is_empty() || inputs.len() != targets.len() {
            return Err(SearchError::Optimization {
                message: format!(
                    "cannot fit surrogate on {} inputs and {} targets",
                    inputs.len(),
                    targets.len()
                ),
            }
            .into());
        }
        let dims = inputs[0].len();
        if let Some(bad) = inputs.iter().find(|x| x.len() != dims) {
            return Err(ArchitectureError::DimensionMismatch {
                expected: dims,
                actual: bad.len(),
            }
            .into());
        }

        let n = targets.len() as f64;
        let mean = targets.iter().sum::<f64>() / n;
        let variance = targets.iter().map(|y| (y - mean) * (y - mean)).sum::<f64>() / n;
        let scale = if variance > 1e-12 { variance.sqrt() } else { 1.0 };
        let standardized = DVector::from_iterator(targets.len(), targets.iter().map(|y| (y - mean) / scale));

        let chol = self.factor(inputs).ok_or_else(|| SearchError::Optimization {
            message: "kernel matrix is not positive definite".to_string(),
        })?;

        self.alpha = chol.solve(&standardized);
        self.lower = chol.l();
        self.inputs = inputs.to_vec();
        self.target_mean = mean;
        self.target_scale = scale;
        Ok(())
    }

    fn predict(&self, x: &[f64]) -> NmResult<(f64, f64)> {
        if !self.is_fitted() {
            return Err(SearchError::Optimization {
                message: "surrogate queried before it was fit".to_string(),
            }
            .into());
        }
        if x.len() != self.inputs[0].len() {
            return Err(ArchitectureError::DimensionMismatch {
                expected: self.inputs[0].len(),
                actual: x.len(),
            }
            .into());
        }

        let k_star = DVector::from_iterator(
            self.inputs.len(),
            self.inputs
                .iter()
                .map(|xi| self.kernel.covariance(xi, x, self.length_scale)),
        );
        let mean = k_star.dot(&self.alpha);
        let v = self
            .lower
            .solve_lower_triangular(&k_star)
            .ok_or_else(|| SearchError::Optimization {
                message: "singular Cholesky factor".to_string(),
            })?;
        let variance = (1.0 - v.norm_squared()).max(0.0);

        Ok((
            mean * self.target_scale + self.target_mean,
            variance.sqrt() * self.target_scale,
        ))
    }

    fn name(&self) -> &str {
        "gaussian_process"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nm_types::NmError;

    fn fitted(kernel: Kernel) -> GaussianProcess {
        let inputs: Vec<Vec<f64>> = vec![vec![0.0], vec![0.25], vec![0.5], vec![0.75], vec![1.0]];
        let targets: Vec<f64> = inputs.iter().map(|x| (x[0] * 3.0).sin()).collect();
        let mut gp = GaussianProcess::new(kernel, 0.3, 1e-8);
        gp.fit(&inputs, &targets).unwrap();
        gp
    }

    #[test]
    fn interpolates_training_points() {
        for kernel in [Kernel::Rbf, Kernel::Matern52] {
            let gp = fitted(kernel);
            let (mean, std) = gp.predict(&[0.5]).unwrap();
            assert!((mean - 1.5_f64.sin()).abs() < 1e-3, "{kernel:?} mean {mean}");
            assert!(std < 1e-2, "{kernel:?} std {std}");
        }
    }

    #[test]
    fn uncertainty_grows_away_from_data() {
        let gp = fitted(Kernel::Matern52);
        let (_, near) = gp.predict(&[0.3]).unwrap();
        let (_, far) = gp.predict(&[3.0]).unwrap();
        assert!(far > near);
    }

    #[test]
    fn duplicate_inputs_still_fit() {
        let inputs = vec![vec![0.5, 0.5], vec![0.5, 0.5], vec![0.1, 0.9]];
        let mut gp = GaussianProcess::new(Kernel::Rbf, 1.0, 0.0);
        gp.fit(&inputs, &[1.0, 1.0, 0.2]).unwrap();
        let (mean, _) = gp.predict(&[0.5, 0.5]).unwrap();
        assert!((mean - 1.0).abs() < 1e-3);
    }

    #[test]
    fn constant_targets_are_predicted_exactly() {
        let inputs = vec![vec![0.1], vec![0.9]];
        let mut gp = GaussianProcess::new(Kernel::Rbf, 0.5, 1e-6);
        gp.fit(&inputs, &[0.7, 0.7]).unwrap();
        let (mean, _) = gp.predict(&[0.4]).unwrap();
        assert!((mean - 0.7).abs() < 1e-9);
    }

    #[test]
    fn predict_before_fit_fails() {
        let gp = GaussianProcess::new(Kernel::Rbf, 1.0, 1e-6);
        assert!(matches!(
            gp.predict(&[0.1]),
            Err(NmError::Search(SearchError::Optimization { .. }))
        ));
    }

    #[test]
    fn mismatched_input_width_fails() {
        let mut gp = GaussianProcess::new(Kernel::Rbf, 1.0, 1e-6);
        assert!(gp.fit(&[vec![0.1, 0.2], vec![0.3]], &[1.0, 2.0]).is_err());

        let gp = fitted(Kernel::Rbf);
        assert!(gp.predict(&[0.1, 0.2]).is_err());
    }

    #[test]
    fn matches_closed_form_posterior_for_two_points() {
        // With unit targets standardized to ±1 and k(a, b) = c, the posterior
        // at a training point is exact and the variance at the midpoint is
        // 1 - 2·k_mid² / (1 + c).
        let inputs: Vec<Vec<f64>> = vec![vec![0.0], vec![1.0]];
        let mut gp = GaussianProcess::new(Kernel::Rbf, 1.0, 1e-10);
        gp.fit(&inputs, &[0.0, 2.0]).unwrap();

        let c = (-0.5_f64).exp();
        let k_mid = (-0.125_f64).exp();
        let (mean, std) = gp.predict(&[0.5]).unwrap();
        assert!((mean - 1.0).abs() < 1e-9, "mean {mean}");
        let expected_var = 1.0 - 2.0 * k_mid * k_mid / (1.0 + c);
        assert!((std - expected_var.sqrt()).abs() < 1e-6, "std {std}");
    }

    #[test]
    fn kernel_names_parse() {
        assert_eq!("matern".parse::<Kernel>().unwrap(), Kernel::Matern52);
        assert_eq!("RBF".parse::<Kernel>().unwrap(), Kernel::Rbf);
        assert!("periodic".parse::<Kernel>().is_err());
    }
}
