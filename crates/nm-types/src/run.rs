//! Outcome records of evaluated architectures.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::{NmError, NmResult};
use crate::spec::ArchitectureSpec;

/// Metric name to observed value.
pub type Metrics = BTreeMap<String, f64>;

/// Result of one successful evaluation cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    /// Derived from the code snapshot's version id.
    pub architecture_id: String,
    pub metrics: Metrics,
    pub code_version: String,
    pub arch_spec: ArchitectureSpec,
}

impl RunResult {
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }
}

/// Loosely-typed result payload as it arrives from outer layers.
///
/// Every field is optional so incomplete submissions can be represented and
/// rejected by [`ResultSubmission::validate`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSubmission {
    #[serde(default)]
    pub architecture_id: Option<String>,
    #[serde(default)]
    pub metrics: Option<Metrics>,
    #[serde(default)]
    pub code_version: Option<String>,
    #[serde(default)]
    pub arch_spec: Option<ArchitectureSpec>,
}

impl ResultSubmission {
    /// Check the required fields and build the run record.
    ///
    /// `architecture_id` must be present and non-empty; `metrics` must be
    /// present (an empty map is accepted).
    pub fn validate(self) -> NmResult<RunResult> {
        let architecture_id = match self.architecture_id {
            Some(id) if !id.trim().is_empty() => id,
            _ => return Err(NmError::missing_field("architecture_id")),
        };
        let metrics = self
            .metrics
            .ok_or_else(|| NmError::missing_field("metrics"))?;

        Ok(RunResult {
            architecture_id,
            metrics,
            code_version: self.code_version.unwrap_or_default(),
            arch_spec: self.arch_spec.unwrap_or_default(),
        })
    }
}

impl From<RunResult> for ResultSubmission {
    fn from(result: RunResult) -> Self {
        Self {
            architecture_id: Some(result.architecture_id),
            metrics: Some(result.metrics),
            code_version: Some(result.code_version),
            arch_spec: Some(result.arch_spec),
        }
    }
}
