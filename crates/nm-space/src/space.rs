//! Search space definitions.

use nm_types::{ArchitectureError, NmResult, ParamValue};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// How a continuous parameter maps onto its normalized slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinuousKind {
    /// Linear range [low, high].
    Float,
    /// Integer range [low, high] inclusive, rounded on decode.
    Integer,
    /// Log-uniform range, normalized in log space.
    LogFloat,
}

/// A continuous (or integer) parameter with inclusive bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuousParam {
    pub name: String,
    pub low: f64,
    pub high: f64,
    pub kind: ContinuousKind,
}

impl ContinuousParam {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.low && value <= self.high
    }

    /// Map a value inside the bounds onto [0, 1].
    pub fn normalize(&self, value: f64) -> f64 {
        if self.high == self.low {
            return 0.0;
        }
        match self.kind {
            ContinuousKind::Float | ContinuousKind::Integer => {
                (value - self.low) / (self.high - self.low)
            }
            ContinuousKind::LogFloat => {
                (value.ln() - self.low.ln()) / (self.high.ln() - self.low.ln())
            }
        }
    }

    /// Map a normalized slot back into the declared bounds.
    ///
    /// Slots outside [0, 1] are clamped first. Integer parameters are rounded,
    /// so the round trip error is at most half an integer step.
    pub fn denormalize(&self, unit: f64) -> ParamValue {
        let u = unit.clamp(0.0, 1.0);
        match self.kind {
            ContinuousKind::Float => {
                ParamValue::Float((self.low + u * (self.high - self.low)).clamp(self.low, self.high))
            }
            ContinuousKind::Integer => {
                let raw = (self.low + u * (self.high - self.low)).round();
                ParamValue::Int(raw.clamp(self.low, self.high) as i64)
            }
            ContinuousKind::LogFloat => {
                let log_low = self.low.ln();
                let log_high = self.high.ln();
                let value = (log_low + u * (log_high - log_low)).exp();
                ParamValue::Float(value.clamp(self.low, self.high))
            }
        }
    }

    fn midpoint(&self) -> f64 {
        match self.kind {
            ContinuousKind::LogFloat => ((self.low.ln() + self.high.ln()) / 2.0).exp(),
            _ => (self.low + self.high) / 2.0,
        }
    }

    pub(crate) fn default_unit(&self) -> f64 {
        self.normalize(self.midpoint())
    }
}

/// A categorical parameter encoded as a one-hot block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalParam {
    pub name: String,
    pub choices: Vec<String>,
}

impl CategoricalParam {
    pub fn cardinality(&self) -> usize {
        self.choices.len()
    }

    pub fn index_of(&self, choice: &str) -> Option<usize> {
        self.choices.iter().position(|c| c == choice)
    }
}

/// Immutable definition of the architecture search space.
///
/// Built once through the consuming `add_*` chain, validated, then shared
/// behind an `Arc` by vectors and strategies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    #[serde(default)]
    continuous: Vec<ContinuousParam>,
    #[serde(default)]
    categorical: Vec<CategoricalParam>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_float(self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.add_continuous(name, low, high, ContinuousKind::Float)
    }

    pub fn add_int(self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.add_continuous(name, low as f64, high as f64, ContinuousKind::Integer)
    }

    pub fn add_log_float(self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.add_continuous(name, low, high, ContinuousKind::LogFloat)
    }

    pub fn add_choice<S: Into<String>>(
        mut self,
        name: impl Into<String>,
        choices: impl IntoIterator<Item = S>,
    ) -> Self {
        self.categorical.push(CategoricalParam {
            name: name.into(),
            choices: choices.into_iter().map(Into::into).collect(),
        });
        self
    }

    fn add_continuous(
        mut self,
        name: impl Into<String>,
        low: f64,
        high: f64,
        kind: ContinuousKind,
    ) -> Self {
        self.continuous.push(ContinuousParam {
            name: name.into(),
            low,
            high,
            kind,
        });
        self
    }

    /// Default transformer search space.
    pub fn transformer_default() -> Self {
        Self::new()
            .add_int("num_layers", 2, 12)
            .add_int("hidden_size", 128, 1024)
            .add_int("num_heads", 4, 16)
            .add_float("ffn_ratio", 2.0, 8.0)
            .add_choice("ffn_type", ["vanilla", "gated", "expert"])
            .add_choice("attention_type", ["vanilla", "linear", "sparse"])
            .add_choice("norm_type", ["layer", "rmsnorm"])
            .add_choice("activation", ["relu", "gelu", "swish"])
    }

    pub fn continuous(&self) -> &[ContinuousParam] {
        &self.continuous
    }

    pub fn categorical(&self) -> &[CategoricalParam] {
        &self.categorical
    }

    /// Total vector length: one slot per continuous parameter plus every
    /// categorical cardinality.
    pub fn dimensionality(&self) -> usize {
        self.continuous.len()
            + self
                .categorical
                .iter()
                .map(CategoricalParam::cardinality)
                .sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.continuous.is_empty() && self.categorical.is_empty()
    }

    /// Categorical parameters paired with the offset of their block.
    pub fn categorical_blocks(&self) -> impl Iterator<Item = (usize, &CategoricalParam)> {
        self.categorical.iter().scan(self.continuous.len(), |offset, param| {
            let start = *offset;
            *offset += param.cardinality();
            Some((start, param))
        })
    }

    /// Check bounds, choice lists and name uniqueness.
    pub fn validate(&self) -> NmResult<()> {
        let mut names = HashSet::new();

        for param in &self.continuous {
            if !names.insert(param.name.as_str()) {
                return Err(invalid_space(format!("duplicate parameter name: {}", param.name)));
            }
            if !param.low.is_finite() || !param.high.is_finite() {
                return Err(invalid_space(format!("{} has non-finite bounds", param.name)));
            }
            if param.low > param.high {
                return Err(invalid_space(format!(
                    "{} has low {} above high {}",
                    param.name, param.low, param.high
                )));
            }
            if param.kind == ContinuousKind::LogFloat && param.low <= 0.0 {
                return Err(invalid_space(format!(
                    "{} is log-scaled and needs a positive lower bound",
                    param.name
                )));
            }
        }

        for param in &self.categorical {
            if !names.insert(param.name.as_str()) {
                return Err(invalid_space(format!("duplicate parameter name: {}", param.name)));
            }
            if param.choices.is_empty() {
                return Err(invalid_space(format!("{} has no choices", param.name)));
            }
            let unique: HashSet<&str> = param.choices.iter().map(String::as_str).collect();
            if unique.len() != param.choices.len() {
                return Err(invalid_space(format!("{} lists a choice twice", param.name)));
            }
        }

        Ok(())
    }
}

fn invalid_space(message: String) -> nm_types::NmError {
    ArchitectureError::InvalidSpace { message }.into()
}
