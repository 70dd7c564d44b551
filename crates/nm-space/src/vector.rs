//! Fixed-layout numeric encoding of candidate architectures.

use nm_types::{internal_error, ArchitectureError, ArchitectureSpec, NmResult, ParamValue};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::space::SearchSpace;

/// A categorical slot counts as active at or above this value.
pub const DECODE_THRESHOLD: f64 = 0.9;

/// Standard deviation of the Gaussian jitter applied to mutated continuous slots.
pub const MUTATION_SIGMA: f64 = 0.1;

/// A candidate architecture as a point in the search space.
///
/// Layout: one normalized slot per continuous parameter, then one one-hot
/// block per categorical parameter, both in declaration order.
#[derive(Debug, Clone)]
pub struct ArchitectureVector {
    space: Arc<SearchSpace>,
    values: Vec<f64>,
}

impl PartialEq for ArchitectureVector {
    fn eq(&self, other: &Self) -> bool {
        self.same_space(&other.space) && self.values == other.values
    }
}

impl ArchitectureVector {
    /// All-zero vector for the given space. Fails if the space is invalid.
    pub fn new(space: Arc<SearchSpace>) -> NmResult<Self> {
        space.validate()?;
        let values = vec![0.0; space.dimensionality()];
        Ok(Self { space, values })
    }

    /// Wrap raw slot values. No clamping happens here.
    pub fn from_values(space: Arc<SearchSpace>, values: Vec<f64>) -> NmResult<Self> {
        space.validate()?;
        let expected = space.dimensionality();
        if values.len() != expected {
            return Err(ArchitectureError::DimensionMismatch {
                expected,
                actual: values.len(),
            }
            .into());
        }
        if let Some(idx) = values.iter().position(|v| !v.is_finite()) {
            return Err(ArchitectureError::Malformed {
                message: format!("slot {idx} is not finite"),
            }
            .into());
        }
        Ok(Self { space, values })
    }

    /// Encode a specification into a fresh vector.
    pub fn from_spec(space: Arc<SearchSpace>, spec: &ArchitectureSpec) -> NmResult<Self> {
        let mut vector = Self::new(space)?;
        vector.encode(spec)?;
        Ok(vector)
    }

    pub fn space(&self) -> &Arc<SearchSpace> {
        &self.space
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Whether this vector was laid out for `space`.
    pub fn same_space(&self, space: &SearchSpace) -> bool {
        std::ptr::eq(Arc::as_ptr(&self.space), space) || *self.space == *space
    }

    /// Length matches the space and every slot is finite.
    pub fn is_well_formed(&self) -> bool {
        self.values.len() == self.space.dimensionality()
            && self.values.iter().all(|v| v.is_finite())
    }

    /// Populate the vector from a specification.
    ///
    /// Parameters absent from `spec` take the midpoint of their range or the
    /// first listed choice. On error the vector is left untouched.
    pub fn encode(&mut self, spec: &ArchitectureSpec) -> NmResult<()> {
        let mut values = vec![0.0; self.space.dimensionality()];

        for (idx, param) in self.space.continuous().iter().enumerate() {
            values[idx] = match spec.get(&param.name) {
                None => {
                    debug!(parameter = %param.name, "parameter missing from spec, using midpoint");
                    param.default_unit()
                }
                Some(value) => {
                    let raw = value.as_f64().ok_or_else(|| ArchitectureError::InvalidParameter {
                        parameter: param.name.clone(),
                        message: format!("expected a number, got {value:?}"),
                    })?;
                    if !param.contains(raw) {
                        return Err(ArchitectureError::OutOfBounds {
                            parameter: param.name.clone(),
                            value: raw,
                            low: param.low,
                            high: param.high,
                        }
                        .into());
                    }
                    param.normalize(raw)
                }
            };
        }

        for (offset, param) in self.space.categorical_blocks() {
            let choice_idx = match spec.get(&param.name) {
                None => {
                    debug!(parameter = %param.name, "parameter missing from spec, using first choice");
                    0
                }
                Some(value) => {
                    let label = value.to_string();
                    param
                        .index_of(&label)
                        .ok_or_else(|| ArchitectureError::InvalidChoice {
                            parameter: param.name.clone(),
                            value: label,
                            choices: param.choices.clone(),
                        })?
                }
            };
            values[offset + choice_idx] = 1.0;
        }

        self.values = values;
        Ok(())
    }

    /// Map the vector back to a specification.
    ///
    /// Lossy but bounded: integer parameters are rounded (error at most half an
    /// integer step) and slots outside [0, 1] are clamped into the bounds. A
    /// categorical block without exactly one slot at or above
    /// [`DECODE_THRESHOLD`] decodes to its first choice.
    pub fn decode(&self) -> ArchitectureSpec {
        let mut spec = ArchitectureSpec::new();

        for (idx, param) in self.space.continuous().iter().enumerate() {
            spec.insert(param.name.clone(), param.denormalize(self.values[idx]));
        }

        for (offset, param) in self.space.categorical_blocks() {
            let block = &self.values[offset..offset + param.cardinality()];
            let mut strong = block
                .iter()
                .enumerate()
                .filter(|(_, v)| **v >= DECODE_THRESHOLD)
                .map(|(i, _)| i);
            let choice_idx = match (strong.next(), strong.next()) {
                (Some(i), None) => i,
                _ => {
                    warn!(
                        parameter = %param.name,
                        block = ?block,
                        "ambiguous one-hot encoding, falling back to first choice"
                    );
                    0
                }
            };
            spec.insert(
                param.name.clone(),
                ParamValue::Text(param.choices[choice_idx].clone()),
            );
        }

        spec
    }

    /// Re-one-hot every categorical block by argmax (first index on ties).
    pub fn repair(&mut self) {
        let space = Arc::clone(&self.space);
        for (offset, param) in space.categorical_blocks() {
            let block = &mut self.values[offset..offset + param.cardinality()];
            let winner = argmax(block);
            for (i, slot) in block.iter_mut().enumerate() {
                *slot = if i == winner { 1.0 } else { 0.0 };
            }
        }
    }

    /// Mutated copy: each slot is selected with probability `rate`.
    ///
    /// Selected continuous slots receive Gaussian jitter clamped to [0, 1];
    /// a categorical block with any selected slot is resampled as a uniform
    /// one-hot.
    pub fn mutate<R: Rng + ?Sized>(&self, rate: f64, rng: &mut R) -> NmResult<Self> {
        if !(0.0..=1.0).contains(&rate) {
            return Err(ArchitectureError::InvalidRate { rate }.into());
        }

        let jitter = Normal::new(0.0, MUTATION_SIGMA)
            .map_err(|e| internal_error!("invalid mutation distribution: {e}"))?;
        let mask: Vec<bool> = (0..self.values.len()).map(|_| rng.gen::<f64>() < rate).collect();
        let mut mutated = self.clone();

        for idx in 0..self.space.continuous().len() {
            if mask[idx] {
                let jittered = mutated.values[idx] + jitter.sample(rng);
                mutated.values[idx] = jittered.clamp(0.0, 1.0);
            }
        }

        for (offset, param) in self.space.categorical_blocks() {
            let n = param.cardinality();
            if mask[offset..offset + n].iter().any(|m| *m) {
                let pick = rng.gen_range(0..n);
                for (i, slot) in mutated.values[offset..offset + n].iter_mut().enumerate() {
                    *slot = if i == pick { 1.0 } else { 0.0 };
                }
            }
        }

        mutated.repair();
        Ok(mutated)
    }

    /// Recombine with `other` into two children.
    ///
    /// `points = None` performs uniform crossover. Otherwise the sorted,
    /// deduplicated points split the vector into segments that alternate
    /// between kept and swapped, starting with kept.
    pub fn crossover<R: Rng + ?Sized>(
        &self,
        other: &Self,
        points: Option<&[usize]>,
        rng: &mut R,
    ) -> NmResult<(Self, Self)> {
        self.ensure_compatible(other)?;

        let mut first = self.clone();
        let mut second = other.clone();
        let len = self.values.len();

        match points {
            None => {
                for idx in 0..len {
                    if rng.gen_bool(0.5) {
                        first.values[idx] = other.values[idx];
                        second.values[idx] = self.values[idx];
                    }
                }
            }
            Some(points) => {
                let mut cuts: Vec<usize> = points.iter().map(|p| (*p).min(len)).collect();
                cuts.sort_unstable();
                cuts.dedup();
                cuts.push(len);

                let mut start = 0;
                let mut swap = false;
                for cut in cuts {
                    if swap {
                        first.values[start..cut].copy_from_slice(&other.values[start..cut]);
                        second.values[start..cut].copy_from_slice(&self.values[start..cut]);
                    }
                    swap = !swap;
                    start = cut;
                }
            }
        }

        first.repair();
        second.repair();
        Ok((first, second))
    }

    /// Combined continuous/categorical distance in [0, 1] for repaired vectors.
    pub fn distance(&self, other: &Self) -> NmResult<f64> {
        self.ensure_compatible(other)?;

        let n_cont = self.space.continuous().len();
        let n_cat = self.space.categorical().len();

        let continuous = if n_cont > 0 {
            let sum_sq: f64 = self.values[..n_cont]
                .iter()
                .zip(&other.values[..n_cont])
                .map(|(a, b)| (a - b) * (a - b))
                .sum();
            sum_sq.sqrt() / (n_cont as f64).sqrt()
        } else {
            0.0
        };

        let categorical = if n_cat > 0 {
            let total: f64 = self
                .space
                .categorical_blocks()
                .map(|(offset, param)| {
                    let range = offset..offset + param.cardinality();
                    let differing = self.values[range.clone()]
                        .iter()
                        .zip(&other.values[range])
                        .filter(|(a, b)| a != b)
                        .count();
                    // A swapped one-hot differs in two positions.
                    differing as f64 / 2.0
                })
                .sum();
            total / n_cat as f64
        } else {
            0.0
        };

        Ok(match (n_cont > 0, n_cat > 0) {
            (true, true) => (continuous + categorical) / 2.0,
            (true, false) => continuous,
            (false, true) => categorical,
            (false, false) => 0.0,
        })
    }

    fn ensure_compatible(&self, other: &Self) -> NmResult<()> {
        if !self.same_space(&other.space) {
            return Err(ArchitectureError::DimensionMismatch {
                expected: self.values.len(),
                actual: other.values.len(),
            }
            .into());
        }
        Ok(())
    }
}

fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}
