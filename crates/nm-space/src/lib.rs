//! # nm-space
//!
//! Search space definitions and the fixed-layout architecture vector that every
//! search strategy produces and consumes.
//!
//! A vector holds one normalized slot per continuous parameter followed by one
//! one-hot block per categorical parameter. Encoding and decoding are inverses
//! up to integer rounding.

mod space;
mod vector;

pub use space::{CategoricalParam, ContinuousKind, ContinuousParam, SearchSpace};
pub use vector::{ArchitectureVector, DECODE_THRESHOLD, MUTATION_SIGMA};
