//! Cross-implementation validation.
//!
//! - [`compare`]: per-element comparison that localises divergence
//! - [`harness`]: the seeded equivalence scenario

pub mod compare;
pub mod harness;

pub use compare::{compare_tensors, DivergenceReport};
pub use harness::{run_equivalence, run_equivalence_with, EquivalenceReport, ValidationConfig};
