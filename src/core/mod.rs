//! Core module: dimensions, parameter buffer, canonical splitter, recurrence.

pub mod dims;
pub mod params;
pub mod recurrence;
pub mod splitter;

pub use dims::GruDims;
pub use params::{Initializer, ParamBuffer};
pub use recurrence::{forward, forward_batch_major, forward_from_buffer, step, StepTrace};
pub use splitter::{canonical_layout, split, GruWeights};
