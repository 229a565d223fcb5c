//! Error taxonomy for the GRU forward paths.
//!
//! Shape errors are raised before any arithmetic runs. Divergence errors are
//! produced only by the validation layer when two implementations disagree.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, GruError>;

#[derive(Debug, Error)]
pub enum GruError {
    #[error("Shape mismatch for {tensor}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        tensor: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error(
        "Numeric divergence in {tensor} at {index:?}: expected {expected}, got {actual} \
         (|diff| = {difference:e}, tolerance {tolerance:e})"
    )]
    NumericDivergence {
        tensor: String,
        index: Vec<usize>,
        expected: f32,
        actual: f32,
        difference: f32,
        tolerance: f32,
    },

    #[error("Invalid tolerance {0}: must be finite and non-negative")]
    InvalidTolerance(f32),

    #[error("Fixture does not match the requested call: {0}")]
    FixtureMismatch(String),

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization failure: {0}")]
    Serialization(#[from] bincode::Error),
}

impl GruError {
    /// Build a [`GruError::ShapeMismatch`] from anything shape-like.
    pub fn shape(tensor: impl Into<String>, expected: &[usize], actual: &[usize]) -> Self {
        GruError::ShapeMismatch {
            tensor: tensor.into(),
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    /// Whether this error is a fail-fast shape error.
    pub fn is_shape_mismatch(&self) -> bool {
        matches!(self, GruError::ShapeMismatch { .. })
    }
}
