//! Element-wise comparison of two implementations' outputs.
//!
//! A failing comparison names the tensor, the multi-index of the largest
//! absolute difference and both values there, which is usually enough to
//! tell a transposed slice from a swapped gate from a misplaced bias.

use ndarray::{ArrayView, Dimension};

use crate::error::{GruError, Result};

/// Summary of one tensor comparison.
#[derive(Clone, Debug, PartialEq)]
pub struct DivergenceReport {
    pub tensor: String,
    pub elements: usize,
    pub tolerance: f32,
    /// Largest `|expected - actual|`; infinite if any NaN was seen.
    pub max_abs_diff: f32,
    /// Multi-index of `max_abs_diff`.
    pub worst_index: Vec<usize>,
    pub expected_at_worst: f32,
    pub actual_at_worst: f32,
    /// Elements whose difference exceeds the tolerance.
    pub over_tolerance: usize,
}

impl DivergenceReport {
    pub fn passed(&self) -> bool {
        self.over_tolerance == 0
    }

    /// Turn a failing report into [`GruError::NumericDivergence`].
    pub fn into_result(self) -> Result<Self> {
        if self.passed() {
            return Ok(self);
        }
        Err(GruError::NumericDivergence {
            tensor: self.tensor,
            index: self.worst_index,
            expected: self.expected_at_worst,
            actual: self.actual_at_worst,
            difference: self.max_abs_diff,
            tolerance: self.tolerance,
        })
    }
}

impl std::fmt::Display for DivergenceReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let verdict = if self.passed() { "OK" } else { "DIVERGED" };
        write!(
            f,
            "[{verdict}] {}: max |diff| {:.3e} at {:?} ({} vs {}), {}/{} over {:.1e}",
            self.tensor,
            self.max_abs_diff,
            self.worst_index,
            self.expected_at_worst,
            self.actual_at_worst,
            self.over_tolerance,
            self.elements,
            self.tolerance,
        )
    }
}

/// Row-major multi-index of flat position `flat` in `shape`.
pub(crate) fn unravel(mut flat: usize, shape: &[usize]) -> Vec<usize> {
    let mut index = vec![0; shape.len()];
    for (axis, &len) in shape.iter().enumerate().rev() {
        if len > 0 {
            index[axis] = flat % len;
            flat /= len;
        }
    }
    index
}

/// Compare `actual` against `expected` element by element.
///
/// Fails on differing shapes or a NaN, infinite or negative tolerance;
/// divergence is reported, not raised.
pub fn compare_tensors<D: Dimension>(
    tensor: &str,
    expected: ArrayView<'_, f32, D>,
    actual: ArrayView<'_, f32, D>,
    tolerance: f32,
) -> Result<DivergenceReport> {
    if !tolerance.is_finite() || tolerance < 0.0 {
        return Err(GruError::InvalidTolerance(tolerance));
    }
    if expected.shape() != actual.shape() {
        return Err(GruError::shape(tensor, expected.shape(), actual.shape()));
    }

    let mut worst = (0usize, 0.0f32, 0.0f32, 0.0f32);
    let mut over_tolerance = 0;
    for (k, (&e, &a)) in expected.iter().zip(actual.iter()).enumerate() {
        let diff = if e.is_nan() || a.is_nan() {
            f32::INFINITY
        } else {
            (e - a).abs()
        };
        if diff > tolerance {
            over_tolerance += 1;
        }
        if diff > worst.3 {
            worst = (k, e, a, diff);
        }
    }

    let (flat, expected_at_worst, actual_at_worst, max_abs_diff) = worst;
    let elements = expected.len();
    Ok(DivergenceReport {
        tensor: tensor.to_string(),
        elements,
        tolerance,
        max_abs_diff,
        worst_index: if elements == 0 { Vec::new() } else { unravel(flat, expected.shape()) },
        expected_at_worst,
        actual_at_worst,
        over_tolerance,
    })
}
