//! Canonical splitter: decomposes the flat buffer into twelve named views.
//!
//! The buffer is laid out in the fused kernel's canonical order:
//!
//! ```text
//! offset 0            W_r  W_u  W_h    each R×I, output-major
//!        3RI          R_r  R_u  R_h    each R×R, output-major
//!        3RI + 3R²    b_Wr b_Wu b_Wh   each R
//!                     b_Rr b_Ru b_Rh   each R
//! ```
//!
//! Matrices are exposed transposed (`[fan_in, R]`) so that a row of inputs
//! left-multiplies them; biases are exposed as `[1, R]` rows for broadcast.
//! Every view aliases the caller's buffer: nothing is copied.

use std::ops::Range;

use ndarray::ArrayView2;

use super::dims::GruDims;
use crate::error::{GruError, Result};

/// Gate a slice belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Gate {
    Reset,
    Update,
    Candidate,
}

/// Which operand a slice transforms.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Input,
    Recurrent,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SliceKind {
    Weight,
    Bias,
}

/// One named region of the flat buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayoutSlice {
    pub name: &'static str,
    pub kind: SliceKind,
    pub side: Side,
    pub gate: Gate,
    /// Start index in the flat buffer.
    pub offset: usize,
    /// Number of elements.
    pub len: usize,
    /// Logical shape after transposition: `[fan_in, R]` or `[1, R]`.
    pub shape: [usize; 2],
}

impl LayoutSlice {
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len
    }

    pub fn end(&self) -> usize {
        self.offset + self.len
    }
}

/// The twelve slices of the buffer, in storage order.
pub fn canonical_layout(dims: &GruDims) -> [LayoutSlice; 12] {
    use Gate::*;
    use Side::*;
    use SliceKind::*;

    let (i, r) = (dims.input_channels, dims.recurrent_size);
    let mut offset = 0;
    let mut next = |name: &'static str, kind: SliceKind, side: Side, gate: Gate, rows: usize| {
        let len = rows * r;
        let slice = LayoutSlice {
            name,
            kind,
            side,
            gate,
            offset,
            len,
            shape: [rows, r],
        };
        offset += len;
        slice
    };

    [
        next("W_r", Weight, Input, Reset, i),
        next("W_u", Weight, Input, Update, i),
        next("W_h", Weight, Input, Candidate, i),
        next("R_r", Weight, Recurrent, Reset, r),
        next("R_u", Weight, Recurrent, Update, r),
        next("R_h", Weight, Recurrent, Candidate, r),
        next("b_Wr", Bias, Input, Reset, 1),
        next("b_Wu", Bias, Input, Update, 1),
        next("b_Wh", Bias, Input, Candidate, 1),
        next("b_Rr", Bias, Recurrent, Reset, 1),
        next("b_Ru", Bias, Recurrent, Update, 1),
        next("b_Rh", Bias, Recurrent, Candidate, 1),
    ]
}

/// Decomposed GRU parameters, borrowed from a flat buffer.
#[derive(Clone, Debug)]
pub struct GruWeights<'a> {
    /// Input-side reset weights `[I, R]`.
    pub w_r: ArrayView2<'a, f32>,
    /// Input-side update weights `[I, R]`.
    pub w_u: ArrayView2<'a, f32>,
    /// Input-side candidate weights `[I, R]`.
    pub w_h: ArrayView2<'a, f32>,

    /// Recurrent reset weights `[R, R]`.
    pub r_r: ArrayView2<'a, f32>,
    /// Recurrent update weights `[R, R]`.
    pub r_u: ArrayView2<'a, f32>,
    /// Recurrent candidate weights `[R, R]`.
    pub r_h: ArrayView2<'a, f32>,

    pub b_wr: ArrayView2<'a, f32>,
    pub b_wu: ArrayView2<'a, f32>,
    pub b_wh: ArrayView2<'a, f32>,
    pub b_rr: ArrayView2<'a, f32>,
    pub b_ru: ArrayView2<'a, f32>,
    pub b_rh: ArrayView2<'a, f32>,
}

impl GruWeights<'_> {
    pub fn dims(&self) -> GruDims {
        GruDims {
            input_channels: self.w_r.nrows(),
            recurrent_size: self.w_r.ncols(),
        }
    }

    /// Summed element count of all twelve tensors.
    pub fn element_count(&self) -> usize {
        [
            &self.w_r, &self.w_u, &self.w_h, &self.r_r, &self.r_u, &self.r_h, &self.b_wr,
            &self.b_wu, &self.b_wh, &self.b_rr, &self.b_ru, &self.b_rh,
        ]
        .iter()
        .map(|t| t.len())
        .sum()
    }
}

/// Split a flat buffer into its twelve named tensors.
///
/// Fails with [`GruError::ShapeMismatch`] unless
/// `buffer.len() == R·(3R + 3I + 6)`.
pub fn split(
    buffer: &[f32],
    input_channels: usize,
    recurrent_size: usize,
) -> Result<GruWeights<'_>> {
    let dims = GruDims::new(input_channels, recurrent_size)?;
    if buffer.len() != dims.param_count() {
        return Err(GruError::shape(
            "parameter buffer",
            &[dims.param_count()],
            &[buffer.len()],
        ));
    }

    let [w_r, w_u, w_h, r_r, r_u, r_h, b_wr, b_wu, b_wh, b_rr, b_ru, b_rh] =
        canonical_layout(&dims);

    let view = |slice: &LayoutSlice| slice_view(buffer, slice);
    Ok(GruWeights {
        w_r: view(&w_r)?,
        w_u: view(&w_u)?,
        w_h: view(&w_h)?,
        r_r: view(&r_r)?,
        r_u: view(&r_u)?,
        r_h: view(&r_h)?,
        b_wr: view(&b_wr)?,
        b_wu: view(&b_wu)?,
        b_wh: view(&b_wh)?,
        b_rr: view(&b_rr)?,
        b_ru: view(&b_ru)?,
        b_rh: view(&b_rh)?,
    })
}

fn slice_view<'a>(buffer: &'a [f32], slice: &LayoutSlice) -> Result<ArrayView2<'a, f32>> {
    let [rows, cols] = slice.shape;
    let data = &buffer[slice.range()];
    let tensor = match slice.kind {
        // Stored output-major [R, fan_in]; transpose to [fan_in, R].
        SliceKind::Weight => ArrayView2::from_shape((cols, rows), data).map(|v| v.reversed_axes()),
        SliceKind::Bias => ArrayView2::from_shape((rows, cols), data),
    };
    tensor.map_err(|_| GruError::shape(slice.name, &slice.shape, &[data.len()]))
}
