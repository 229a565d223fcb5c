//! Fused GRU kernel: packed gates, precomputed input projections.
//!
//! Reads the canonical buffer directly rather than going through the
//! splitter, the way a vendor kernel consumes its opaque weight blob:
//!
//! 1. `W_r | W_u | W_h` are adjacent output-major blocks, so together they
//!    form one `[3R, I]` matrix; likewise `R_r | R_u | R_h` form `[3R, R]`.
//! 2. Input projections for every timestep are one GEMM:
//!    `[T·B, I] × [I, 3R] + b_W`.
//! 3. Each step needs only the recurrent projection `h × [R, 3R] + b_R`,
//!    then an element-wise gate pass. Batch rows are independent within a
//!    step and run on the rayon pool.

use ndarray::{s, Array3, ArrayView1, ArrayView2, ArrayView3, Axis};
use rayon::prelude::*;

use super::GruOutput;
use crate::core::dims::GruDims;
use crate::core::recurrence::sigmoid;
use crate::core::splitter::canonical_layout;
use crate::error::{GruError, Result};

/// Packed views over a canonical buffer.
struct PackedWeights<'a> {
    /// `[3R, I]`, rows ordered reset, update, candidate.
    input: ArrayView2<'a, f32>,
    /// `[3R, R]`.
    recurrent: ArrayView2<'a, f32>,
    /// `[3R]`.
    input_bias: ArrayView1<'a, f32>,
    /// `[3R]`.
    recurrent_bias: ArrayView1<'a, f32>,
}

impl<'a> PackedWeights<'a> {
    fn new(buffer: &'a [f32], dims: &GruDims) -> Result<Self> {
        if buffer.len() != dims.param_count() {
            return Err(GruError::shape(
                "parameter buffer",
                &[dims.param_count()],
                &[buffer.len()],
            ));
        }
        let (i, r) = (dims.input_channels, dims.recurrent_size);
        let [w_r, _, w_h, r_r, _, r_h, b_wr, _, b_wh, b_rr, _, b_rh] = canonical_layout(dims);

        let packed = move |rows: usize, cols: usize, start: usize, end: usize| {
            ArrayView2::from_shape((rows, cols), &buffer[start..end])
                .map_err(|_| GruError::shape("packed gate block", &[rows, cols], &[end - start]))
        };

        Ok(Self {
            input: packed(3 * r, i, w_r.offset, w_h.end())?,
            recurrent: packed(3 * r, r, r_r.offset, r_h.end())?,
            input_bias: ArrayView1::from(&buffer[b_wr.offset..b_wh.end()]),
            recurrent_bias: ArrayView1::from(&buffer[b_rr.offset..b_rh.end()]),
        })
    }
}

/// Gate pass for one batch row.
///
/// `x_proj` and `h_proj` are `[3R]` pre-activations (bias included) laid out
/// reset | update | candidate.
fn fused_cell(
    x_proj: ArrayView1<'_, f32>,
    h_proj: ArrayView1<'_, f32>,
    h: ArrayView1<'_, f32>,
) -> Vec<f32> {
    let r = h.len();
    (0..r)
        .map(|k| {
            let reset = sigmoid(x_proj[k] + h_proj[k]);
            let update = sigmoid(x_proj[r + k] + h_proj[r + k]);
            let candidate = (x_proj[2 * r + k] + reset * h_proj[2 * r + k]).tanh();
            h[k] * update + candidate * (1.0 - update)
        })
        .collect()
}

/// Fused forward pass over a time-major sequence.
///
/// - `buffer`: canonical flat parameters for `dims`
/// - `inputs`: `[T, B, I]`
/// - `initial_state`: `[B, R]`
pub fn fused_gru_forward(
    buffer: &[f32],
    dims: GruDims,
    inputs: ArrayView3<'_, f32>,
    initial_state: ArrayView2<'_, f32>,
) -> Result<GruOutput> {
    let weights = PackedWeights::new(buffer, &dims)?;
    let (timesteps, batch, channels) = inputs.dim();
    let r = dims.recurrent_size;

    if channels != dims.input_channels {
        return Err(GruError::shape(
            "inputs [timesteps, batch, input_channels]",
            &[timesteps, batch, dims.input_channels],
            inputs.shape(),
        ));
    }
    if initial_state.dim() != (batch, r) {
        return Err(GruError::shape(
            "initial_state [batch, recurrent_size]",
            &[batch, r],
            initial_state.shape(),
        ));
    }

    tracing::debug!(timesteps, batch, recurrent_size = r, "fused GRU forward");

    // All input projections at once: [T·B, 3R].
    let flat_rows = timesteps * batch;
    let flat = inputs
        .as_standard_layout()
        .into_shape((flat_rows, channels))
        .map_err(|_| GruError::shape("flattened inputs", &[flat_rows, channels], inputs.shape()))?;
    let x_proj = flat.dot(&weights.input.t()) + &weights.input_bias;

    let mut outputs = Array3::zeros((timesteps, batch, r));
    let mut state = initial_state.to_owned();

    for t in 0..timesteps {
        let x_t = x_proj.slice(s![t * batch..(t + 1) * batch, ..]);
        let h_proj = state.dot(&weights.recurrent.t()) + &weights.recurrent_bias;

        let rows: Vec<Vec<f32>> = (0..batch)
            .into_par_iter()
            .map(|b| fused_cell(x_t.row(b), h_proj.row(b), state.row(b)))
            .collect();

        let mut out_t = outputs.index_axis_mut(Axis(0), t);
        for (b, row) in rows.into_iter().enumerate() {
            out_t.row_mut(b).assign(&ArrayView1::from(&row[..]));
        }
        state.assign(&out_t);
    }

    Ok(GruOutput {
        outputs,
        final_state: state,
    })
}
