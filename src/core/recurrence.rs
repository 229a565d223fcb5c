//! Explicit GRU recurrence: the step-by-step fallback for the fused kernel.
//!
//! One step, for a batch of rows `inp ∈ R^{B×I}` and `state ∈ R^{B×R}`:
//!
//! ```text
//! X_g = inp · W_g + b_Wg            g ∈ {r, u, h}
//! H_g = state · R_g + b_Rg
//! r   = sigmoid(X_r + H_r)
//! u   = sigmoid(X_u + H_u)
//! c   = tanh(X_h + r ⊙ H_h)         reset scales the recurrent term only
//! s'  = state ⊙ u + c ⊙ (1 - u)
//! ```
//!
//! The sequence is a strict left fold over time: step `t + 1` reads the
//! state step `t` produced. All arithmetic is `f32`.

use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};

use super::params::ParamBuffer;
use super::splitter::{split, GruWeights};
use crate::error::{GruError, Result};

/// Gate activations and the resulting state for one step.
#[derive(Clone, Debug)]
pub struct StepTrace {
    /// Reset gate `r`, `[B, R]`.
    pub reset: Array2<f32>,
    /// Update gate `u`, `[B, R]`.
    pub update: Array2<f32>,
    /// Candidate `c`, `[B, R]`.
    pub candidate: Array2<f32>,
    /// New hidden state, `[B, R]`.
    pub state: Array2<f32>,
}

/// Logistic sigmoid: 1 / (1 + exp(-x))
#[inline]
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Single recurrence step over `inp [B, I]` and `state [B, R]`.
pub fn step(
    inp: ArrayView2<'_, f32>,
    state: ArrayView2<'_, f32>,
    w: &GruWeights<'_>,
) -> Result<StepTrace> {
    validate_shapes(&inp.insert_axis(Axis(0)), &state, w)?;
    Ok(cell(inp, state, w))
}

/// Unchecked step; [`forward`] validates shapes once for the whole sequence.
fn cell(inp: ArrayView2<'_, f32>, state: ArrayView2<'_, f32>, w: &GruWeights<'_>) -> StepTrace {
    // Input-side affine transforms.
    let x_r = inp.dot(&w.w_r) + &w.b_wr;
    let x_u = inp.dot(&w.w_u) + &w.b_wu;
    let x_h = inp.dot(&w.w_h) + &w.b_wh;

    // Recurrent-side affine transforms.
    let h_r = state.dot(&w.r_r) + &w.b_rr;
    let h_u = state.dot(&w.r_u) + &w.b_ru;
    let h_h = state.dot(&w.r_h) + &w.b_rh;

    let reset = (x_r + &h_r).mapv_into(sigmoid);
    let update = (x_u + &h_u).mapv_into(sigmoid);
    let candidate = (x_h + &(&reset * &h_h)).mapv_into(f32::tanh);

    let keep = update.mapv(|u| 1.0 - u);
    let new_state = &state * &update + &candidate * &keep;

    StepTrace {
        reset,
        update,
        candidate,
        state: new_state,
    }
}

/// Check `inputs [T, B, I]` and `initial_state [B, R]` against the weights.
pub fn validate_shapes(
    inputs: &ArrayView3<'_, f32>,
    initial_state: &ArrayView2<'_, f32>,
    w: &GruWeights<'_>,
) -> Result<()> {
    let dims = w.dims();
    let (timesteps, batch, channels) = inputs.dim();
    if channels != dims.input_channels {
        return Err(GruError::shape(
            "inputs [timesteps, batch, input_channels]",
            &[timesteps, batch, dims.input_channels],
            inputs.shape(),
        ));
    }
    if initial_state.ncols() != dims.recurrent_size || initial_state.nrows() != batch {
        return Err(GruError::shape(
            "initial_state [batch, recurrent_size]",
            &[batch, dims.recurrent_size],
            initial_state.shape(),
        ));
    }
    Ok(())
}

/// Run the recurrence over a time-major sequence.
///
/// - `inputs`: `[timesteps, batch, input_channels]`
/// - `initial_state`: `[batch, recurrent_size]`, conventionally zeros
///
/// Returns `[timesteps, batch, recurrent_size]`, one state per step.
pub fn forward(
    inputs: ArrayView3<'_, f32>,
    initial_state: ArrayView2<'_, f32>,
    weights: &GruWeights<'_>,
) -> Result<Array3<f32>> {
    validate_shapes(&inputs, &initial_state, weights)?;

    let (timesteps, batch, _) = inputs.dim();
    let recurrent_size = weights.dims().recurrent_size;
    tracing::debug!(timesteps, batch, recurrent_size, "explicit GRU forward");

    let mut outputs = Array3::zeros((timesteps, batch, recurrent_size));
    inputs
        .outer_iter()
        .zip(outputs.outer_iter_mut())
        .fold(initial_state.to_owned(), |state, (inp, mut out)| {
            let next = cell(inp, state.view(), weights).state;
            out.assign(&next);
            next
        });

    Ok(outputs)
}

/// Batch-major wrapper: `[B, T, I]` in, `[B, T, R]` out.
///
/// Transposes to time-major at the boundary, runs [`forward`], and
/// transposes the result back.
pub fn forward_batch_major(
    inputs: ArrayView3<'_, f32>,
    initial_state: ArrayView2<'_, f32>,
    weights: &GruWeights<'_>,
) -> Result<Array3<f32>> {
    let time_major = inputs.permuted_axes([1, 0, 2]);
    let outputs = forward(time_major, initial_state, weights)?;
    Ok(to_batch_major(outputs))
}

/// Split `buffer` and run [`forward`].
pub fn forward_from_buffer(
    buffer: &ParamBuffer,
    inputs: ArrayView3<'_, f32>,
    initial_state: ArrayView2<'_, f32>,
) -> Result<Array3<f32>> {
    let dims = buffer.dims();
    let weights = split(buffer.as_slice(), dims.input_channels, dims.recurrent_size)?;
    forward(inputs, initial_state, &weights)
}

/// Swap the first two axes and return a standard-layout array.
pub fn to_batch_major(time_major: Array3<f32>) -> Array3<f32> {
    time_major.permuted_axes([1, 0, 2]).as_standard_layout().into_owned()
}

/// Last timestep of a `[T, B, R]` sequence, or `fallback` if it is empty.
pub fn final_state(outputs: &Array3<f32>, fallback: ArrayView2<'_, f32>) -> Array2<f32> {
    match outputs.len_of(Axis(0)) {
        0 => fallback.to_owned(),
        t => outputs.index_axis(Axis(0), t - 1).to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dims::GruDims;
    use crate::core::params::{ParamBuffer, VarianceScaling};
    use ndarray::{array, Array2};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Buffer whose k-th element is `((7k) mod 11)·0.1 − 0.5`.
    fn literal_buffer(dims: GruDims) -> Vec<f32> {
        (0..dims.param_count())
            .map(|k| ((k * 7) % 11) as f32 * 0.1 - 0.5)
            .collect()
    }

    fn random_inputs(t: usize, b: usize, i: usize, seed: u64) -> Array3<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        Array3::from_shape_fn((t, b, i), |_| rng.gen::<f32>())
    }

    #[test]
    fn test_sigmoid_values() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-7);
        assert!(sigmoid(-10.0) > 0.0 && sigmoid(10.0) < 1.0);
    }

    #[test]
    fn test_shape_law() {
        for &(t, b, i, r) in &[(1, 1, 1, 1), (3, 2, 5, 4), (10, 1, 100, 16), (4, 3, 2, 7)] {
            let dims = GruDims::new(i, r).unwrap();
            let buf = ParamBuffer::initialize(dims, &VarianceScaling::default(), 0);
            let w = split(buf.as_slice(), i, r).unwrap();
            let x = random_inputs(t, b, i, 1);
            let h0 = Array2::zeros((b, r));
            let out = forward(x.view(), h0.view(), &w).unwrap();
            assert_eq!(out.shape(), &[t, b, r]);
        }
    }

    #[test]
    fn test_empty_sequence() {
        let dims = GruDims::new(3, 4).unwrap();
        let buf = ParamBuffer::zeros(dims);
        let w = split(buf.as_slice(), 3, 4).unwrap();
        let x = Array3::<f32>::zeros((0, 2, 3));
        let h0 = Array2::ones((2, 4));
        let out = forward(x.view(), h0.view(), &w).unwrap();
        assert_eq!(out.shape(), &[0, 2, 4]);
        assert_eq!(final_state(&out, h0.view()), h0);
    }

    #[test]
    fn test_determinism_bitwise() {
        let dims = GruDims::new(6, 8).unwrap();
        let buf = ParamBuffer::initialize(dims, &VarianceScaling::default().with_bias(0.1), 9);
        let w = split(buf.as_slice(), 6, 8).unwrap();
        let x = random_inputs(5, 3, 6, 2);
        let h0 = Array2::zeros((3, 8));
        let a = forward(x.view(), h0.view(), &w).unwrap();
        let b = forward(x.view(), h0.view(), &w).unwrap();
        assert!(a.iter().zip(b.iter()).all(|(p, q)| p.to_bits() == q.to_bits()));
    }

    #[test]
    fn test_gate_bounds_and_interpolation() {
        let dims = GruDims::new(5, 6).unwrap();
        let buf = ParamBuffer::initialize(dims, &VarianceScaling::default().with_bias(0.2), 4);
        let w = split(buf.as_slice(), 5, 6).unwrap();
        let x = random_inputs(6, 2, 5, 3);

        let mut state = Array2::from_elem((2, 6), 0.3);
        for inp in x.outer_iter() {
            let trace = step(inp, state.view(), &w).unwrap();
            assert!(trace.reset.iter().all(|&v| v > 0.0 && v < 1.0));
            assert!(trace.update.iter().all(|&v| v > 0.0 && v < 1.0));
            assert!(trace.candidate.iter().all(|&v| v > -1.0 && v < 1.0));

            for ((&prev, &cand), &next) in state
                .iter()
                .zip(trace.candidate.iter())
                .zip(trace.state.iter())
            {
                let lo = prev.min(cand) - 1e-6;
                let hi = prev.max(cand) + 1e-6;
                assert!(next >= lo && next <= hi, "{} outside [{}, {}]", next, lo, hi);
            }
            state = trace.state;
        }
    }

    #[test]
    fn test_zero_input_determined_by_biases() {
        let dims = GruDims::new(3, 4).unwrap();
        let values = literal_buffer(dims);
        let w = split(&values, 3, 4).unwrap();
        let x = Array3::<f32>::zeros((1, 1, 3));
        let h0 = Array2::<f32>::zeros((1, 4));
        let out = forward(x.view(), h0.view(), &w).unwrap();

        for k in 0..4 {
            let r0 = sigmoid(w.b_wr[[0, k]] + w.b_rr[[0, k]]);
            let u0 = sigmoid(w.b_wu[[0, k]] + w.b_ru[[0, k]]);
            let c0 = (w.b_wh[[0, k]] + r0 * w.b_rh[[0, k]]).tanh();
            let expected = c0 * (1.0 - u0);
            assert!((out[[0, 0, k]] - expected).abs() < 1e-6, "unit {}", k);
        }
    }

    #[test]
    fn test_single_timestep_hand_computed() {
        // T=1, R=4, I=2 over the literal buffer.
        let dims = GruDims::new(2, 4).unwrap();
        let values = literal_buffer(dims);
        let w = split(&values, 2, 4).unwrap();

        let x = array![[[0.5_f32, -1.0]]];
        let h0 = array![[0.1_f32, -0.2, 0.3, 0.0]];
        let out = forward(x.view(), h0.view(), &w).unwrap();
        let expected = [0.095_618_9_f32, 0.088_287_44, 0.234_994_68, -0.043_001_004];
        for (k, &e) in expected.iter().enumerate() {
            assert!((out[[0, 0, k]] - e).abs() < 1e-5, "unit {}: {} vs {}", k, out[[0, 0, k]], e);
        }

        let zero_x = Array3::<f32>::zeros((1, 1, 2));
        let zero_h = Array2::<f32>::zeros((1, 4));
        let out = forward(zero_x.view(), zero_h.view(), &w).unwrap();
        let expected = [0.327_915_96_f32, -0.011_713_386, -0.054_775_12, 0.161_690_12];
        for (k, &e) in expected.iter().enumerate() {
            assert!((out[[0, 0, k]] - e).abs() < 1e-5, "unit {}", k);
        }
    }

    #[test]
    fn test_reset_gate_scales_recurrent_candidate_only() {
        // With u pinned near 0, the new state is the candidate. Biases only:
        // c = tanh(b_Wh + r · b_Rh); swapping the two must change the result.
        let dims = GruDims::new(1, 1).unwrap();
        let mut values = vec![0.0_f32; dims.param_count()];
        // Layout for I=R=1: W_r W_u W_h R_r R_u R_h b_Wr b_Wu b_Wh b_Rr b_Ru b_Rh
        values[6] = -2.0; // b_Wr -> r = sigmoid(-2)
        values[7] = -20.0; // b_Wu -> u ≈ 0
        values[8] = 0.3; // b_Wh
        values[11] = 0.9; // b_Rh
        let w = split(&values, 1, 1).unwrap();
        let x = Array3::<f32>::zeros((1, 1, 1));
        let h0 = Array2::<f32>::zeros((1, 1));
        let out = forward(x.view(), h0.view(), &w).unwrap();

        let r = sigmoid(-2.0);
        let expected = (0.3 + r * 0.9_f32).tanh();
        let wrong = (r * 0.3 + 0.9_f32).tanh();
        assert!((out[[0, 0, 0]] - expected).abs() < 1e-6);
        assert!((out[[0, 0, 0]] - wrong).abs() > 1e-2);
    }

    #[test]
    fn test_state_carried_across_steps() {
        let dims = GruDims::new(2, 3).unwrap();
        let values = literal_buffer(dims);
        let w = split(&values, 2, 3).unwrap();
        let x = random_inputs(4, 1, 2, 8);
        let h0 = Array2::<f32>::zeros((1, 3));
        let out = forward(x.view(), h0.view(), &w).unwrap();

        let mut state = h0.clone();
        for t in 0..4 {
            state = step(x.index_axis(Axis(0), t), state.view(), &w).unwrap().state;
            assert_eq!(out.index_axis(Axis(0), t), state);
        }
    }

    #[test]
    fn test_batch_rows_independent() {
        let dims = GruDims::new(3, 4).unwrap();
        let buf = ParamBuffer::initialize(dims, &VarianceScaling::default().with_bias(0.05), 12);
        let w = split(buf.as_slice(), 3, 4).unwrap();
        let x = random_inputs(5, 2, 3, 13);
        let h0 = Array2::<f32>::zeros((2, 4));
        let both = forward(x.view(), h0.view(), &w).unwrap();

        let row1 = x.slice(ndarray::s![.., 1..2, ..]);
        let single = forward(row1, Array2::<f32>::zeros((1, 4)).view(), &w).unwrap();
        for t in 0..5 {
            for k in 0..4 {
                assert!((both[[t, 1, k]] - single[[t, 0, k]]).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_batch_major_boundary() {
        let dims = GruDims::new(3, 4).unwrap();
        let buf = ParamBuffer::initialize(dims, &VarianceScaling::default(), 21);
        let w = split(buf.as_slice(), 3, 4).unwrap();
        let time_major = random_inputs(5, 2, 3, 22);
        let batch_major = time_major.view().permuted_axes([1, 0, 2]).to_owned();
        let h0 = Array2::<f32>::zeros((2, 4));

        let tm = forward(time_major.view(), h0.view(), &w).unwrap();
        let bm = forward_batch_major(batch_major.view(), h0.view(), &w).unwrap();
        assert_eq!(bm.shape(), &[2, 5, 4]);
        for b in 0..2 {
            for t in 0..5 {
                for k in 0..4 {
                    assert_eq!(bm[[b, t, k]], tm[[t, b, k]]);
                }
            }
        }
        assert!(bm.is_standard_layout());
    }

    #[test]
    fn test_channel_mismatch() {
        let dims = GruDims::new(3, 4).unwrap();
        let buf = ParamBuffer::zeros(dims);
        let w = split(buf.as_slice(), 3, 4).unwrap();
        let x = Array3::<f32>::zeros((2, 1, 5));
        let h0 = Array2::<f32>::zeros((1, 4));
        let err = forward(x.view(), h0.view(), &w).unwrap_err();
        assert!(err.is_shape_mismatch());
        assert!(err.to_string().contains("inputs"));
    }

    #[test]
    fn test_step_rejects_misshaped_operands() {
        let dims = GruDims::new(3, 4).unwrap();
        let buf = ParamBuffer::zeros(dims);
        let w = split(buf.as_slice(), 3, 4).unwrap();
        let h = Array2::<f32>::zeros((2, 4));

        let wide = Array2::<f32>::zeros((2, 5));
        assert!(step(wide.view(), h.view(), &w).unwrap_err().is_shape_mismatch());

        let x = Array2::<f32>::zeros((2, 3));
        let short_state = Array2::<f32>::zeros((2, 3));
        let err = step(x.view(), short_state.view(), &w).unwrap_err();
        assert!(err.to_string().contains("initial_state"));

        let other_batch = Array2::<f32>::zeros((1, 4));
        assert!(step(x.view(), other_batch.view(), &w).unwrap_err().is_shape_mismatch());
        assert_eq!(step(x.view(), h.view(), &w).unwrap().state.dim(), (2, 4));
    }

    #[test]
    fn test_state_size_mismatch() {
        let dims = GruDims::new(3, 4).unwrap();
        let buf = ParamBuffer::zeros(dims);
        let w = split(buf.as_slice(), 3, 4).unwrap();
        let x = Array3::<f32>::zeros((2, 1, 3));
        let err = forward(x.view(), Array2::<f32>::zeros((1, 5)).view(), &w).unwrap_err();
        assert!(err.to_string().contains("initial_state"));
        let err = forward(x.view(), Array2::<f32>::zeros((2, 4)).view(), &w).unwrap_err();
        assert!(err.is_shape_mismatch());
    }

    #[test]
    fn test_forward_from_buffer_matches_split() {
        let dims = GruDims::new(4, 5).unwrap();
        let buf = ParamBuffer::initialize(dims, &VarianceScaling::default(), 31);
        let x = random_inputs(3, 2, 4, 32);
        let h0 = Array2::<f32>::zeros((2, 5));
        let a = forward_from_buffer(&buf, x.view(), h0.view()).unwrap();
        let w = split(buf.as_slice(), 4, 5).unwrap();
        let b = forward(x.view(), h0.view(), &w).unwrap();
        assert_eq!(a, b);
    }
}
