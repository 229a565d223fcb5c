//! Kernel backends and dispatch.
//!
//! Two implementations of the same forward contract over one flat buffer:
//! - **Explicit**: the step-by-step recurrence in [`crate::core::recurrence`]
//! - **Fused**: packed-gate kernel in [`fused_gru`], always available on CPU

pub mod fused_gru;
pub mod kernel_dispatch;

use ndarray::{Array2, Array3};

/// Output of a full-sequence forward pass.
#[derive(Clone, Debug, PartialEq)]
pub struct GruOutput {
    /// Hidden state after every step, `[T, B, R]`.
    pub outputs: Array3<f32>,

    /// State after the last step, `[B, R]`.
    pub final_state: Array2<f32>,
}
