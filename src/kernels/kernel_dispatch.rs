//! Routes a forward pass to the selected backend.
//!
//! Both backends honour the same contract: one flat buffer, time-major
//! inputs, an initial state, and `[T, B, R]` outputs plus the final state.

use std::str::FromStr;

use ndarray::{ArrayView2, ArrayView3};
use serde::{Deserialize, Serialize};

use super::fused_gru::fused_gru_forward;
use super::GruOutput;
use crate::core::dims::GruDims;
use crate::core::params::ParamBuffer;
use crate::core::recurrence::{final_state, forward_from_buffer};
use crate::error::Result;

/// Backend selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Step-by-step recurrence over the split views.
    Explicit,
    /// Packed-gate kernel over the raw buffer.
    Fused,
}

impl Backend {
    pub const ALL: [Backend; 2] = [Backend::Explicit, Backend::Fused];
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Explicit => write!(f, "explicit"),
            Backend::Fused => write!(f, "fused"),
        }
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "explicit" => Ok(Backend::Explicit),
            "fused" => Ok(Backend::Fused),
            other => Err(format!("unknown backend '{other}' (expected 'explicit' or 'fused')")),
        }
    }
}

/// Run a time-major forward pass on `backend`.
pub fn dispatch_forward(
    backend: Backend,
    buffer: &ParamBuffer,
    inputs: ArrayView3<'_, f32>,
    initial_state: ArrayView2<'_, f32>,
) -> Result<GruOutput> {
    match backend {
        Backend::Explicit => {
            let outputs = forward_from_buffer(buffer, inputs, initial_state.view())?;
            let final_state = final_state(&outputs, initial_state);
            Ok(GruOutput {
                outputs,
                final_state,
            })
        }
        Backend::Fused => {
            fused_gru_forward(buffer.as_slice(), buffer.dims(), inputs, initial_state)
        }
    }
}

/// Multiply-add count of one forward pass (dominant term `T·B·R²`).
pub fn forward_flops(dims: &GruDims, timesteps: usize, batch: usize) -> u64 {
    let (i, r) = (dims.input_channels as u64, dims.recurrent_size as u64);
    2 * timesteps as u64 * batch as u64 * 3 * (i * r + r * r)
}
