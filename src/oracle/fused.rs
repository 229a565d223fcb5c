//! Oracle backed by the in-crate fused kernel.

use ndarray::{ArrayView2, ArrayView3};

use super::{GruOracle, OracleOutput};
use crate::core::params::ParamBuffer;
use crate::error::Result;
use crate::kernels::fused_gru::fused_gru_forward;

/// Wraps [`fused_gru_forward`] behind the oracle contract.
#[derive(Clone, Copy, Debug, Default)]
pub struct FusedOracle;

impl FusedOracle {
    pub fn new() -> Self {
        Self
    }
}

impl GruOracle for FusedOracle {
    fn name(&self) -> &str {
        "fused-cpu"
    }

    fn forward(
        &self,
        buffer: &ParamBuffer,
        inputs: ArrayView3<'_, f32>,
        initial_state: ArrayView2<'_, f32>,
        _reserve: &[f32],
    ) -> Result<OracleOutput> {
        fused_gru_forward(buffer.as_slice(), buffer.dims(), inputs, initial_state)
    }
}
