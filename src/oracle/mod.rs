//! Reference oracle adapter.
//!
//! The oracle is consumed only through the vendor forward-call contract:
//! time-major inputs, an initial state, an auxiliary reserve tensor (training
//! metadata, unused at inference) and the flat parameter buffer in; the
//! output sequence and the final state out. Nothing else about it is assumed,
//! so a fused kernel, a recorded fixture or a stub can stand behind it.

pub mod fixture;
pub mod fused;

use ndarray::{Array2, Array3, ArrayView2, ArrayView3};

use crate::core::params::ParamBuffer;
use crate::core::recurrence::to_batch_major;
use crate::error::Result;
pub use crate::kernels::GruOutput as OracleOutput;

pub use fixture::{FixtureOracle, OracleFixture};
pub use fused::FusedOracle;

/// Ground-truth forward pass over a shared parameter buffer.
pub trait GruOracle: Send + Sync {
    /// Short identifier for logs and reports.
    fn name(&self) -> &str;

    /// Time-major forward pass.
    ///
    /// - `inputs`: `[T, B, I]`
    /// - `initial_state`: `[B, R]`
    /// - `reserve`: auxiliary workspace of the vendor contract; ignored
    fn forward(
        &self,
        buffer: &ParamBuffer,
        inputs: ArrayView3<'_, f32>,
        initial_state: ArrayView2<'_, f32>,
        reserve: &[f32],
    ) -> Result<OracleOutput>;
}

/// `oracleForward(buffer, inputs, initialState)` with an empty reserve.
pub fn oracle_forward(
    oracle: &dyn GruOracle,
    buffer: &ParamBuffer,
    inputs: ArrayView3<'_, f32>,
    initial_state: ArrayView2<'_, f32>,
) -> Result<OracleOutput> {
    oracle.forward(buffer, inputs, initial_state, &[])
}

/// Batch-major boundary: `[B, T, I]` in, `([B, T, R], [B, R])` out.
pub fn oracle_forward_batch_major(
    oracle: &dyn GruOracle,
    buffer: &ParamBuffer,
    inputs: ArrayView3<'_, f32>,
    initial_state: ArrayView2<'_, f32>,
) -> Result<(Array3<f32>, Array2<f32>)> {
    let out = oracle_forward(oracle, buffer, inputs.permuted_axes([1, 0, 2]), initial_state)?;
    Ok((to_batch_major(out.outputs), out.final_state))
}
