//! Recorded oracle outputs, replayed where no kernel is available.
//!
//! A fixture pins everything the oracle saw: dimensions, a fingerprint of
//! the parameter buffer, the exact inputs and initial state. Replaying it
//! against anything else is an error rather than a silent wrong answer.

use std::path::Path;

use ndarray::{Array2, Array3, ArrayView, ArrayView2, ArrayView3, Dimension};
use serde::{Deserialize, Serialize};

use super::{oracle_forward, GruOracle, OracleOutput};
use crate::core::dims::GruDims;
use crate::core::params::ParamBuffer;
use crate::error::{GruError, Result};
use crate::validation::compare::unravel;

/// One recorded oracle call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OracleFixture {
    /// Name of the oracle that produced the outputs.
    pub source: String,
    pub dims: GruDims,
    /// [`ParamBuffer::fingerprint`] of the buffer used.
    pub buffer_fingerprint: u64,
    /// `[T, B, I]`.
    pub inputs: Array3<f32>,
    /// `[B, R]`.
    pub initial_state: Array2<f32>,
    /// `[T, B, R]`.
    pub outputs: Array3<f32>,
    /// `[B, R]`.
    pub final_state: Array2<f32>,
}

impl OracleFixture {
    /// Run `oracle` once and capture the call.
    pub fn record(
        oracle: &dyn GruOracle,
        buffer: &ParamBuffer,
        inputs: ArrayView3<'_, f32>,
        initial_state: ArrayView2<'_, f32>,
    ) -> Result<Self> {
        let out = oracle_forward(oracle, buffer, inputs, initial_state)?;
        tracing::info!(
            source = oracle.name(),
            dims = %buffer.dims(),
            timesteps = inputs.len_of(ndarray::Axis(0)),
            "recorded oracle fixture"
        );
        Ok(Self {
            source: oracle.name().to_string(),
            dims: buffer.dims(),
            buffer_fingerprint: buffer.fingerprint(),
            inputs: inputs.to_owned(),
            initial_state: initial_state.to_owned(),
            outputs: out.outputs,
            final_state: out.final_state,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }
}

/// Oracle that answers from a single [`OracleFixture`].
#[derive(Clone, Debug)]
pub struct FixtureOracle {
    fixture: OracleFixture,
    name: String,
}

impl FixtureOracle {
    pub fn new(fixture: OracleFixture) -> Self {
        let name = format!("fixture({})", fixture.source);
        Self { fixture, name }
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::new(OracleFixture::load(path)?))
    }

    pub fn fixture(&self) -> &OracleFixture {
        &self.fixture
    }

    fn check_call(
        &self,
        buffer: &ParamBuffer,
        inputs: &ArrayView3<'_, f32>,
        initial_state: &ArrayView2<'_, f32>,
    ) -> Result<()> {
        let f = &self.fixture;
        if buffer.dims() != f.dims {
            return Err(GruError::FixtureMismatch(format!(
                "recorded for {}, called with {}",
                f.dims,
                buffer.dims()
            )));
        }
        if buffer.fingerprint() != f.buffer_fingerprint {
            return Err(GruError::FixtureMismatch(format!(
                "parameter buffer fingerprint {:016x} differs from recorded {:016x}",
                buffer.fingerprint(),
                f.buffer_fingerprint
            )));
        }
        if let Some(diff) = first_difference("inputs", inputs, &f.inputs.view()) {
            return Err(GruError::FixtureMismatch(diff));
        }
        let recorded_state = f.initial_state.view();
        if let Some(diff) = first_difference("initial state", initial_state, &recorded_state) {
            return Err(GruError::FixtureMismatch(diff));
        }
        Ok(())
    }
}

/// Locate the first element where `actual` departs from `recorded`.
fn first_difference<D: Dimension>(
    tensor: &str,
    actual: &ArrayView<'_, f32, D>,
    recorded: &ArrayView<'_, f32, D>,
) -> Option<String> {
    if actual.shape() != recorded.shape() {
        return Some(format!(
            "{tensor} shape {:?} differs from recorded {:?}",
            actual.shape(),
            recorded.shape()
        ));
    }
    actual
        .iter()
        .zip(recorded.iter())
        .enumerate()
        .find(|&(_, (a, r))| a != r)
        .map(|(k, (a, r))| {
            let index = unravel(k, actual.shape());
            format!("{tensor} mismatch at {index:?}: got {a}, recorded {r}")
        })
}

impl GruOracle for FixtureOracle {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(
        &self,
        buffer: &ParamBuffer,
        inputs: ArrayView3<'_, f32>,
        initial_state: ArrayView2<'_, f32>,
        _reserve: &[f32],
    ) -> Result<OracleOutput> {
        self.check_call(buffer, &inputs, &initial_state)?;
        Ok(OracleOutput {
            outputs: self.fixture.outputs.clone(),
            final_state: self.fixture.final_state.clone(),
        })
    }
}
