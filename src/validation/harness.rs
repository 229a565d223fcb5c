//! Seeded equivalence scenario: one shared buffer, two implementations.
//!
//! The buffer is drawn with the variance-scaling initializer, inputs are
//! uniform in [0, 1), the initial state is zero. A recorded fixture can stand
//! in for the drawn inputs and state. The candidate backend and the oracle
//! both see exactly the same buffer, inputs and state; their output sequences
//! and final states are compared element by element.

use std::time::Instant;

use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use serde::{Deserialize, Serialize};

use super::compare::{compare_tensors, DivergenceReport};
use crate::config::{
    DEFAULT_BATCH_SIZE, DEFAULT_INPUT_CHANNELS, DEFAULT_RECURRENT_SIZE, DEFAULT_SEED,
    DEFAULT_TIMESTEPS, DEFAULT_TOLERANCE,
};
use crate::core::dims::GruDims;
use crate::core::params::{ParamBuffer, VarianceScaling};
use crate::core::recurrence::to_batch_major;
use crate::error::Result;
use crate::kernels::kernel_dispatch::{dispatch_forward, Backend};
use crate::oracle::{
    oracle_forward_batch_major, FixtureOracle, FusedOracle, GruOracle, OracleFixture,
};

/// Scenario configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationConfig {
    pub input_channels: usize,
    pub recurrent_size: usize,
    pub batch_size: usize,
    pub timesteps: usize,

    /// Seeds both the parameter buffer and the inputs.
    pub seed: u64,

    /// Per-element absolute tolerance.
    pub tolerance: f32,

    /// Constant written into every bias slot.
    pub bias_value: f32,

    /// Implementation under test.
    pub candidate: Backend,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            input_channels: DEFAULT_INPUT_CHANNELS,
            recurrent_size: DEFAULT_RECURRENT_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            timesteps: DEFAULT_TIMESTEPS,
            seed: DEFAULT_SEED,
            tolerance: DEFAULT_TOLERANCE,
            bias_value: 0.0,
            candidate: Backend::Explicit,
        }
    }
}

impl ValidationConfig {
    pub fn dims(&self) -> Result<GruDims> {
        GruDims::new(self.input_channels, self.recurrent_size)
    }

    /// Take dimensions, batch and sequence length from a recorded fixture.
    pub fn with_fixture_shape(mut self, fixture: &OracleFixture) -> Self {
        self.input_channels = fixture.dims.input_channels;
        self.recurrent_size = fixture.dims.recurrent_size;
        self.timesteps = fixture.inputs.len_of(Axis(0));
        self.batch_size = fixture.inputs.len_of(Axis(1));
        self
    }
}

/// Outcome of one equivalence run.
#[derive(Clone, Debug)]
pub struct EquivalenceReport {
    pub dims: GruDims,
    pub candidate: Backend,
    pub oracle: String,
    pub outputs: DivergenceReport,
    pub final_state: DivergenceReport,
    pub candidate_ms: f64,
    pub oracle_ms: f64,
}

impl EquivalenceReport {
    pub fn passed(&self) -> bool {
        self.outputs.passed() && self.final_state.passed()
    }

    /// `Err(NumericDivergence)` for the first failing tensor.
    pub fn ensure_passed(&self) -> Result<()> {
        self.outputs.clone().into_result()?;
        self.final_state.clone().into_result()?;
        Ok(())
    }
}

/// Uniform [0, 1) inputs, batch-major `[B, T, I]`.
pub fn random_inputs(
    rng: &mut dyn RngCore,
    batch: usize,
    timesteps: usize,
    channels: usize,
) -> Array3<f32> {
    Array3::from_shape_fn((batch, timesteps, channels), |_| rng.gen::<f32>())
}

fn initializer(config: &ValidationConfig) -> VarianceScaling {
    VarianceScaling::glorot_uniform().with_bias(config.bias_value)
}

/// The seeded parameter buffer alone; the same one [`build_scenario`] draws.
pub fn build_buffer(config: &ValidationConfig) -> Result<ParamBuffer> {
    Ok(ParamBuffer::initialize(config.dims()?, &initializer(config), config.seed))
}

/// Build the seeded buffer and inputs for `config`.
pub fn build_scenario(config: &ValidationConfig) -> Result<(ParamBuffer, Array3<f32>)> {
    let dims = config.dims()?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let buffer = ParamBuffer::initialize_with_rng(dims, &initializer(config), &mut rng);
    let (b, t, i) = (config.batch_size, config.timesteps, config.input_channels);
    let inputs = random_inputs(&mut rng, b, t, i);
    Ok((buffer, inputs))
}

/// Full scenario with the fused kernel as oracle.
pub fn run_equivalence(config: &ValidationConfig) -> Result<EquivalenceReport> {
    let (buffer, inputs) = build_scenario(config)?;
    let h0 = Array2::<f32>::zeros((config.batch_size, config.recurrent_size));
    run_equivalence_with(
        &buffer,
        inputs.view(),
        h0.view(),
        config.candidate,
        &FusedOracle::new(),
        config.tolerance,
    )
}

/// Check `candidate` against a recorded fixture, over the fixture's own
/// inputs and initial state.
///
/// `buffer` must be the one the fixture was recorded with.
pub fn replay_fixture(
    buffer: &ParamBuffer,
    fixture: OracleFixture,
    candidate: Backend,
    tolerance: f32,
) -> Result<EquivalenceReport> {
    let oracle = FixtureOracle::new(fixture);
    let recorded = oracle.fixture();
    run_equivalence_with(
        buffer,
        recorded.inputs.view().permuted_axes([1, 0, 2]),
        recorded.initial_state.view(),
        candidate,
        &oracle,
        tolerance,
    )
}

/// Compare `candidate` against `oracle` on caller-supplied data.
///
/// `inputs` is batch-major `[B, T, I]`, `initial_state` is `[B, R]`.
pub fn run_equivalence_with(
    buffer: &ParamBuffer,
    inputs: ArrayView3<'_, f32>,
    initial_state: ArrayView2<'_, f32>,
    candidate: Backend,
    oracle: &dyn GruOracle,
    tolerance: f32,
) -> Result<EquivalenceReport> {
    let dims = buffer.dims();
    let (batch, timesteps, _) = inputs.dim();

    tracing::info!(
        %dims,
        batch,
        timesteps,
        %candidate,
        oracle = oracle.name(),
        "running equivalence check"
    );

    let start = Instant::now();
    let time_major = inputs.permuted_axes([1, 0, 2]);
    let run = dispatch_forward(candidate, buffer, time_major, initial_state)?;
    let candidate_ms = start.elapsed().as_secs_f64() * 1e3;
    let candidate_outputs = to_batch_major(run.outputs);

    let start = Instant::now();
    let (oracle_outputs, oracle_final) =
        oracle_forward_batch_major(oracle, buffer, inputs, initial_state)?;
    let oracle_ms = start.elapsed().as_secs_f64() * 1e3;

    let outputs =
        compare_tensors("outputs", oracle_outputs.view(), candidate_outputs.view(), tolerance)?;
    let final_state =
        compare_tensors("final_state", oracle_final.view(), run.final_state.view(), tolerance)?;

    for report in [&outputs, &final_state] {
        if report.passed() {
            tracing::info!("{report}");
        } else {
            tracing::warn!("{report}");
        }
    }

    Ok(EquivalenceReport {
        dims,
        candidate,
        oracle: oracle.name().to_string(),
        outputs,
        final_state,
        candidate_ms,
        oracle_ms,
    })
}
