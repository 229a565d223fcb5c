//! gru-parity: check the explicit GRU recurrence against a reference kernel.
//!
//! Builds (or loads) one flat parameter buffer, runs the selected backend and
//! the oracle over the same inputs, and exits non-zero on divergence. With
//! `--fixture` the inputs and initial state are the recorded ones.

use std::path::PathBuf;

use anyhow::{bail, ensure, Context};
use clap::Parser;
use ndarray::Array2;
use tracing_subscriber::EnvFilter;

use gru_parity::config;
use gru_parity::core::params::ParamBuffer;
use gru_parity::kernels::kernel_dispatch::{forward_flops, Backend};
use gru_parity::oracle::{FixtureOracle, FusedOracle, GruOracle, OracleFixture};
use gru_parity::validation::harness::{
    build_buffer, build_scenario, replay_fixture, run_equivalence_with, EquivalenceReport,
    ValidationConfig,
};

/// GRU forward-pass equivalence checker.
#[derive(Parser, Debug)]
#[command(name = "gru-parity", version)]
struct Cli {
    /// Features per timestep (I) [default: 100].
    #[arg(long)]
    input_channels: Option<usize>,

    /// Hidden state width (R) [default: 256].
    #[arg(long)]
    recurrent_size: Option<usize>,

    /// Batch rows [default: 1].
    #[arg(long)]
    batch_size: Option<usize>,

    /// Sequence length [default: 10].
    #[arg(long)]
    timesteps: Option<usize>,

    /// Seeds the parameter buffer and the inputs.
    #[arg(long, default_value_t = config::DEFAULT_SEED)]
    seed: u64,

    /// Per-element absolute tolerance.
    #[arg(long, default_value_t = config::DEFAULT_TOLERANCE)]
    tolerance: f32,

    /// Constant for every bias slot of a freshly drawn buffer.
    #[arg(long, default_value_t = 0.0)]
    bias: f32,

    /// Backend under test: explicit | fused.
    #[arg(long, default_value_t = Backend::Explicit)]
    backend: Backend,

    /// Write the parameter buffer used for this run.
    #[arg(long)]
    save_params: Option<PathBuf>,

    /// Use a saved parameter buffer instead of drawing one.
    #[arg(long)]
    load_params: Option<PathBuf>,

    /// Record the fused oracle's answer to this file.
    #[arg(long)]
    record_fixture: Option<PathBuf>,

    /// Replay a recorded fixture as the oracle, over its own inputs.
    #[arg(long, conflicts_with = "record_fixture")]
    fixture: Option<PathBuf>,
}

impl Cli {
    /// Shape flags left unset take defaults, or the fixture's recorded shape.
    fn resolve_config(&self, fixture: Option<&OracleFixture>) -> anyhow::Result<ValidationConfig> {
        let base = ValidationConfig {
            seed: self.seed,
            tolerance: self.tolerance,
            bias_value: self.bias,
            candidate: self.backend,
            ..Default::default()
        };
        let Some(fixture) = fixture else {
            return Ok(ValidationConfig {
                input_channels: self.input_channels.unwrap_or(base.input_channels),
                recurrent_size: self.recurrent_size.unwrap_or(base.recurrent_size),
                batch_size: self.batch_size.unwrap_or(base.batch_size),
                timesteps: self.timesteps.unwrap_or(base.timesteps),
                ..base
            });
        };

        let config = base.with_fixture_shape(fixture);
        let flags = [
            ("--input-channels", self.input_channels, config.input_channels),
            ("--recurrent-size", self.recurrent_size, config.recurrent_size),
            ("--batch-size", self.batch_size, config.batch_size),
            ("--timesteps", self.timesteps, config.timesteps),
        ];
        for (flag, given, recorded) in flags {
            if let Some(given) = given {
                if given != recorded {
                    bail!("{flag} {given} conflicts with the fixture (recorded {recorded})");
                }
            }
        }
        Ok(config)
    }
}

fn prepare_buffer(
    cli: &Cli,
    config: &ValidationConfig,
    drawn: ParamBuffer,
) -> anyhow::Result<ParamBuffer> {
    let buffer = match &cli.load_params {
        Some(path) => {
            let loaded = ParamBuffer::load(path)
                .with_context(|| format!("failed to load parameters from {}", path.display()))?;
            ensure!(
                loaded.dims() == config.dims()?,
                "{} holds {}, expected {}",
                path.display(),
                loaded.dims(),
                config.dims()?
            );
            tracing::info!(
                path = %path.display(),
                fingerprint = %format!("{:016x}", loaded.fingerprint()),
                "loaded parameters"
            );
            loaded
        }
        None => drawn,
    };
    if let Some(path) = &cli.save_params {
        buffer
            .save(path)
            .with_context(|| format!("failed to save parameters to {}", path.display()))?;
        tracing::info!(path = %path.display(), "saved parameters");
    }
    Ok(buffer)
}

fn run(cli: &Cli) -> anyhow::Result<(ValidationConfig, EquivalenceReport)> {
    if let Some(path) = &cli.fixture {
        let fixture = OracleFixture::load(path)
            .with_context(|| format!("failed to load fixture {}", path.display()))?;
        let config = cli.resolve_config(Some(&fixture))?;
        let buffer = prepare_buffer(cli, &config, build_buffer(&config)?)?;
        let report = replay_fixture(&buffer, fixture, config.candidate, config.tolerance)
            .context("equivalence run failed")?;
        return Ok((config, report));
    }

    let config = cli.resolve_config(None)?;
    let (drawn, inputs) = build_scenario(&config).context("invalid GRU dimensions")?;
    let buffer = prepare_buffer(cli, &config, drawn)?;
    let h0 = Array2::<f32>::zeros((config.batch_size, config.recurrent_size));

    let oracle: Box<dyn GruOracle> = match &cli.record_fixture {
        Some(path) => {
            let time_major = inputs.view().permuted_axes([1, 0, 2]);
            let fixture =
                OracleFixture::record(&FusedOracle::new(), &buffer, time_major, h0.view())?;
            fixture
                .save(path)
                .with_context(|| format!("failed to write fixture {}", path.display()))?;
            Box::new(FixtureOracle::new(fixture))
        }
        None => Box::new(FusedOracle::new()),
    };

    let report = run_equivalence_with(
        &buffer,
        inputs.view(),
        h0.view(),
        config.candidate,
        oracle.as_ref(),
        config.tolerance,
    )
    .context("equivalence run failed")?;
    Ok((config, report))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    tracing::info!("gru-parity v{}", env!("CARGO_PKG_VERSION"));

    let (config, report) = run(&cli)?;

    let flops = forward_flops(&report.dims, config.timesteps, config.batch_size);
    tracing::info!(
        "{} {:.2} ms ({:.2} GFLOP/s), {} {:.2} ms",
        report.candidate,
        report.candidate_ms,
        flops as f64 / (report.candidate_ms.max(1e-6) * 1e6),
        report.oracle,
        report.oracle_ms,
    );

    report.ensure_passed().context("implementations diverged")?;
    tracing::info!("Done.");
    Ok(())
}
