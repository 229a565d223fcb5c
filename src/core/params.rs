//! Flat parameter buffer and injectable initializers.
//!
//! The buffer is one contiguous `f32` sequence of length `R·(3R + 3I + 6)`.
//! It is filled once, then only ever lent out as `&[f32]`: to the splitter
//! and to the oracle alike, so both read the same values.

use std::path::Path;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use rand_distr::{Distribution, Normal, Uniform};
use serde::{Deserialize, Serialize};

use super::dims::GruDims;
use super::splitter::{canonical_layout, SliceKind};
use crate::error::{GruError, Result};

/// Strategy that produces the initial buffer values.
///
/// Implementations receive the whole buffer and may use
/// [`canonical_layout`] to treat weights and biases differently.
pub trait Initializer {
    fn fill(&self, dims: &GruDims, values: &mut [f32], rng: &mut dyn RngCore);
}

/// Every element set to zero.
#[derive(Clone, Copy, Debug, Default)]
pub struct Zeros;

impl Initializer for Zeros {
    fn fill(&self, _dims: &GruDims, values: &mut [f32], _rng: &mut dyn RngCore) {
        values.fill(0.0);
    }
}

/// Every element set to the same value.
#[derive(Clone, Copy, Debug)]
pub struct Constant(pub f32);

impl Initializer for Constant {
    fn fill(&self, _dims: &GruDims, values: &mut [f32], _rng: &mut dyn RngCore) {
        values.fill(self.0);
    }
}

/// Which fan the variance is scaled by.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FanMode {
    FanIn,
    FanOut,
    FanAvg,
}

/// Sampling distribution for [`VarianceScaling`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScalingDistribution {
    Uniform,
    TruncatedNormal,
}

/// Variance-scaling weights, constant biases.
///
/// For a matrix with fans `(fan_in, fan_out)` the target variance is
/// `scale / n` where `n` is chosen by `mode`.
#[derive(Clone, Copy, Debug)]
pub struct VarianceScaling {
    pub scale: f32,
    pub mode: FanMode,
    pub distribution: ScalingDistribution,
    /// Value written into every bias slot.
    pub bias_value: f32,
}

impl VarianceScaling {
    /// Glorot/Xavier uniform: `scale = 1`, fan average, uniform.
    pub fn glorot_uniform() -> Self {
        Self {
            scale: 1.0,
            mode: FanMode::FanAvg,
            distribution: ScalingDistribution::Uniform,
            bias_value: 0.0,
        }
    }

    /// Same weight scheme with nonzero biases.
    pub fn with_bias(mut self, bias_value: f32) -> Self {
        self.bias_value = bias_value;
        self
    }

    fn variance(&self, fan_in: usize, fan_out: usize) -> f32 {
        let n = match self.mode {
            FanMode::FanIn => fan_in as f32,
            FanMode::FanOut => fan_out as f32,
            FanMode::FanAvg => (fan_in + fan_out) as f32 / 2.0,
        };
        self.scale / n.max(1.0)
    }
}

impl Default for VarianceScaling {
    fn default() -> Self {
        Self::glorot_uniform()
    }
}

/// Standard deviation of a unit normal truncated to [-2, 2].
const TRUNCATED_NORMAL_STDDEV: f32 = 0.879_625_7;

impl Initializer for VarianceScaling {
    fn fill(&self, dims: &GruDims, values: &mut [f32], rng: &mut dyn RngCore) {
        for slice in canonical_layout(dims) {
            let segment = &mut values[slice.range()];
            if slice.kind == SliceKind::Bias {
                segment.fill(self.bias_value);
                continue;
            }

            let (fan_in, fan_out) = (slice.shape[0], dims.recurrent_size);
            let variance = self.variance(fan_in, fan_out);
            if variance.is_nan() || variance <= 0.0 {
                segment.fill(0.0);
                continue;
            }

            match self.distribution {
                ScalingDistribution::Uniform => {
                    let limit = (3.0 * variance).sqrt();
                    let dist = Uniform::new(-limit, limit);
                    for v in segment.iter_mut() {
                        *v = dist.sample(&mut *rng);
                    }
                }
                ScalingDistribution::TruncatedNormal => {
                    let std = variance.sqrt() / TRUNCATED_NORMAL_STDDEV;
                    let Ok(normal) = Normal::new(0.0_f32, std) else {
                        segment.fill(0.0);
                        continue;
                    };
                    for v in segment.iter_mut() {
                        // Resample anything beyond two standard deviations.
                        *v = loop {
                            let x = normal.sample(&mut *rng);
                            if x.abs() <= 2.0 * std {
                                break x;
                            }
                        };
                    }
                }
            }
        }
    }
}

/// The flat GRU parameter buffer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParamBuffer {
    dims: GruDims,
    values: Vec<f32>,
}

impl ParamBuffer {
    /// All-zero buffer.
    pub fn zeros(dims: GruDims) -> Self {
        Self {
            dims,
            values: vec![0.0; dims.param_count()],
        }
    }

    /// Wrap existing values; the length must match the dimensions exactly.
    pub fn from_vec(dims: GruDims, values: Vec<f32>) -> Result<Self> {
        if values.len() != dims.param_count() {
            return Err(GruError::shape(
                "parameter buffer",
                &[dims.param_count()],
                &[values.len()],
            ));
        }
        Ok(Self { dims, values })
    }

    /// Fill a fresh buffer from `init` with a seeded RNG.
    pub fn initialize(dims: GruDims, init: &dyn Initializer, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        Self::initialize_with_rng(dims, init, &mut rng)
    }

    /// Fill a fresh buffer from `init` with a caller-owned RNG.
    pub fn initialize_with_rng(
        dims: GruDims,
        init: &dyn Initializer,
        rng: &mut dyn RngCore,
    ) -> Self {
        let mut buffer = Self::zeros(dims);
        init.fill(&dims, &mut buffer.values, rng);
        tracing::debug!(%dims, len = buffer.values.len(), "initialized parameter buffer");
        buffer
    }

    pub fn dims(&self) -> GruDims {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Read-only view of the raw values.
    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    /// Consume the buffer, returning the raw values.
    pub fn into_vec(self) -> Vec<f32> {
        self.values
    }

    /// FNV-1a over the bit patterns of every value.
    ///
    /// Identifies the exact buffer a fixture was recorded against.
    pub fn fingerprint(&self) -> u64 {
        fingerprint(&self.values)
    }

    /// Serialise to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialise from bytes, re-checking the length invariant.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let decoded: ParamBuffer = bincode::deserialize(bytes)?;
        Self::from_vec(decoded.dims, decoded.values)
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

/// FNV-1a over `f32` bit patterns.
pub fn fingerprint(values: &[f32]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    values.iter().fold(OFFSET, |hash, v| {
        v.to_bits()
            .to_le_bytes()
            .iter()
            .fold(hash, |h, &b| (h ^ b as u64).wrapping_mul(PRIME))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::splitter::split;

    fn dims() -> GruDims {
        GruDims::new(3, 5).unwrap()
    }

    #[test]
    fn test_from_vec_length_checked() {
        let d = dims();
        assert!(ParamBuffer::from_vec(d, vec![0.0; d.param_count()]).is_ok());
        let err = ParamBuffer::from_vec(d, vec![0.0; d.param_count() - 1]).unwrap_err();
        assert!(err.is_shape_mismatch());
        let err = ParamBuffer::from_vec(d, vec![0.0; d.param_count() + 1]).unwrap_err();
        assert!(err.is_shape_mismatch());
    }

    #[test]
    fn test_initialize_is_seeded() {
        let init = VarianceScaling::glorot_uniform();
        let a = ParamBuffer::initialize(dims(), &init, 7);
        let b = ParamBuffer::initialize(dims(), &init, 7);
        let c = ParamBuffer::initialize(dims(), &init, 8);
        assert_eq!(a, b);
        assert_ne!(a.as_slice(), c.as_slice());
    }

    #[test]
    fn test_glorot_uniform_bounds_and_zero_bias() {
        let d = GruDims::new(100, 256).unwrap();
        let buf = ParamBuffer::initialize(d, &VarianceScaling::glorot_uniform(), 1);
        let input_limit = (6.0_f32 / (100.0 + 256.0)).sqrt() * (1.0 + 1e-6);
        let recurrent_limit = (6.0_f32 / (256.0 + 256.0)).sqrt() * (1.0 + 1e-6);

        let w = split(buf.as_slice(), d.input_channels, d.recurrent_size).unwrap();
        assert!(w.w_r.iter().all(|v| v.abs() <= input_limit));
        assert!(w.r_h.iter().all(|v| v.abs() <= recurrent_limit));
        assert!(w.b_wr.iter().chain(w.b_rh.iter()).all(|&v| v == 0.0));
        assert!(w.w_u.iter().any(|&v| v != 0.0));
    }

    #[test]
    fn test_truncated_normal_within_two_std() {
        let d = dims();
        let init = VarianceScaling {
            scale: 2.0,
            mode: FanMode::FanIn,
            distribution: ScalingDistribution::TruncatedNormal,
            bias_value: 0.5,
        };
        let buf = ParamBuffer::initialize(d, &init, 3);
        let w = split(buf.as_slice(), d.input_channels, d.recurrent_size).unwrap();
        let std_in = (2.0_f32 / 3.0).sqrt() / TRUNCATED_NORMAL_STDDEV;
        assert!(w.w_h.iter().all(|v| v.abs() <= 2.0 * std_in));
        assert!(w.b_ru.iter().all(|&v| v == 0.5));
    }

    #[test]
    fn test_constant_and_zeros() {
        let d = dims();
        let c = ParamBuffer::initialize(d, &Constant(0.25), 0);
        assert!(c.as_slice().iter().all(|&v| v == 0.25));
        let z = ParamBuffer::initialize(d, &Zeros, 0);
        assert_eq!(z, ParamBuffer::zeros(d));
    }

    #[test]
    fn test_bytes_roundtrip() {
        let buf = ParamBuffer::initialize(dims(), &VarianceScaling::default(), 11);
        let restored = ParamBuffer::from_bytes(&buf.to_bytes().unwrap()).unwrap();
        assert_eq!(buf, restored);
        assert_eq!(buf.fingerprint(), restored.fingerprint());
    }

    #[test]
    fn test_save_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.bin");
        let buf = ParamBuffer::initialize(dims(), &VarianceScaling::default(), 5);
        buf.save(&path).unwrap();
        assert_eq!(ParamBuffer::load(&path).unwrap(), buf);
    }

    #[test]
    fn test_fingerprint_sensitive_to_single_value() {
        let d = dims();
        let mut values = vec![0.1; d.param_count()];
        let a = fingerprint(&values);
        values[17] = 0.100_000_01;
        assert_ne!(a, fingerprint(&values));
    }
}
