//! # gru-parity
//!
//! Two equivalent forward passes for a single-layer Gated Recurrent Unit that
//! share one flat parameter buffer:
//!
//! 1. **Fused kernel**: all three gates of a side evaluated as one packed
//!    matrix product, input projections precomputed for the whole sequence,
//!    batch rows in parallel. Serves as the reference oracle.
//! 2. **Explicit recurrence**: the same equations computed step by step from
//!    twelve named weight/bias views, usable wherever no fused kernel exists.
//!
//! ## Update rule
//!
//! ```text
//! r  = sigmoid(x·W_r + b_Wr + h·R_r + b_Rr)
//! u  = sigmoid(x·W_u + b_Wu + h·R_u + b_Ru)
//! c  = tanh(x·W_h + b_Wh + r ⊙ (h·R_h + b_Rh))
//! h' = u ⊙ h + (1 - u) ⊙ c
//! ```
//!
//! ## Buffer layout
//!
//! `R·(3R + 3I + 6)` floats: `W_r, W_u, W_h` (each `R×I`, output-major),
//! `R_r, R_u, R_h` (each `R×R`), then `b_Wr, b_Wu, b_Wh, b_Rr, b_Ru, b_Rh`
//! (each `R`). See [`core::splitter::canonical_layout`].

pub mod core;
pub mod error;
pub mod kernels;
pub mod oracle;
pub mod validation;

pub use error::{GruError, Result};

/// Defaults for the cross-implementation scenario.
pub mod config {
    /// Hidden state width.
    pub const DEFAULT_RECURRENT_SIZE: usize = 256;

    /// Input vector width per timestep.
    pub const DEFAULT_INPUT_CHANNELS: usize = 100;

    /// Sequence length.
    pub const DEFAULT_TIMESTEPS: usize = 10;

    /// Batch rows.
    pub const DEFAULT_BATCH_SIZE: usize = 1;

    /// Per-element absolute tolerance between implementations.
    pub const DEFAULT_TOLERANCE: f32 = 1e-5;

    /// Seed for parameter and input generation.
    pub const DEFAULT_SEED: u64 = 42;

    /// Number of gates (reset, update, candidate).
    pub const N_GATES: usize = 3;

    /// Number of bias vectors in the buffer (one per gate per side).
    pub const N_BIASES: usize = 2 * N_GATES;

    /// Buffer length for a GRU with the given widths.
    pub fn param_count(input_channels: usize, recurrent_size: usize) -> usize {
        recurrent_size * (N_GATES * recurrent_size + N_GATES * input_channels + N_BIASES)
    }
}
