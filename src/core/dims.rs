//! GRU dimensions.
//!
//! Fixed for the lifetime of a GRU instance; every tensor shape in the crate
//! is derived from these two widths.

use serde::{Deserialize, Serialize};

use crate::config::{self, N_BIASES, N_GATES};
use crate::error::{GruError, Result};

/// Input and hidden widths of one GRU layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GruDims {
    /// Size of each input vector per timestep.
    pub input_channels: usize,

    /// Size of the hidden state.
    pub recurrent_size: usize,
}

impl GruDims {
    /// Both widths must be positive.
    pub fn new(input_channels: usize, recurrent_size: usize) -> Result<Self> {
        if input_channels == 0 || recurrent_size == 0 {
            return Err(GruError::shape(
                "gru dimensions (input_channels, recurrent_size)",
                &[input_channels.max(1), recurrent_size.max(1)],
                &[input_channels, recurrent_size],
            ));
        }
        Ok(Self {
            input_channels,
            recurrent_size,
        })
    }

    /// Total length of the flat parameter buffer.
    pub fn param_count(&self) -> usize {
        config::param_count(self.input_channels, self.recurrent_size)
    }

    /// Elements in one input-side matrix.
    pub fn input_matrix_len(&self) -> usize {
        self.input_channels * self.recurrent_size
    }

    /// Elements in one recurrent-side matrix.
    pub fn recurrent_matrix_len(&self) -> usize {
        self.recurrent_size * self.recurrent_size
    }

    /// Elements across all six weight matrices.
    pub fn weight_count(&self) -> usize {
        N_GATES * (self.input_matrix_len() + self.recurrent_matrix_len())
    }

    /// Elements across all six bias vectors.
    pub fn bias_count(&self) -> usize {
        N_BIASES * self.recurrent_size
    }
}

impl std::fmt::Display for GruDims {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GRU(I={}, R={})", self.input_channels, self.recurrent_size)
    }
}
