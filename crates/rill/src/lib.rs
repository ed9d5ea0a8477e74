//! # Rill
//!
//! Recurrent sequence regression in Rust.
//!
//! This is the top-level facade crate that re-exports everything you need.
//!
//! ## Usage
//!
//! ```rust
//! use rill::prelude::*;
//! ```
//!
//! ## Architecture
//!
//! | Crate | Purpose |
//! |-------|----------|
//! | `rill-core` | Tensor, Shape, DType, Layout, Backend trait, Autograd |
//! | `rill-cpu` | CPU backend with rayon-parallel matmul and a seedable RNG device |
//! | `rill-nn` | Recurrent cells (RNN, LSTM, GRU), initializers, loss functions |
//! | `rill-optim` | Optimizers (SGD, Adam) |
//!
//! ## Modules
//!
//! - [`regressor`] — the [`SequenceRegressor`] model and its training loops
//! - [`plot`] — terminal line charts for watching predictions during training

/// Re-export core types.
pub use rill_core::{
    backend::{Backend, BackendDevice, BackendStorage, BinaryOp, ReduceOp, UnaryOp},
    op::{Op, TensorId},
    DType, Error, GradStore, Layout, Result, Shape, Tensor, WithDType,
};

/// Re-export CPU backend.
pub use rill_cpu::{CpuBackend, CpuDevice, CpuStorage, CpuTensor};

/// Re-export neural network building blocks.
pub mod nn {
    pub use rill_nn::*;
}

/// Re-export optimizers.
pub mod optim {
    pub use rill_optim::*;
}

/// Terminal line charts.
pub mod plot;

/// The sequence regression model and its training loops.
pub mod regressor;

pub use regressor::{PlotBatch, SequenceRegressor};

/// Prelude: import this for the most common types.
pub mod prelude {
    pub use crate::nn::{mse_loss, sequence_squared_error};
    pub use crate::nn::{GRUCell, LSTMCell, LstmState, RNNCell, Recurrence, RecurrentCell};
    pub use crate::optim::{Adam, Optimizer, SGD};
    pub use crate::regressor::{PlotBatch, SequenceRegressor};
    pub use crate::{CpuBackend, CpuDevice, CpuTensor};
    pub use crate::{DType, Error, GradStore, Result, Shape, Tensor};
}
