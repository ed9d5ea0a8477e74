//! # rill-nn
//!
//! Recurrent network building blocks for Rill.
//!
//! Provides the pieces a sequence model is assembled from:
//!
//! 1. **RecurrentCell trait** — one timestep of recurrence behind an
//!    associated `State` type, so cells with different carried state
//!    (hidden-only vs hidden-plus-cell) are interchangeable
//! 2. **RNNCell / LSTMCell / GRUCell** — the three standard cells
//! 3. **Recurrence** — unrolls any cell over the sequence dimension
//! 4. **Initializers** — uniform, normal, constant, zeros, ones
//! 5. **Loss functions** — `mse_loss`, `sequence_squared_error`
//!
//! Everything is generic over `Backend` (like `Tensor<B>`), so the same
//! network definition works on CPU or any future backend.

pub mod init;
pub mod loss;
pub mod recurrent;

pub use loss::{mse_loss, sequence_squared_error};
pub use recurrent::{GRUCell, LSTMCell, LstmState, RNNCell, Recurrence, RecurrentCell};
