// Recurrent cells and the sequence unroller
//
// Three single-step cells are provided:
//
//   1. RNNCell  — vanilla Elman update
//   2. LSTMCell — long short-term memory: four gates plus a cell state
//   3. GRUCell  — gated recurrent unit: reset and update gates
//
// All three implement [`RecurrentCell`], which hides the shape of the
// carried state behind an associated type. A hidden-only cell (RNN, GRU)
// and a hidden-plus-cell cell (LSTM) therefore drive the same
// [`Recurrence`] unroller and the same training loop.
//
// SHAPES (batch_first convention):
//   input:  [batch, seq_len, input_size]
//   output: [batch, seq_len, hidden_size]
//   state:  [batch, hidden_size] per carried tensor
//
// WEIGHT INITIALIZATION:
//   All weights and biases use U(-k, k) where k = sqrt(1/hidden_size),
//   following PyTorch's default initialization for recurrent layers.

use rill_core::backend::Backend;
use rill_core::dtype::DType;
use rill_core::error::{Error, Result};
use rill_core::tensor::Tensor;

use crate::init;

/// One timestep of recurrence.
///
/// The carried state is an associated type, so cells that thread a single
/// hidden tensor and cells that thread several stay interchangeable behind
/// the same trait. Training loops hold a `State` value explicitly and pass
/// it back in on the next call; nothing is hidden inside the cell.
pub trait RecurrentCell<B: Backend> {
    /// State carried from one timestep to the next.
    type State: Clone;

    fn input_size(&self) -> usize;
    fn hidden_size(&self) -> usize;

    /// All-zero state for a batch of the given size.
    fn zero_state(&self, batch_size: usize) -> Result<Self::State>;

    /// Consume `x` `[batch, input_size]` and the incoming state, produce the
    /// hidden output `[batch, hidden_size]` and the outgoing state.
    fn step(&self, x: &Tensor<B>, state: &Self::State) -> Result<(Tensor<B>, Self::State)>;

    /// Copy of the state cut loose from the graph that produced it. A later
    /// backward pass stops at the detached tensors instead of unrolling
    /// through every previous batch.
    fn detach_state(&self, state: &Self::State) -> Self::State;

    /// All trainable parameters, in a stable order.
    fn parameters(&self) -> Vec<Tensor<B>>;

    /// Redraw all weights and biases in place. Tensor identities are kept,
    /// so optimizers and models holding these tensors see the new values.
    fn reset_parameters(&self) -> Result<()>;
}

/// Overwrite `t` with a fresh draw from U(-k, k), keeping its identity.
fn refill_uniform<B: Backend>(t: &Tensor<B>, k: f64) -> Result<()> {
    let fresh = Tensor::<B>::rand(t.shape().clone(), t.dtype(), t.device())?.affine(2.0 * k, -k)?;
    t.update_data_inplace(&fresh.to_f64_vec()?)
}

// RNNCell — Single-step vanilla RNN
//
// h' = tanh(x @ W_ih^T + b_ih + h @ W_hh^T + b_hh)
//
// The simplest recurrent unit. It suffers from vanishing gradients for long
// sequences, which LSTM and GRU were designed to address.

/// A single-step vanilla RNN cell. Carries one hidden tensor.
pub struct RNNCell<B: Backend> {
    w_ih: Tensor<B>, // [hidden_size, input_size]
    w_hh: Tensor<B>, // [hidden_size, hidden_size]
    b_ih: Tensor<B>, // [1, hidden_size]
    b_hh: Tensor<B>, // [1, hidden_size]
    input_size: usize,
    hidden_size: usize,
    dtype: DType,
    device: B::Device,
}

impl<B: Backend> RNNCell<B> {
    pub fn new(
        input_size: usize,
        hidden_size: usize,
        dtype: DType,
        device: &B::Device,
    ) -> Result<Self> {
        let k = (1.0 / hidden_size as f64).sqrt();
        let w_ih = init::uniform::<B>((hidden_size, input_size), -k, k, dtype, device)?;
        let w_hh = init::uniform::<B>((hidden_size, hidden_size), -k, k, dtype, device)?;
        let b_ih = init::uniform::<B>((1, hidden_size), -k, k, dtype, device)?;
        let b_hh = init::uniform::<B>((1, hidden_size), -k, k, dtype, device)?;
        Ok(RNNCell {
            w_ih,
            w_hh,
            b_ih,
            b_hh,
            input_size,
            hidden_size,
            dtype,
            device: device.clone(),
        })
    }
}

impl<B: Backend> RecurrentCell<B> for RNNCell<B> {
    type State = Tensor<B>;

    fn input_size(&self) -> usize {
        self.input_size
    }

    fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    fn zero_state(&self, batch_size: usize) -> Result<Tensor<B>> {
        Tensor::<B>::zeros((batch_size, self.hidden_size), self.dtype, &self.device)
    }

    /// h' = tanh(x @ W_ih^T + b_ih + h @ W_hh^T + b_hh)
    fn step(&self, x: &Tensor<B>, h: &Tensor<B>) -> Result<(Tensor<B>, Tensor<B>)> {
        let wih_t = self.w_ih.t()?.contiguous()?;
        let gates = x.matmul(&wih_t)?.add(&self.b_ih)?;

        let whh_t = self.w_hh.t()?.contiguous()?;
        let h_part = h.matmul(&whh_t)?.add(&self.b_hh)?;

        let h_new = gates.add(&h_part)?.tanh()?;
        Ok((h_new.clone(), h_new))
    }

    fn detach_state(&self, state: &Tensor<B>) -> Tensor<B> {
        state.detach()
    }

    /// Order: `[w_ih, w_hh, b_ih, b_hh]`
    fn parameters(&self) -> Vec<Tensor<B>> {
        vec![
            self.w_ih.clone(),
            self.w_hh.clone(),
            self.b_ih.clone(),
            self.b_hh.clone(),
        ]
    }

    fn reset_parameters(&self) -> Result<()> {
        let k = (1.0 / self.hidden_size as f64).sqrt();
        refill_uniform(&self.w_ih, k)?;
        refill_uniform(&self.w_hh, k)?;
        refill_uniform(&self.b_ih, k)?;
        refill_uniform(&self.b_hh, k)?;
        Ok(())
    }
}

// LSTMCell — Single-step LSTM
//
// gates = x @ W_ih^T + b_ih + h @ W_hh^T + b_hh    # [batch, 4*hidden]
// i, f, g, o = chunk(gates, 4)
// i = sigmoid(i)   — input gate:  how much new info to let in
// f = sigmoid(f)   — forget gate: how much old info to keep
// g = tanh(g)      — cell gate:   candidate values to add
// o = sigmoid(o)   — output gate: how much state to expose
// c' = f * c + i * g
// h' = o * tanh(c')

/// The carried state of an [`LSTMCell`]: hidden state plus cell state,
/// each `[batch, hidden_size]`.
#[derive(Clone)]
pub struct LstmState<B: Backend> {
    pub h: Tensor<B>,
    pub c: Tensor<B>,
}

/// A single-step LSTM cell. Carries a hidden tensor and a cell tensor.
pub struct LSTMCell<B: Backend> {
    w_ih: Tensor<B>, // [4*hidden_size, input_size]
    w_hh: Tensor<B>, // [4*hidden_size, hidden_size]
    b_ih: Tensor<B>, // [1, 4*hidden_size]
    b_hh: Tensor<B>, // [1, 4*hidden_size]
    input_size: usize,
    hidden_size: usize,
    dtype: DType,
    device: B::Device,
}

impl<B: Backend> LSTMCell<B> {
    pub fn new(
        input_size: usize,
        hidden_size: usize,
        dtype: DType,
        device: &B::Device,
    ) -> Result<Self> {
        let gate_size = 4 * hidden_size;
        let k = (1.0 / hidden_size as f64).sqrt();
        let w_ih = init::uniform::<B>((gate_size, input_size), -k, k, dtype, device)?;
        let w_hh = init::uniform::<B>((gate_size, hidden_size), -k, k, dtype, device)?;
        let b_ih = init::uniform::<B>((1, gate_size), -k, k, dtype, device)?;
        let b_hh = init::uniform::<B>((1, gate_size), -k, k, dtype, device)?;
        Ok(LSTMCell {
            w_ih,
            w_hh,
            b_ih,
            b_hh,
            input_size,
            hidden_size,
            dtype,
            device: device.clone(),
        })
    }
}

impl<B: Backend> RecurrentCell<B> for LSTMCell<B> {
    type State = LstmState<B>;

    fn input_size(&self) -> usize {
        self.input_size
    }

    fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    fn zero_state(&self, batch_size: usize) -> Result<LstmState<B>> {
        Ok(LstmState {
            h: Tensor::<B>::zeros((batch_size, self.hidden_size), self.dtype, &self.device)?,
            c: Tensor::<B>::zeros((batch_size, self.hidden_size), self.dtype, &self.device)?,
        })
    }

    fn step(&self, x: &Tensor<B>, state: &LstmState<B>) -> Result<(Tensor<B>, LstmState<B>)> {
        // All 4 gates at once: [batch, 4*hidden_size]
        let wih_t = self.w_ih.t()?.contiguous()?;
        let gates = x.matmul(&wih_t)?.add(&self.b_ih)?;

        let whh_t = self.w_hh.t()?.contiguous()?;
        let h_part = state.h.matmul(&whh_t)?.add(&self.b_hh)?;

        let gates = gates.add(&h_part)?;

        // Split into 4 gates: each [batch, hidden_size]
        let chunks = gates.chunk(4, 1)?;
        let i_gate = chunks[0].sigmoid()?; // input gate
        let f_gate = chunks[1].sigmoid()?; // forget gate
        let g_gate = chunks[2].tanh()?; // cell gate (candidate)
        let o_gate = chunks[3].sigmoid()?; // output gate

        // c' = f * c + i * g
        let c_new = f_gate.mul(&state.c)?.add(&i_gate.mul(&g_gate)?)?;

        // h' = o * tanh(c')
        let h_new = o_gate.mul(&c_new.tanh()?)?;

        Ok((
            h_new.clone(),
            LstmState {
                h: h_new,
                c: c_new,
            },
        ))
    }

    fn detach_state(&self, state: &LstmState<B>) -> LstmState<B> {
        LstmState {
            h: state.h.detach(),
            c: state.c.detach(),
        }
    }

    /// Order: `[w_ih, w_hh, b_ih, b_hh]`
    fn parameters(&self) -> Vec<Tensor<B>> {
        vec![
            self.w_ih.clone(),
            self.w_hh.clone(),
            self.b_ih.clone(),
            self.b_hh.clone(),
        ]
    }

    fn reset_parameters(&self) -> Result<()> {
        let k = (1.0 / self.hidden_size as f64).sqrt();
        refill_uniform(&self.w_ih, k)?;
        refill_uniform(&self.w_hh, k)?;
        refill_uniform(&self.b_ih, k)?;
        refill_uniform(&self.b_hh, k)?;
        Ok(())
    }
}

// GRUCell — Single-step GRU
//
// gates_ih = x @ W_ih^T + b_ih          [batch, 3*hidden]
// gates_hh = h @ W_hh^T + b_hh          [batch, 3*hidden]
// r_ih, z_ih, n_ih = chunk(gates_ih, 3)
// r_hh, z_hh, n_hh = chunk(gates_hh, 3)
//
// r = sigmoid(r_ih + r_hh)    — reset gate
// z = sigmoid(z_ih + z_hh)    — update gate
// n = tanh(n_ih + r * n_hh)   — new gate (candidate)
//
// h' = (1 - z) * n + z * h

/// A single-step GRU cell. Carries one hidden tensor.
pub struct GRUCell<B: Backend> {
    w_ih: Tensor<B>, // [3*hidden_size, input_size]
    w_hh: Tensor<B>, // [3*hidden_size, hidden_size]
    b_ih: Tensor<B>, // [1, 3*hidden_size]
    b_hh: Tensor<B>, // [1, 3*hidden_size]
    input_size: usize,
    hidden_size: usize,
    dtype: DType,
    device: B::Device,
}

impl<B: Backend> GRUCell<B> {
    pub fn new(
        input_size: usize,
        hidden_size: usize,
        dtype: DType,
        device: &B::Device,
    ) -> Result<Self> {
        let gate_size = 3 * hidden_size;
        let k = (1.0 / hidden_size as f64).sqrt();
        let w_ih = init::uniform::<B>((gate_size, input_size), -k, k, dtype, device)?;
        let w_hh = init::uniform::<B>((gate_size, hidden_size), -k, k, dtype, device)?;
        let b_ih = init::uniform::<B>((1, gate_size), -k, k, dtype, device)?;
        let b_hh = init::uniform::<B>((1, gate_size), -k, k, dtype, device)?;
        Ok(GRUCell {
            w_ih,
            w_hh,
            b_ih,
            b_hh,
            input_size,
            hidden_size,
            dtype,
            device: device.clone(),
        })
    }
}

impl<B: Backend> RecurrentCell<B> for GRUCell<B> {
    type State = Tensor<B>;

    fn input_size(&self) -> usize {
        self.input_size
    }

    fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    fn zero_state(&self, batch_size: usize) -> Result<Tensor<B>> {
        Tensor::<B>::zeros((batch_size, self.hidden_size), self.dtype, &self.device)
    }

    fn step(&self, x: &Tensor<B>, h: &Tensor<B>) -> Result<(Tensor<B>, Tensor<B>)> {
        // Input-side and hidden-side gates
        let wih_t = self.w_ih.t()?.contiguous()?;
        let gates_ih = x.matmul(&wih_t)?.add(&self.b_ih)?;

        let whh_t = self.w_hh.t()?.contiguous()?;
        let gates_hh = h.matmul(&whh_t)?.add(&self.b_hh)?;

        // Split each into 3 parts: reset, update, new
        let ih_chunks = gates_ih.chunk(3, 1)?;
        let hh_chunks = gates_hh.chunk(3, 1)?;

        // r = sigmoid(r_ih + r_hh)  — reset gate
        let r = ih_chunks[0].add(&hh_chunks[0])?.sigmoid()?;

        // z = sigmoid(z_ih + z_hh)  — update gate
        let z = ih_chunks[1].add(&hh_chunks[1])?.sigmoid()?;

        // n = tanh(n_ih + r * n_hh)  — new gate (candidate hidden state)
        let n = ih_chunks[2].add(&r.mul(&hh_chunks[2])?)?.tanh()?;

        // h' = (1 - z) * n + z * h
        // (1 - z) = z.affine(-1.0, 1.0)
        let one_minus_z = z.affine(-1.0, 1.0)?;
        let h_new = one_minus_z.mul(&n)?.add(&z.mul(h)?)?;
        Ok((h_new.clone(), h_new))
    }

    fn detach_state(&self, state: &Tensor<B>) -> Tensor<B> {
        state.detach()
    }

    /// Order: `[w_ih, w_hh, b_ih, b_hh]`
    fn parameters(&self) -> Vec<Tensor<B>> {
        vec![
            self.w_ih.clone(),
            self.w_hh.clone(),
            self.b_ih.clone(),
            self.b_hh.clone(),
        ]
    }

    fn reset_parameters(&self) -> Result<()> {
        let k = (1.0 / self.hidden_size as f64).sqrt();
        refill_uniform(&self.w_ih, k)?;
        refill_uniform(&self.w_hh, k)?;
        refill_uniform(&self.b_ih, k)?;
        refill_uniform(&self.b_hh, k)?;
        Ok(())
    }
}

// Recurrence — Unrolls a cell over a sequence

/// Unrolls a [`RecurrentCell`] over the sequence dimension, collecting the
/// hidden state of every timestep into one output tensor via
/// differentiable `cat`.
///
/// Unlike layers that zero their state internally, `Recurrence` always
/// takes the initial state as an argument and hands the final state back.
/// The caller decides whether to thread it into the next call, detach it,
/// or drop it.
///
/// # Shapes
/// - input:  `[batch, seq_len, input_size]`
/// - output: `[batch, seq_len, hidden_size]`
pub struct Recurrence<B: Backend, C: RecurrentCell<B>> {
    cell: C,
    marker: std::marker::PhantomData<B>,
}

impl<B: Backend, C: RecurrentCell<B>> Recurrence<B, C> {
    pub fn new(cell: C) -> Self {
        Recurrence {
            cell,
            marker: std::marker::PhantomData,
        }
    }

    /// Forward pass over the full sequence.
    ///
    /// Returns `(output, final_state)` where `output` stacks the hidden
    /// state of every timestep.
    pub fn forward(&self, x: &Tensor<B>, state: &C::State) -> Result<(Tensor<B>, C::State)> {
        let dims = x.dims();
        if dims.len() != 3 {
            return Err(Error::RankMismatch {
                expected: 3,
                got: dims.len(),
            });
        }
        let batch = dims[0];
        let seq_len = dims[1];

        let mut state = state.clone();
        let mut outputs: Vec<Tensor<B>> = Vec::with_capacity(seq_len);
        for t in 0..seq_len {
            // x_t: [batch, 1, input_size] → [batch, input_size]
            let x_t = x.narrow(1, t, 1)?.reshape((batch, self.cell.input_size()))?;
            let (h, next_state) = self.cell.step(&x_t, &state)?;
            state = next_state;
            // h: [batch, hidden_size] → [batch, 1, hidden_size] for stacking
            outputs.push(h.reshape((batch, 1, self.cell.hidden_size()))?);
        }

        // Stack: [batch, seq_len, hidden_size]
        let output = Tensor::cat(&outputs, 1)?;
        Ok((output, state))
    }

    /// All-zero state for a batch, delegated to the cell.
    pub fn zero_state(&self, batch_size: usize) -> Result<C::State> {
        self.cell.zero_state(batch_size)
    }

    /// Detach a state from its graph, delegated to the cell.
    pub fn detach_state(&self, state: &C::State) -> C::State {
        self.cell.detach_state(state)
    }

    /// Return all trainable parameters.
    pub fn parameters(&self) -> Vec<Tensor<B>> {
        self.cell.parameters()
    }

    /// Access the underlying cell.
    pub fn cell(&self) -> &C {
        &self.cell
    }
}
