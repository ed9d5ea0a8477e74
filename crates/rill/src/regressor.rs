// SequenceRegressor: recurrent sequence-to-sequence regression
//
// Forward pipeline:
//
//   input [batch, seq_len, input_size]
//     → recurrent cell unrolled over time   [batch, seq_len, hidden_size]
//     → reshape                             [batch*seq_len, hidden_size]
//     → @ W (hidden_size, output_size) + b  [batch*seq_len, output_size]
//     → reshape                             [batch, seq_len, output_size]
//
// Loss: sum of squared errors over every timestep and output dimension,
// divided by batch_size ONLY (see nn::sequence_squared_error).
//
// Training threads the recurrent carry-state from each batch's final state
// into the next batch's initial state, so a long series chunked into
// batches behaves like one long sequence. The carried state is detached
// after every step; backward never reaches into previous batches.

use rill_core::backend::Backend;
use rill_core::{bail, DType, Error, Result, Shape, Tensor};
use rill_nn::init;
use rill_nn::{sequence_squared_error, LSTMCell, Recurrence, RecurrentCell};
use rill_optim::{Adam, Optimizer};

use crate::plot;

/// One plottable batch: input `[batch, seq_len, input_size]`, target
/// `[batch, seq_len, output_size]`, and the x-coordinates of its
/// `batch * seq_len` points in order.
pub type PlotBatch<B> = (Tensor<B>, Tensor<B>, Vec<f64>);

/// A recurrent regression model: cell, affine readout, training loops.
///
/// Generic over the cell; `new()` builds the default LSTM flavor,
/// `with_cell()` accepts any [`RecurrentCell`].
pub struct SequenceRegressor<B: Backend, C: RecurrentCell<B> = LSTMCell<B>> {
    rnn: Recurrence<B, C>,
    weight: Tensor<B>, // [hidden_size, output_size]
    bias: Tensor<B>,   // [1, output_size]
    input_size: usize,
    seq_len: usize,
    hidden_size: usize,
    output_size: usize,
    dtype: DType,
    device: B::Device,
}

impl<B: Backend> SequenceRegressor<B, LSTMCell<B>> {
    /// Build an LSTM-backed regressor. Allocates and initializes every
    /// trainable parameter; runs no data.
    pub fn new(
        input_size: usize,
        seq_len: usize,
        hidden_size: usize,
        output_size: usize,
        dtype: DType,
        device: &B::Device,
    ) -> Result<Self> {
        let cell = LSTMCell::new(input_size, hidden_size, dtype, device)?;
        Self::with_cell(cell, seq_len, output_size, dtype, device)
    }
}

impl<B: Backend, C: RecurrentCell<B>> SequenceRegressor<B, C> {
    /// Build a regressor around an existing cell.
    ///
    /// The readout `W [hidden_size, output_size]` draws from a normal with
    /// std sqrt(2/hidden_size) (variance scaling over the fan-in);
    /// `b` starts at zero.
    pub fn with_cell(
        cell: C,
        seq_len: usize,
        output_size: usize,
        dtype: DType,
        device: &B::Device,
    ) -> Result<Self> {
        let input_size = cell.input_size();
        let hidden_size = cell.hidden_size();
        let std = (2.0 / hidden_size as f64).sqrt();
        let weight = init::normal::<B>((hidden_size, output_size), 0.0, std, dtype, device)?;
        let bias = init::zeros::<B>((1, output_size), dtype, device)?;
        Ok(SequenceRegressor {
            rnn: Recurrence::new(cell),
            weight,
            bias,
            input_size,
            seq_len,
            hidden_size,
            output_size,
            dtype,
            device: device.clone(),
        })
    }

    /// The readout matrix `[hidden_size, output_size]`.
    pub fn weight(&self) -> &Tensor<B> {
        &self.weight
    }

    /// The readout bias `[1, output_size]`.
    pub fn bias(&self) -> &Tensor<B> {
        &self.bias
    }

    /// All trainable parameters: the cell's, then `[W, b]`.
    pub fn parameters(&self) -> Vec<Tensor<B>> {
        let mut params = self.rnn.parameters();
        params.push(self.weight.clone());
        params.push(self.bias.clone());
        params
    }

    /// All-zero carry-state for a batch of the given size.
    pub fn zero_state(&self, batch_size: usize) -> Result<C::State> {
        self.rnn.zero_state(batch_size)
    }

    /// Run the model: unroll the cell from the given state, project every
    /// hidden vector through the readout.
    ///
    /// Returns the predictions `[batch, seq_len, output_size]` and the
    /// final carry-state, still attached to the graph.
    pub fn forward(&self, input: &Tensor<B>, state: &C::State) -> Result<(Tensor<B>, C::State)> {
        let dims = input.dims();
        if dims.len() != 3 {
            return Err(Error::RankMismatch {
                expected: 3,
                got: dims.len(),
            });
        }
        if dims[1] != self.seq_len || dims[2] != self.input_size {
            return Err(Error::ShapeMismatch {
                expected: Shape::from((dims[0], self.seq_len, self.input_size)),
                got: Shape::from(dims),
            });
        }
        let batch = dims[0];

        let (hidden, final_state) = self.rnn.forward(input, state)?;
        let flat = hidden.reshape((batch * self.seq_len, self.hidden_size))?;
        let projected = flat.matmul(&self.weight)?.add(&self.bias)?;
        let output = projected.reshape((batch, self.seq_len, self.output_size))?;
        Ok((output, final_state))
    }

    /// One training step: forward, loss, backward, optimizer update.
    ///
    /// Pure in the carry-state: consumes `state`, returns the loss value
    /// and the next state, already detached from this step's graph.
    pub fn train_step<O: Optimizer<B>>(
        &self,
        optimizer: &mut O,
        input: &Tensor<B>,
        target: &Tensor<B>,
        state: &C::State,
        batch_size: usize,
    ) -> Result<(f64, C::State)> {
        let (pred, next_state) = self.forward(input, state)?;
        if target.dims() != pred.dims() {
            return Err(Error::ShapeMismatch {
                expected: pred.shape().clone(),
                got: target.shape().clone(),
            });
        }
        let loss = sequence_squared_error(&pred, target, batch_size)?;
        let loss_val = loss.to_scalar_f64()?;
        let grads = loss.backward()?;
        optimizer.step(&grads)?;
        Ok((loss_val, self.rnn.detach_state(&next_state)))
    }

    /// One evaluation step: forward and loss only, no backward, no
    /// parameter update. Also hands back the predictions for plotting.
    pub fn eval_step(
        &self,
        input: &Tensor<B>,
        target: &Tensor<B>,
        state: &C::State,
        batch_size: usize,
    ) -> Result<(f64, C::State, Tensor<B>)> {
        let (pred, next_state) = self.forward(input, state)?;
        if target.dims() != pred.dims() {
            return Err(Error::ShapeMismatch {
                expected: pred.shape().clone(),
                got: target.shape().clone(),
            });
        }
        let loss = sequence_squared_error(&pred, target, batch_size)?;
        let loss_val = loss.to_scalar_f64()?;
        Ok((loss_val, self.rnn.detach_state(&next_state), pred))
    }

    /// Redraw every trainable parameter in place: the cell's weights per
    /// its own initialization, the readout per variance scaling, the bias
    /// to zero. Tensor identities survive, so optimizers built over
    /// `parameters()` keep working.
    fn init_parameters(&self) -> Result<()> {
        self.rnn.cell().reset_parameters()?;
        let std = (2.0 / self.hidden_size as f64).sqrt();
        let fresh = Tensor::<B>::randn(self.weight.shape().clone(), self.dtype, &self.device)?
            .affine(std, 0.0)?;
        self.weight.update_data_inplace(&fresh.to_f64_vec()?)?;
        self.bias
            .update_data_inplace(&vec![0.0; self.bias.elem_count()])?;
        Ok(())
    }

    /// Train over `train_data` once, in order.
    ///
    /// Re-initializes all parameters, builds a fresh Adam (lr 1e-3) and
    /// zeros the train carry-state, then threads that state from batch to
    /// batch without ever resetting it: the batches are treated as
    /// consecutive chunks of one long series.
    ///
    /// With `test_data`, every train batch is followed by a full
    /// forward-only pass over the test set, with its own carry-state
    /// re-zeroed per pass; the reported number is the mean of the
    /// per-batch test losses. Progress prints every 20th batch.
    pub fn fit(
        &mut self,
        train_data: &[(Tensor<B>, Tensor<B>)],
        batch_size: usize,
        test_data: Option<&[(Tensor<B>, Tensor<B>)]>,
    ) -> Result<()> {
        if let Some(test) = test_data {
            if test.is_empty() {
                bail!("fit: test_data is present but empty");
            }
        }
        self.init_parameters()?;
        let mut optimizer = Adam::<B>::new(self.parameters(), 1e-3);
        let mut train_state = self.zero_state(batch_size)?;

        for (idx, (input, target)) in train_data.iter().enumerate() {
            let (train_loss, next_state) =
                self.train_step(&mut optimizer, input, target, &train_state, batch_size)?;
            train_state = next_state;

            match test_data {
                None => {
                    if should_report(idx) {
                        println!("train loss: {:.4}", train_loss);
                    }
                }
                Some(test) => {
                    let mut test_state = self.zero_state(batch_size)?;
                    let mut total = 0.0;
                    for (test_input, test_target) in test {
                        let (loss, next, _) =
                            self.eval_step(test_input, test_target, &test_state, batch_size)?;
                        test_state = next;
                        total += loss;
                    }
                    let test_loss = total / test.len() as f64;
                    if should_report(idx) {
                        println!("train loss: {:.4} | test loss: {:.4}", train_loss, test_loss);
                    }
                }
            }
        }
        Ok(())
    }

    /// Train like [`fit`](Self::fit), but pair each train batch with the
    /// test batch at the same index and draw a chart every iteration.
    ///
    /// Both carry-states are zeroed once up front and thread across the
    /// whole run; the test state is never re-zeroed here. The chart shows
    /// the test batch's ground truth (`*`) against its prediction (`+`)
    /// over the train batch's x-coordinates, y-range fixed to
    /// [-1.2, 1.2].
    pub fn fit_plot(
        &mut self,
        train_data: &[PlotBatch<B>],
        batch_size: usize,
        test_data: &[PlotBatch<B>],
    ) -> Result<()> {
        if test_data.len() < train_data.len() {
            bail!(
                "fit_plot: test_data has {} batches, train_data needs {}",
                test_data.len(),
                train_data.len()
            );
        }
        self.init_parameters()?;
        let mut optimizer = Adam::<B>::new(self.parameters(), 1e-3);
        let mut train_state = self.zero_state(batch_size)?;
        let mut test_state = self.zero_state(batch_size)?;

        for (idx, (input, target, xs)) in train_data.iter().enumerate() {
            let (train_loss, next_train) =
                self.train_step(&mut optimizer, input, target, &train_state, batch_size)?;
            train_state = next_train;

            let (test_input, test_target, _) = &test_data[idx];
            let (test_loss, next_test, pred) =
                self.eval_step(test_input, test_target, &test_state, batch_size)?;
            test_state = next_test;

            let truth = test_target.to_f64_vec()?;
            let predicted = pred.to_f64_vec()?;
            println!(
                "{}",
                plot::render(xs, &[truth.as_slice(), predicted.as_slice()], -1.2, 1.2)
            );

            if should_report(idx) {
                println!("train loss: {:.4} | test loss: {:.4}", train_loss, test_loss);
            }
        }
        Ok(())
    }
}

/// Progress lines fire on the first batch and every 20th after it.
fn should_report(idx: usize) -> bool {
    idx % 20 == 0
}
