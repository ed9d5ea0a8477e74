// Loss Functions
//
// Loss functions measure the difference between predictions and targets.
// Both return a SCALAR tensor so that backward() works directly.
//
// 1. mse_loss: mean((pred - target)²). The standard regression loss,
//    averaged over every element.
//
// 2. sequence_squared_error: sum((pred - target)²) / batch_size. Per-batch
//    normalization ONLY: the summed error still scales with seq_len and
//    output_size, so values are comparable across batch sizes but not
//    across sequence lengths.

use rill_core::backend::Backend;
use rill_core::bail;
use rill_core::error::Result;
use rill_core::tensor::Tensor;

/// Mean Squared Error loss: mean((prediction - target)²)
///
/// Both prediction and target must have the same shape.
/// Returns a scalar tensor.
///
/// # Example
/// ```ignore
/// let loss = mse_loss(&y_pred, &y_true)?;
/// let grads = loss.backward()?;
/// ```
pub fn mse_loss<B: Backend>(prediction: &Tensor<B>, target: &Tensor<B>) -> Result<Tensor<B>> {
    let diff = prediction.sub(target)?;
    let sq = diff.square()?;
    sq.mean_all()
}

/// Summed squared error normalized by batch size:
/// `sum((prediction - target)²) / batch_size`
///
/// The training loss for sequence regression. Every timestep and output
/// dimension contributes its full squared error; only the batch dimension
/// is divided out. `batch_size` is passed explicitly rather than read from
/// the prediction's shape, so the divisor is always the caller's batch
/// even if a differently shaped prediction slips in.
///
/// Returns a scalar tensor.
pub fn sequence_squared_error<B: Backend>(
    prediction: &Tensor<B>,
    target: &Tensor<B>,
    batch_size: usize,
) -> Result<Tensor<B>> {
    if batch_size == 0 {
        bail!("sequence_squared_error: batch_size must be non-zero");
    }
    let diff = prediction.sub(target)?;
    let sq = diff.square()?;
    sq.sum_all()?.affine(1.0 / batch_size as f64, 0.0)
}
