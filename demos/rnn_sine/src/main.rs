// Sequence Regression: Sine to Cosine
//
// Trains a recurrent regressor to map sin(t) to cos(t) over sliding windows
// of one continuous time axis. The hidden state is carried from batch to
// batch, so the network can exploit the fact that consecutive batches really
// are consecutive in time.
//
// Architecture: LSTM(input=1, hidden=32) → affine readout (32 → 1)
//
// This demo shows:
//   1. Building batched (batch, seq_len, 1) windows from a scalar series
//   2. Training with fit() against a held-out test set
//   3. Inspecting predictions with eval_step()
//   4. Watching convergence live with fit_plot()

use rill::prelude::*;

const SEQ_LEN: usize = 20; // Window length per sample
const BATCH_SIZE: usize = 20; // Windows per batch
const HIDDEN_SIZE: usize = 32; // LSTM hidden dimension
const TRAIN_BATCHES: usize = 120; // Batches for the fit() run
const TEST_BATCHES: usize = 20; // Held-out batches
const PLOT_BATCHES: usize = 40; // Batches for the fit_plot() run
const STEP: f64 = 0.1; // Time-axis spacing

/// Consecutive (input, target, xs) windows of sin(t) -> cos(t), advancing the
/// shared time cursor so every call continues where the last one stopped.
fn wave_batches(
    dev: &CpuDevice,
    n_batches: usize,
    t: &mut usize,
) -> rill::Result<Vec<PlotBatch<CpuBackend>>> {
    let points = BATCH_SIZE * SEQ_LEN;
    let mut batches = Vec::with_capacity(n_batches);
    for _ in 0..n_batches {
        let xs: Vec<f64> = (0..points).map(|i| (*t + i) as f64 * STEP).collect();
        let inputs: Vec<f64> = xs.iter().map(|x| x.sin()).collect();
        let targets: Vec<f64> = xs.iter().map(|x| x.cos()).collect();
        *t += points;

        let input =
            CpuTensor::from_f64_slice(&inputs, (BATCH_SIZE, SEQ_LEN, 1), DType::F64, dev)?;
        let target =
            CpuTensor::from_f64_slice(&targets, (BATCH_SIZE, SEQ_LEN, 1), DType::F64, dev)?;
        batches.push((input, target, xs));
    }
    Ok(batches)
}

fn main() -> rill::Result<()> {
    // Fixed seed so reruns print the same numbers.
    let dev = CpuDevice::seeded(1);
    let dtype = DType::F64;

    println!("=== Rill — Sine to Cosine Sequence Regression ===");
    println!();
    println!(
        "Architecture: LSTM(1→{}) → affine({}→1)",
        HIDDEN_SIZE, HIDDEN_SIZE
    );
    println!(
        "Windows: {} steps, {} per batch, {} train / {} test batches",
        SEQ_LEN, BATCH_SIZE, TRAIN_BATCHES, TEST_BATCHES
    );
    println!();

    // =========================================================================
    // 1. Generate sliding-window data
    // =========================================================================
    //
    // One scalar series sampled at regular intervals; the train and test
    // streams continue the same time axis so the carried state stays valid.

    let mut cursor = 0usize;
    let train: Vec<_> = wave_batches(&dev, TRAIN_BATCHES, &mut cursor)?
        .into_iter()
        .map(|(x, y, _)| (x, y))
        .collect();
    let test: Vec<_> = wave_batches(&dev, TEST_BATCHES, &mut cursor)?
        .into_iter()
        .map(|(x, y, _)| (x, y))
        .collect();

    println!("Input shape:  {:?}", train[0].0.dims());
    println!("Target shape: {:?}", train[0].1.dims());
    println!();

    // =========================================================================
    // 2. Build the model
    // =========================================================================

    let mut model = SequenceRegressor::<CpuBackend>::new(1, SEQ_LEN, HIDDEN_SIZE, 1, dtype, &dev)?;

    let total_params: usize = model.parameters().iter().map(|p| p.elem_count()).sum();
    println!("Model parameters: {}", total_params);
    println!();

    // =========================================================================
    // 3. Train with a held-out test set
    // =========================================================================
    //
    // fit() re-initializes the parameters, then walks the batches once,
    // carrying the hidden state forward. With test data present it reports
    // the mean test loss alongside the train loss every 20 batches.

    println!("Training on {} batches...", TRAIN_BATCHES);
    model.fit(&train, BATCH_SIZE, Some(&test))?;
    println!();

    // =========================================================================
    // 4. Inspect some predictions
    // =========================================================================

    let probe = wave_batches(&dev, 1, &mut cursor)?;
    let (input, target, _) = &probe[0];
    let state = model.zero_state(BATCH_SIZE)?;
    let (loss, _, pred) = model.eval_step(input, target, &state, BATCH_SIZE)?;

    println!("Probe batch loss: {:.4}", loss);
    println!();
    println!("First window, first 5 steps:");
    println!("{:>8}  {:>8}  {:>8}", "True", "Pred", "Error");
    println!("{:>8}  {:>8}  {:>8}", "----", "----", "-----");
    let pred_vals = pred.to_f64_vec()?;
    let true_vals = target.to_f64_vec()?;
    for i in 0..5 {
        let err = (true_vals[i] - pred_vals[i]).abs();
        println!("{:>8.4}  {:>8.4}  {:>8.4}", true_vals[i], pred_vals[i], err);
    }
    println!();

    // =========================================================================
    // 5. Train again, watching the fit happen
    // =========================================================================
    //
    // fit_plot() restarts from fresh parameters and draws an ASCII frame of
    // the paired test batch after every step: truth as '*', prediction as
    // '+'. Early frames are noise, late frames trace the cosine.

    let plot_train = wave_batches(&dev, PLOT_BATCHES, &mut cursor)?;
    let plot_test = wave_batches(&dev, PLOT_BATCHES, &mut cursor)?;

    println!("Training {} batches with live plotting...", PLOT_BATCHES);
    println!();
    model.fit_plot(&plot_train, BATCH_SIZE, &plot_test)?;

    println!();
    println!("Done! The regressor has learned to phase-shift the sine wave.");

    Ok(())
}
