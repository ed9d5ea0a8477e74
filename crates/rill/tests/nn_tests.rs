// Integration tests for rill-nn and rill-optim
//
// Verifies the recurrent cells, the Recurrence unroller, loss functions,
// and optimizers working together on the CPU backend.

use rill::prelude::*;

fn approx_eq(a: f64, b: f64, tol: f64) -> bool {
    (a - b).abs() < tol
}

fn assert_vec_approx(got: &[f64], expected: &[f64], tol: f64) {
    assert_eq!(
        got.len(),
        expected.len(),
        "length mismatch: {} vs {}",
        got.len(),
        expected.len()
    );
    for (i, (g, e)) in got.iter().zip(expected.iter()).enumerate() {
        assert!(
            approx_eq(*g, *e, tol),
            "index {}: got {} expected {} (tol {})",
            i,
            g,
            e,
            tol
        );
    }
}

// Cell shape tests

#[test]
fn test_rnn_cell_shapes() -> rill::Result<()> {
    let dev = CpuDevice::seeded(0);
    let cell = RNNCell::<CpuBackend>::new(3, 5, DType::F64, &dev)?;
    assert_eq!(cell.input_size(), 3);
    assert_eq!(cell.hidden_size(), 5);
    assert_eq!(cell.parameters().len(), 4);

    let h0 = cell.zero_state(2)?;
    assert_eq!(h0.dims(), &[2, 5]);

    let x = CpuTensor::rand((2, 3), DType::F64, &dev)?;
    let (out, h1) = cell.step(&x, &h0)?;
    assert_eq!(out.dims(), &[2, 5]);
    assert_eq!(h1.dims(), &[2, 5]);
    Ok(())
}

#[test]
fn test_lstm_cell_shapes() -> rill::Result<()> {
    let dev = CpuDevice::seeded(0);
    let cell = LSTMCell::<CpuBackend>::new(3, 5, DType::F64, &dev)?;
    assert_eq!(cell.parameters().len(), 4);

    let state = cell.zero_state(2)?;
    assert_eq!(state.h.dims(), &[2, 5]);
    assert_eq!(state.c.dims(), &[2, 5]);

    let x = CpuTensor::rand((2, 3), DType::F64, &dev)?;
    let (out, next) = cell.step(&x, &state)?;
    assert_eq!(out.dims(), &[2, 5]);
    assert_eq!(next.h.dims(), &[2, 5]);
    assert_eq!(next.c.dims(), &[2, 5]);
    Ok(())
}

#[test]
fn test_gru_cell_shapes() -> rill::Result<()> {
    let dev = CpuDevice::seeded(0);
    let cell = GRUCell::<CpuBackend>::new(3, 5, DType::F64, &dev)?;
    assert_eq!(cell.parameters().len(), 4);

    let h0 = cell.zero_state(4)?;
    let x = CpuTensor::rand((4, 3), DType::F64, &dev)?;
    let (out, h1) = cell.step(&x, &h0)?;
    assert_eq!(out.dims(), &[4, 5]);
    assert_eq!(h1.dims(), &[4, 5]);
    Ok(())
}

// Hand-computed cell math
//
// Each test pins every weight to a known constant via the parameter list
// (order [w_ih, w_hh, b_ih, b_hh]) and checks one step against the update
// equations evaluated in plain f64.

#[test]
fn test_rnn_cell_hand_computed() -> rill::Result<()> {
    let dev = CpuDevice::seeded(0);
    let cell = RNNCell::<CpuBackend>::new(1, 1, DType::F64, &dev)?;
    let params = cell.parameters();
    params[0].update_data_inplace(&[0.5])?; // w_ih
    params[1].update_data_inplace(&[0.25])?; // w_hh
    params[2].update_data_inplace(&[0.1])?; // b_ih
    params[3].update_data_inplace(&[0.1])?; // b_hh

    let x = CpuTensor::from_f64_slice(&[0.3], (1, 1), DType::F64, &dev)?;
    let h = CpuTensor::from_f64_slice(&[0.2], (1, 1), DType::F64, &dev)?;
    let (out, _) = cell.step(&x, &h)?;

    // h' = tanh(0.3*0.5 + 0.1 + 0.2*0.25 + 0.1) = tanh(0.4)
    let expected = 0.4f64.tanh();
    assert!(approx_eq(out.to_scalar_f64()?, expected, 1e-12));
    Ok(())
}

#[test]
fn test_lstm_cell_hand_computed() -> rill::Result<()> {
    let dev = CpuDevice::seeded(0);
    let cell = LSTMCell::<CpuBackend>::new(1, 1, DType::F64, &dev)?;
    let params = cell.parameters();
    params[0].update_data_inplace(&[0.5; 4])?; // w_ih
    params[1].update_data_inplace(&[0.25; 4])?; // w_hh
    params[2].update_data_inplace(&[0.1; 4])?; // b_ih
    params[3].update_data_inplace(&[0.1; 4])?; // b_hh

    let state = LstmState {
        h: CpuTensor::from_f64_slice(&[0.2], (1, 1), DType::F64, &dev)?,
        c: CpuTensor::from_f64_slice(&[0.1], (1, 1), DType::F64, &dev)?,
    };
    let x = CpuTensor::from_f64_slice(&[0.3], (1, 1), DType::F64, &dev)?;
    let (out, next) = cell.step(&x, &state)?;

    // Every gate pre-activation: 0.3*0.5 + 0.1 + 0.2*0.25 + 0.1 = 0.4
    let s = 1.0 / (1.0 + (-0.4f64).exp());
    let g = 0.4f64.tanh();
    let c_new = s * 0.1 + s * g;
    let h_new = s * c_new.tanh();

    assert!(approx_eq(next.c.to_scalar_f64()?, c_new, 1e-12));
    assert!(approx_eq(next.h.to_scalar_f64()?, h_new, 1e-12));
    assert!(approx_eq(out.to_scalar_f64()?, h_new, 1e-12));
    Ok(())
}

#[test]
fn test_gru_cell_hand_computed() -> rill::Result<()> {
    let dev = CpuDevice::seeded(0);
    let cell = GRUCell::<CpuBackend>::new(1, 1, DType::F64, &dev)?;
    let params = cell.parameters();
    params[0].update_data_inplace(&[0.5; 3])?; // w_ih
    params[1].update_data_inplace(&[0.25; 3])?; // w_hh
    params[2].update_data_inplace(&[0.1; 3])?; // b_ih
    params[3].update_data_inplace(&[0.2; 3])?; // b_hh

    let x = CpuTensor::from_f64_slice(&[0.3], (1, 1), DType::F64, &dev)?;
    let h = CpuTensor::from_f64_slice(&[0.4], (1, 1), DType::F64, &dev)?;
    let (out, _) = cell.step(&x, &h)?;

    // ih side: 0.3*0.5 + 0.1 = 0.25; hh side: 0.4*0.25 + 0.2 = 0.3
    let r = 1.0 / (1.0 + (-0.55f64).exp());
    let z = 1.0 / (1.0 + (-0.55f64).exp());
    let n = (0.25 + r * 0.3f64).tanh();
    let expected = (1.0 - z) * n + z * 0.4;
    assert!(approx_eq(out.to_scalar_f64()?, expected, 1e-12));
    Ok(())
}

// Recurrence unroller

#[test]
fn test_recurrence_shapes_for_all_cells() -> rill::Result<()> {
    let dev = CpuDevice::seeded(1);
    let x = CpuTensor::rand((2, 4, 3), DType::F64, &dev)?;

    let rnn = Recurrence::new(RNNCell::<CpuBackend>::new(3, 5, DType::F64, &dev)?);
    let (out, _) = rnn.forward(&x, &rnn.zero_state(2)?)?;
    assert_eq!(out.dims(), &[2, 4, 5]);

    let lstm = Recurrence::new(LSTMCell::<CpuBackend>::new(3, 5, DType::F64, &dev)?);
    let (out, _) = lstm.forward(&x, &lstm.zero_state(2)?)?;
    assert_eq!(out.dims(), &[2, 4, 5]);

    let gru = Recurrence::new(GRUCell::<CpuBackend>::new(3, 5, DType::F64, &dev)?);
    let (out, _) = gru.forward(&x, &gru.zero_state(2)?)?;
    assert_eq!(out.dims(), &[2, 4, 5]);
    Ok(())
}

#[test]
fn test_recurrence_last_step_equals_final_state() -> rill::Result<()> {
    let dev = CpuDevice::seeded(2);
    let rec = Recurrence::new(RNNCell::<CpuBackend>::new(3, 5, DType::F64, &dev)?);
    let x = CpuTensor::rand((2, 4, 3), DType::F64, &dev)?;

    let (out, final_h) = rec.forward(&x, &rec.zero_state(2)?)?;
    let last = out.narrow(1, 3, 1)?.reshape((2, 5))?;
    assert_vec_approx(&last.to_f64_vec()?, &final_h.to_f64_vec()?, 1e-12);
    Ok(())
}

#[test]
fn test_recurrence_rejects_non_sequence_input() -> rill::Result<()> {
    let dev = CpuDevice::seeded(0);
    let rec = Recurrence::new(RNNCell::<CpuBackend>::new(3, 5, DType::F64, &dev)?);
    let x = CpuTensor::rand((2, 3), DType::F64, &dev)?;
    assert!(rec.forward(&x, &rec.zero_state(2)?).is_err());
    Ok(())
}

#[test]
fn test_reset_parameters_redraws_in_place() -> rill::Result<()> {
    let dev = CpuDevice::seeded(3);
    let cell = RNNCell::<CpuBackend>::new(3, 5, DType::F64, &dev)?;
    let params = cell.parameters();
    let before = params[0].to_f64_vec()?;
    let id_before = params[0].id();

    cell.reset_parameters()?;
    assert_ne!(params[0].to_f64_vec()?, before);
    assert_eq!(params[0].id(), id_before);
    Ok(())
}

// Loss functions

#[test]
fn test_mse_loss() -> rill::Result<()> {
    let dev = CpuDevice::seeded(0);
    let pred = CpuTensor::from_f64_slice(&[1.0, 2.0, 3.0], 3, DType::F64, &dev)?;
    let target = CpuTensor::from_f64_slice(&[1.5, 2.0, 2.0], 3, DType::F64, &dev)?;
    let loss = mse_loss(&pred, &target)?;
    // (0.25 + 0 + 1) / 3
    assert!(approx_eq(loss.to_scalar_f64()?, 1.25 / 3.0, 1e-12));
    Ok(())
}

#[test]
fn test_sequence_squared_error_normalizes_by_batch_only() -> rill::Result<()> {
    let dev = CpuDevice::seeded(0);
    // batch 2, seq 3, out 1: six unit errors
    let pred = CpuTensor::ones((2, 3, 1), DType::F64, &dev)?;
    let target = CpuTensor::zeros((2, 3, 1), DType::F64, &dev)?;

    let loss = sequence_squared_error(&pred, &target, 2)?;
    // sum = 6, divided by batch_size 2, NOT by 2*3
    assert!(approx_eq(loss.to_scalar_f64()?, 3.0, 1e-12));

    // mse divides by every element instead
    let mse = mse_loss(&pred, &target)?;
    assert!(approx_eq(mse.to_scalar_f64()?, 1.0, 1e-12));

    assert!(sequence_squared_error(&pred, &target, 0).is_err());
    Ok(())
}

#[test]
fn test_sequence_squared_error_backward() -> rill::Result<()> {
    let dev = CpuDevice::seeded(0);
    let pred =
        CpuTensor::from_f64_slice(&[1.0, -1.0, 2.0, 0.0], (2, 2, 1), DType::F64, &dev)?
            .set_variable();
    let target = CpuTensor::zeros((2, 2, 1), DType::F64, &dev)?;

    let loss = sequence_squared_error(&pred, &target, 2)?;
    let grads = loss.backward()?;
    // d/dp of sum((p-t)²)/batch = 2*(p-t)/batch
    assert_vec_approx(
        &grads.get(&pred).unwrap().to_f64_vec()?,
        &[1.0, -1.0, 2.0, 0.0],
        1e-12,
    );
    Ok(())
}

// SGD optimizer

#[test]
fn test_sgd_step() -> rill::Result<()> {
    let dev = CpuDevice::seeded(0);
    let w = CpuTensor::from_f64_slice(&[1.0, 2.0], 2, DType::F64, &dev)?.set_variable();
    let x = CpuTensor::from_f64_slice(&[1.0, 1.0], 2, DType::F64, &dev)?;

    let loss = w.mul(&x)?.sum_all()?;
    let grads = loss.backward()?;

    let mut optimizer = SGD::<CpuBackend>::new(vec![w.clone()], 0.1, 0.0, 0.0);
    let new_params = optimizer.step(&grads)?;

    // w_new = w - lr * grad = [1-0.1, 2-0.1] = [0.9, 1.9]
    assert_vec_approx(&new_params[0].to_f64_vec()?, &[0.9, 1.9], 1e-10);
    // the update lands in the original tensor, not a replacement
    assert_vec_approx(&w.to_f64_vec()?, &[0.9, 1.9], 1e-10);
    Ok(())
}

#[test]
fn test_sgd_momentum() -> rill::Result<()> {
    let dev = CpuDevice::seeded(0);
    let w = CpuTensor::from_f64_slice(&[1.0], (), DType::F64, &dev)?.set_variable();
    let x = CpuTensor::ones((), DType::F64, &dev)?;

    let mut optimizer = SGD::<CpuBackend>::new(vec![w.clone()], 0.1, 0.9, 0.0);

    // Step 1: v = 0.9*0 + 1.0 = 1.0, w = 1.0 - 0.1*1.0 = 0.9
    let loss = optimizer.params()[0].mul(&x)?.sum_all()?;
    let grads = loss.backward()?;
    optimizer.step(&grads)?;
    assert!(approx_eq(
        optimizer.params()[0].to_scalar_f64()?,
        0.9,
        1e-10
    ));

    // Step 2: v = 0.9*1.0 + 1.0 = 1.9, w = 0.9 - 0.1*1.9 = 0.71
    let loss = optimizer.params()[0].mul(&x)?.sum_all()?;
    let grads = loss.backward()?;
    optimizer.step(&grads)?;
    assert!(approx_eq(
        optimizer.params()[0].to_scalar_f64()?,
        0.71,
        1e-10
    ));
    Ok(())
}

#[test]
fn test_sgd_weight_decay() -> rill::Result<()> {
    let dev = CpuDevice::seeded(0);
    let w = CpuTensor::from_f64_slice(&[1.0], (), DType::F64, &dev)?.set_variable();
    let x = CpuTensor::ones((), DType::F64, &dev)?;

    let mut optimizer = SGD::<CpuBackend>::new(vec![w.clone()], 0.1, 0.0, 0.5);
    let loss = w.mul(&x)?.sum_all()?;
    let grads = loss.backward()?;
    optimizer.step(&grads)?;

    // effective grad = 1.0 + 0.5*1.0 = 1.5, w = 1.0 - 0.1*1.5 = 0.85
    assert!(approx_eq(w.to_scalar_f64()?, 0.85, 1e-10));
    Ok(())
}

// Adam optimizer

#[test]
fn test_adam_first_step() -> rill::Result<()> {
    let dev = CpuDevice::seeded(0);
    let w = CpuTensor::from_f64_slice(&[1.0], (), DType::F64, &dev)?.set_variable();
    let x = CpuTensor::ones((), DType::F64, &dev)?;

    let mut optimizer = Adam::<CpuBackend>::new(vec![w.clone()], 0.1);
    let loss = w.mul(&x)?.sum_all()?;
    let grads = loss.backward()?;
    optimizer.step(&grads)?;

    // Bias correction makes the first step w - lr * g/|g| (up to eps).
    assert!(approx_eq(w.to_scalar_f64()?, 0.9, 1e-6));
    assert_eq!(optimizer.step_count(), 1);
    Ok(())
}

#[test]
fn test_adam_converges_on_quadratic() -> rill::Result<()> {
    let dev = CpuDevice::seeded(0);
    let w = CpuTensor::from_f64_slice(&[5.0], (), DType::F64, &dev)?.set_variable();

    let mut optimizer = Adam::<CpuBackend>::new(vec![w.clone()], 0.1);
    let mut last_loss = f64::MAX;
    for _ in 0..200 {
        // loss = (w - 2)²
        let loss = w.affine(1.0, -2.0)?.square()?.sum_all()?;
        last_loss = loss.to_scalar_f64()?;
        let grads = loss.backward()?;
        optimizer.step(&grads)?;
    }
    assert!(last_loss < 0.05, "loss did not converge: {}", last_loss);
    Ok(())
}

#[test]
fn test_optimizer_skips_params_without_grads() -> rill::Result<()> {
    let dev = CpuDevice::seeded(0);
    let used = CpuTensor::from_f64_slice(&[1.0], (), DType::F64, &dev)?.set_variable();
    let unused = CpuTensor::from_f64_slice(&[7.0], (), DType::F64, &dev)?.set_variable();
    let x = CpuTensor::ones((), DType::F64, &dev)?;

    let mut optimizer = Adam::<CpuBackend>::new(vec![used.clone(), unused.clone()], 0.1);
    let loss = used.mul(&x)?.sum_all()?;
    let grads = loss.backward()?;
    optimizer.step(&grads)?;

    assert!(used.to_scalar_f64()? < 1.0);
    assert!(approx_eq(unused.to_scalar_f64()?, 7.0, 1e-12));
    Ok(())
}

#[test]
fn test_learning_rate_is_adjustable() -> rill::Result<()> {
    let dev = CpuDevice::seeded(0);
    let w = CpuTensor::from_f64_slice(&[1.0], (), DType::F64, &dev)?.set_variable();
    let mut optimizer = SGD::<CpuBackend>::new(vec![w], 0.1, 0.0, 0.0);
    assert!(approx_eq(optimizer.learning_rate(), 0.1, 1e-15));
    optimizer.set_learning_rate(0.5);
    assert!(approx_eq(optimizer.learning_rate(), 0.5, 1e-15));
    Ok(())
}
