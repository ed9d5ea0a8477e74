// SGD — Stochastic Gradient Descent
//
// The classic update rule, with optional momentum and L2 weight decay:
//
//   g = grad + weight_decay * w
//   v = momentum * v + g          (momentum buffer, if momentum > 0)
//   w = w - lr * v                (or w - lr * g without momentum)
//
// Momentum buffers are allocated lazily on the first step that produces a
// gradient for a parameter, so parameters that never receive gradients
// cost nothing.

use rill_core::backend::Backend;
use rill_core::{GradStore, Result, Tensor};

use crate::Optimizer;

/// Stochastic gradient descent with optional momentum and weight decay.
pub struct SGD<B: Backend> {
    params: Vec<Tensor<B>>,
    lr: f64,
    momentum: f64,
    weight_decay: f64,
    velocities: Vec<Option<Vec<f64>>>,
}

impl<B: Backend> SGD<B> {
    /// Create a new SGD optimizer.
    ///
    /// - `momentum`: 0.0 disables the momentum buffer
    /// - `weight_decay`: L2 penalty coefficient, 0.0 disables it
    pub fn new(params: Vec<Tensor<B>>, lr: f64, momentum: f64, weight_decay: f64) -> Self {
        let velocities = vec![None; params.len()];
        SGD {
            params,
            lr,
            momentum,
            weight_decay,
            velocities,
        }
    }
}

impl<B: Backend> Optimizer<B> for SGD<B> {
    fn step(&mut self, grads: &GradStore<B>) -> Result<Vec<Tensor<B>>> {
        for (idx, param) in self.params.iter().enumerate() {
            let grad = match grads.get(param) {
                Some(g) => g,
                None => continue,
            };
            let w = param.to_f64_vec()?;
            let g = grad.to_f64_vec()?;

            let mut effective: Vec<f64> = if self.weight_decay != 0.0 {
                w.iter()
                    .zip(g.iter())
                    .map(|(&wi, &gi)| gi + self.weight_decay * wi)
                    .collect()
            } else {
                g
            };

            if self.momentum != 0.0 {
                let velocity = self.velocities[idx].get_or_insert_with(|| vec![0.0; w.len()]);
                for (v, e) in velocity.iter_mut().zip(effective.iter_mut()) {
                    *v = self.momentum * *v + *e;
                    *e = *v;
                }
            }

            let updated: Vec<f64> = w
                .iter()
                .zip(effective.iter())
                .map(|(&wi, &ei)| wi - self.lr * ei)
                .collect();
            param.update_data_inplace(&updated)?;
        }
        Ok(self.params.clone())
    }

    fn params(&self) -> &[Tensor<B>] {
        &self.params
    }

    fn learning_rate(&self) -> f64 {
        self.lr
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.lr = lr;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_core::DType;
    use rill_cpu::{CpuBackend, CpuDevice};

    #[test]
    fn test_step_updates_in_place() {
        let dev = CpuDevice::seeded(0);
        let w = Tensor::<CpuBackend>::from_f64_slice(&[1.0, 2.0], (2,), DType::F64, &dev)
            .unwrap()
            .set_variable();
        let x = Tensor::<CpuBackend>::ones((2,), DType::F64, &dev).unwrap();
        let loss = w.mul(&x).unwrap().sum_all().unwrap();
        let grads = loss.backward().unwrap();

        let mut optimizer = SGD::new(vec![w.clone()], 0.5, 0.0, 0.0);
        let updated = optimizer.step(&grads).unwrap();

        // Same tensor identity, new values: the original handle sees them.
        assert_eq!(updated[0].id(), w.id());
        let v = w.to_f64_vec().unwrap();
        assert!((v[0] - 0.5).abs() < 1e-12);
        assert!((v[1] - 1.5).abs() < 1e-12);
    }
}
