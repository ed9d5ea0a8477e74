// Adam — Adaptive Moment Estimation
//
// Keeps an exponential moving average of gradients (first moment, m) and of
// squared gradients (second moment, v), with bias correction for the
// zero-initialized averages:
//
//   m = β₁ * m + (1 - β₁) * g
//   v = β₂ * v + (1 - β₂) * g²
//   m̂ = m / (1 - β₁ᵗ)
//   v̂ = v / (1 - β₂ᵗ)
//   w = w - lr * m̂ / (sqrt(v̂) + ε)
//
// Defaults follow the paper: β₁ = 0.9, β₂ = 0.999, ε = 1e-8.

use rill_core::backend::Backend;
use rill_core::{GradStore, Result, Tensor};

use crate::Optimizer;

/// The Adam optimizer with bias-corrected moment estimates.
pub struct Adam<B: Backend> {
    params: Vec<Tensor<B>>,
    lr: f64,
    beta1: f64,
    beta2: f64,
    eps: f64,
    m: Vec<Vec<f64>>,
    v: Vec<Vec<f64>>,
    step_count: usize,
}

impl<B: Backend> Adam<B> {
    /// Create a new Adam optimizer with the default betas and epsilon.
    pub fn new(params: Vec<Tensor<B>>, lr: f64) -> Self {
        Self::with_config(params, lr, 0.9, 0.999, 1e-8)
    }

    /// Create an Adam optimizer with explicit hyperparameters.
    pub fn with_config(
        params: Vec<Tensor<B>>,
        lr: f64,
        beta1: f64,
        beta2: f64,
        eps: f64,
    ) -> Self {
        let m = params.iter().map(|p| vec![0.0; p.elem_count()]).collect();
        let v = params.iter().map(|p| vec![0.0; p.elem_count()]).collect();
        Adam {
            params,
            lr,
            beta1,
            beta2,
            eps,
            m,
            v,
            step_count: 0,
        }
    }

    /// Number of steps taken so far.
    pub fn step_count(&self) -> usize {
        self.step_count
    }
}

impl<B: Backend> Optimizer<B> for Adam<B> {
    fn step(&mut self, grads: &GradStore<B>) -> Result<Vec<Tensor<B>>> {
        self.step_count += 1;
        let bias1 = 1.0 - self.beta1.powi(self.step_count as i32);
        let bias2 = 1.0 - self.beta2.powi(self.step_count as i32);

        for (idx, param) in self.params.iter().enumerate() {
            let grad = match grads.get(param) {
                Some(g) => g,
                None => continue,
            };
            let w = param.to_f64_vec()?;
            let g = grad.to_f64_vec()?;
            let m = &mut self.m[idx];
            let v = &mut self.v[idx];

            let mut updated = Vec::with_capacity(w.len());
            for (i, (&wi, &gi)) in w.iter().zip(g.iter()).enumerate() {
                m[i] = self.beta1 * m[i] + (1.0 - self.beta1) * gi;
                v[i] = self.beta2 * v[i] + (1.0 - self.beta2) * gi * gi;
                let m_hat = m[i] / bias1;
                let v_hat = v[i] / bias2;
                updated.push(wi - self.lr * m_hat / (v_hat.sqrt() + self.eps));
            }
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

    // The first bias-corrected step moves a parameter by ~lr regardless of
    // the gradient's magnitude.
    #[test]
    fn test_first_step_is_scale_invariant() {
        let dev = CpuDevice::seeded(0);
        let a = Tensor::<CpuBackend>::from_f64_slice(&[1.0], (1,), DType::F64, &dev)
            .unwrap()
            .set_variable();
        let b = Tensor::<CpuBackend>::from_f64_slice(&[1.0], (1,), DType::F64, &dev)
            .unwrap()
            .set_variable();
        let big = Tensor::<CpuBackend>::full((1,), 100.0, DType::F64, &dev).unwrap();
        let small = Tensor::<CpuBackend>::full((1,), 0.001, DType::F64, &dev).unwrap();

        // d(loss)/da = 100, d(loss)/db = 0.001
        let loss = a
            .mul(&big)
            .unwrap()
            .add(&b.mul(&small).unwrap())
            .unwrap()
            .sum_all()
            .unwrap();
        let grads = loss.backward().unwrap();

        let mut optimizer = Adam::new(vec![a.clone(), b.clone()], 0.1);
        optimizer.step(&grads).unwrap();

        assert!((a.to_f64_vec().unwrap()[0] - 0.9).abs() < 1e-3);
        assert!((b.to_f64_vec().unwrap()[0] - 0.9).abs() < 1e-3);
        assert_eq!(optimizer.step_count(), 1);
    }
}
