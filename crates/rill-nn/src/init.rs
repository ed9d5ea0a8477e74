// nn::init — Parameter Initialization Utilities
//
// Standalone functions for creating initialized tensors. Useful when
// building custom cells or when you need fine-grained control over
// initialization.
//
// AVAILABLE INITIALIZERS:
//
//   uniform(shape, low, high)  — U(low, high)
//   normal(shape, mean, std)   — N(mean, std)
//   constant(shape, val)       — all elements = val
//   zeros(shape)               — all zeros
//   ones(shape)                — all ones
//
// All functions return Tensor<B> with `set_variable()` already called,
// making them ready for gradient tracking.

use rill_core::backend::Backend;
use rill_core::dtype::DType;
use rill_core::error::Result;
use rill_core::shape::Shape;
use rill_core::tensor::Tensor;

/// Initialize a tensor from a uniform distribution U(low, high).
pub fn uniform<B: Backend>(
    shape: impl Into<Shape>,
    low: f64,
    high: f64,
    dtype: DType,
    device: &B::Device,
) -> Result<Tensor<B>> {
    let shape = shape.into();
    let range = high - low;
    let t = Tensor::<B>::rand(shape, dtype, device)?
        .affine(range, low)?
        .set_variable();
    Ok(t)
}

/// Initialize a tensor from a normal distribution N(mean, std).
pub fn normal<B: Backend>(
    shape: impl Into<Shape>,
    mean: f64,
    std: f64,
    dtype: DType,
    device: &B::Device,
) -> Result<Tensor<B>> {
    let shape = shape.into();
    let t = Tensor::<B>::randn(shape, dtype, device)?
        .affine(std, mean)?
        .set_variable();
    Ok(t)
}

/// Initialize a tensor with a constant value.
pub fn constant<B: Backend>(
    shape: impl Into<Shape>,
    val: f64,
    dtype: DType,
    device: &B::Device,
) -> Result<Tensor<B>> {
    let t = Tensor::<B>::full(shape, val, dtype, device)?.set_variable();
    Ok(t)
}

/// Initialize a tensor with all zeros (as a variable).
pub fn zeros<B: Backend>(
    shape: impl Into<Shape>,
    dtype: DType,
    device: &B::Device,
) -> Result<Tensor<B>> {
    let t = Tensor::<B>::zeros(shape, dtype, device)?.set_variable();
    Ok(t)
}

/// Initialize a tensor with all ones (as a variable).
pub fn ones<B: Backend>(
    shape: impl Into<Shape>,
    dtype: DType,
    device: &B::Device,
) -> Result<Tensor<B>> {
    let t = Tensor::<B>::ones(shape, dtype, device)?.set_variable();
    Ok(t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_cpu::{CpuBackend, CpuDevice};

    type T = Tensor<CpuBackend>;

    #[test]
    fn test_uniform_range() {
        let dev = CpuDevice::seeded(0);
        let t: T = uniform((1000,), -2.0, 3.0, DType::F64, &dev).unwrap();
        let v = t.to_f64_vec().unwrap();
        for &x in &v {
            assert!(x >= -2.0 - 1e-6 && x <= 3.0 + 1e-6);
        }
    }

    #[test]
    fn test_normal_stats() {
        let dev = CpuDevice::seeded(0);
        let t: T = normal((10000,), 5.0, 0.1, DType::F64, &dev).unwrap();
        let v = t.to_f64_vec().unwrap();
        let mean: f64 = v.iter().sum::<f64>() / v.len() as f64;
        assert!((mean - 5.0).abs() < 0.05, "mean {} too far from 5.0", mean);
    }

    #[test]
    fn test_constant_values() {
        let dev = CpuDevice::seeded(0);
        let t: T = constant((3, 4), 7.0, DType::F64, &dev).unwrap();
        let v = t.to_f64_vec().unwrap();
        for &x in &v {
            assert!((x - 7.0).abs() < 1e-10);
        }
    }

    #[test]
    fn test_zeros_is_variable() {
        let dev = CpuDevice::seeded(0);
        let t: T = zeros(5, DType::F64, &dev).unwrap();
        assert!(t.is_variable());
        let v = t.to_f64_vec().unwrap();
        for &x in &v {
            assert!(x.abs() < 1e-10);
        }
    }

    #[test]
    fn test_ones_values() {
        let dev = CpuDevice::seeded(0);
        let t: T = ones((2, 3), DType::F64, &dev).unwrap();
        let v = t.to_f64_vec().unwrap();
        for &x in &v {
            assert!((x - 1.0).abs() < 1e-10);
        }
    }
}
