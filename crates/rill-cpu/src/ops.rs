// Backend implementation for CpuBackend.
//
// Every kernel receives storage plus a Layout and must honor strides and
// offset, so transposed or narrowed views work without being copied first.
// Broadcasting in binary ops is done with stride-0 tricks: a dimension of
// size 1 (or a missing leading dimension) gets stride 0 on that side, so
// walking the output shape re-reads the same element.

use num_traits::Float;
use rand::Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;

use rill_core::backend::{Backend, BinaryOp, ReduceOp, UnaryOp};
use rill_core::{DType, Error, Layout, Result, Shape, WithDType};

use crate::{CpuBackend, CpuDevice, CpuStorage};

impl Backend for CpuBackend {
    type Device = CpuDevice;
    type Storage = CpuStorage;

    fn zeros(shape: &Shape, dtype: DType, _device: &CpuDevice) -> Result<CpuStorage> {
        let count = shape.elem_count();
        Ok(match dtype {
            DType::F32 => CpuStorage::F32(vec![0.0; count]),
            DType::F64 => CpuStorage::F64(vec![0.0; count]),
        })
    }

    fn ones(shape: &Shape, dtype: DType, _device: &CpuDevice) -> Result<CpuStorage> {
        let count = shape.elem_count();
        Ok(match dtype {
            DType::F32 => CpuStorage::F32(vec![1.0; count]),
            DType::F64 => CpuStorage::F64(vec![1.0; count]),
        })
    }

    fn full(shape: &Shape, val: f64, dtype: DType, _device: &CpuDevice) -> Result<CpuStorage> {
        let count = shape.elem_count();
        Ok(match dtype {
            DType::F32 => CpuStorage::F32(vec![val as f32; count]),
            DType::F64 => CpuStorage::F64(vec![val; count]),
        })
    }

    fn from_f64_slice(data: &[f64], dtype: DType, _device: &CpuDevice) -> Result<CpuStorage> {
        Ok(match dtype {
            DType::F32 => CpuStorage::F32(data.iter().map(|&v| v as f32).collect()),
            DType::F64 => CpuStorage::F64(data.to_vec()),
        })
    }

    fn rand_uniform(shape: &Shape, dtype: DType, device: &CpuDevice) -> Result<CpuStorage> {
        let count = shape.elem_count();
        let mut rng = device.rng.lock().expect("rng lock poisoned");
        Ok(match dtype {
            DType::F32 => CpuStorage::F32((0..count).map(|_| rng.gen::<f32>()).collect()),
            DType::F64 => CpuStorage::F64((0..count).map(|_| rng.gen::<f64>()).collect()),
        })
    }

    fn rand_normal(shape: &Shape, dtype: DType, device: &CpuDevice) -> Result<CpuStorage> {
        let count = shape.elem_count();
        let mut rng = device.rng.lock().expect("rng lock poisoned");
        Ok(match dtype {
            DType::F32 => CpuStorage::F32(
                (0..count)
                    .map(|_| rng.sample::<f32, _>(StandardNormal))
                    .collect(),
            ),
            DType::F64 => CpuStorage::F64(
                (0..count)
                    .map(|_| rng.sample::<f64, _>(StandardNormal))
                    .collect(),
            ),
        })
    }

    fn binary_op(
        op: BinaryOp,
        lhs: &CpuStorage,
        lhs_layout: &Layout,
        rhs: &CpuStorage,
        rhs_layout: &Layout,
    ) -> Result<CpuStorage> {
        match (lhs, rhs) {
            (CpuStorage::F32(a), CpuStorage::F32(b)) => Ok(CpuStorage::F32(binary_map(
                op, a, lhs_layout, b, rhs_layout,
            )?)),
            (CpuStorage::F64(a), CpuStorage::F64(b)) => Ok(CpuStorage::F64(binary_map(
                op, a, lhs_layout, b, rhs_layout,
            )?)),
            _ => Err(dtype_mismatch(lhs, rhs)),
        }
    }

    fn unary_op(op: UnaryOp, input: &CpuStorage, layout: &Layout) -> Result<CpuStorage> {
        Ok(match input {
            CpuStorage::F32(v) => CpuStorage::F32(unary_map(op, v, layout)),
            CpuStorage::F64(v) => CpuStorage::F64(unary_map(op, v, layout)),
        })
    }

    fn affine(input: &CpuStorage, layout: &Layout, mul: f64, add: f64) -> Result<CpuStorage> {
        Ok(match input {
            CpuStorage::F32(v) => CpuStorage::F32(affine_map(v, layout, mul, add)),
            CpuStorage::F64(v) => CpuStorage::F64(affine_map(v, layout, mul, add)),
        })
    }

    fn reduce_op(
        op: ReduceOp,
        input: &CpuStorage,
        layout: &Layout,
        dims: &[usize],
        _keep_dim: bool,
    ) -> Result<CpuStorage> {
        // keep_dim only changes the logical shape of the result; the flat
        // element order is identical either way, so it is handled above us.
        Ok(match input {
            CpuStorage::F32(v) => CpuStorage::F32(reduce_map(op, v, layout, dims)),
            CpuStorage::F64(v) => CpuStorage::F64(reduce_map(op, v, layout, dims)),
        })
    }

    fn matmul(
        lhs: &CpuStorage,
        lhs_layout: &Layout,
        rhs: &CpuStorage,
        rhs_layout: &Layout,
    ) -> Result<CpuStorage> {
        match (lhs, rhs) {
            (CpuStorage::F32(a), CpuStorage::F32(b)) => Ok(CpuStorage::F32(matmul_map(
                a, lhs_layout, b, rhs_layout,
            )?)),
            (CpuStorage::F64(a), CpuStorage::F64(b)) => Ok(CpuStorage::F64(matmul_map(
                a, lhs_layout, b, rhs_layout,
            )?)),
            _ => Err(dtype_mismatch(lhs, rhs)),
        }
    }

    fn to_contiguous(input: &CpuStorage, layout: &Layout) -> Result<CpuStorage> {
        Ok(match input {
            CpuStorage::F32(v) => CpuStorage::F32(gather(v, layout)),
            CpuStorage::F64(v) => CpuStorage::F64(gather(v, layout)),
        })
    }

    fn to_f64_vec(input: &CpuStorage, layout: &Layout) -> Result<Vec<f64>> {
        Ok(match input {
            CpuStorage::F32(v) => layout.strided_indices().map(|i| v[i] as f64).collect(),
            CpuStorage::F64(v) => layout.strided_indices().map(|i| v[i]).collect(),
        })
    }

    fn cat(
        inputs: &[(&CpuStorage, &Layout)],
        out_shape: &Shape,
        dim: usize,
    ) -> Result<CpuStorage> {
        let first = match inputs.first() {
            Some((storage, _)) => storage,
            None => return Err(Error::msg("cat: no inputs")),
        };
        let total = out_shape.elem_count();
        let out_strides = out_shape.stride_contiguous();
        match first {
            CpuStorage::F32(_) => {
                let mut out = vec![0f32; total];
                let mut offset = 0usize;
                for (storage, layout) in inputs {
                    let data = match storage {
                        CpuStorage::F32(v) => v.as_slice(),
                        other => return Err(dtype_mismatch(first, other)),
                    };
                    cat_into(&mut out, &out_strides, data, layout, dim, offset);
                    offset += layout.dims()[dim];
                }
                Ok(CpuStorage::F32(out))
            }
            CpuStorage::F64(_) => {
                let mut out = vec![0f64; total];
                let mut offset = 0usize;
                for (storage, layout) in inputs {
                    let data = match storage {
                        CpuStorage::F64(v) => v.as_slice(),
                        other => return Err(dtype_mismatch(first, other)),
                    };
                    cat_into(&mut out, &out_strides, data, layout, dim, offset);
                    offset += layout.dims()[dim];
                }
                Ok(CpuStorage::F64(out))
            }
        }
    }
}

fn dtype_mismatch(lhs: &CpuStorage, rhs: &CpuStorage) -> Error {
    use rill_core::backend::BackendStorage;
    Error::DTypeMismatch {
        expected: lhs.dtype(),
        got: rhs.dtype(),
    }
}

//  Generic kernels

/// Copy the elements selected by `layout` into a fresh contiguous vec,
/// in logical (row-major) order.
fn gather<T: Copy>(data: &[T], layout: &Layout) -> Vec<T> {
    layout.strided_indices().map(|i| data[i]).collect()
}

/// Per-dimension storage strides of one operand relative to the broadcast
/// output dims. Broadcast dimensions (size 1 against a larger output, or
/// missing leading dims) get stride 0.
fn broadcast_strides(layout: &Layout, out_dims: &[usize]) -> Vec<usize> {
    let side_dims = layout.dims();
    let side_strides = layout.strides();
    let offset = out_dims.len() - side_dims.len();
    let mut strides = vec![0usize; out_dims.len()];
    for (i, (&d, &s)) in side_dims.iter().zip(side_strides.iter()).enumerate() {
        strides[offset + i] = if d == 1 && out_dims[offset + i] != 1 {
            0
        } else {
            s
        };
    }
    strides
}

fn binary_map<T: WithDType + Float>(
    op: BinaryOp,
    lhs: &[T],
    lhs_layout: &Layout,
    rhs: &[T],
    rhs_layout: &Layout,
) -> Result<Vec<T>> {
    let out_shape = lhs_layout.shape().broadcast_shape(rhs_layout.shape())?;
    let out_dims = out_shape.dims().to_vec();
    let out_strides = out_shape.stride_contiguous();
    let lhs_bs = broadcast_strides(lhs_layout, &out_dims);
    let rhs_bs = broadcast_strides(rhs_layout, &out_dims);

    let total = out_shape.elem_count();
    let mut out = Vec::with_capacity(total);
    for flat in 0..total {
        let mut remainder = flat;
        let mut li = lhs_layout.offset();
        let mut ri = rhs_layout.offset();
        for d in 0..out_dims.len() {
            let coord = remainder / out_strides[d];
            remainder %= out_strides[d];
            li += coord * lhs_bs[d];
            ri += coord * rhs_bs[d];
        }
        let (a, b) = (lhs[li], rhs[ri]);
        out.push(match op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
        });
    }
    Ok(out)
}

fn unary_map<T: WithDType + Float>(op: UnaryOp, data: &[T], layout: &Layout) -> Vec<T> {
    let one = T::from_f64(1.0);
    layout
        .strided_indices()
        .map(|i| {
            let x = data[i];
            match op {
                UnaryOp::Neg => -x,
                UnaryOp::Tanh => x.tanh(),
                UnaryOp::Sigmoid => one / (one + (-x).exp()),
                UnaryOp::Square => x * x,
            }
        })
        .collect()
}

fn affine_map<T: WithDType + Float>(data: &[T], layout: &Layout, mul: f64, add: f64) -> Vec<T> {
    let m = T::from_f64(mul);
    let a = T::from_f64(add);
    layout.strided_indices().map(|i| data[i] * m + a).collect()
}

fn reduce_map<T: WithDType + Float>(
    op: ReduceOp,
    data: &[T],
    layout: &Layout,
    dims: &[usize],
) -> Vec<T> {
    // Full reduction to a single value.
    if dims.is_empty() {
        let sum: f64 = layout.strided_indices().map(|i| data[i].to_f64()).sum();
        let value = match op {
            ReduceOp::Sum => sum,
            ReduceOp::Mean => sum / layout.elem_count() as f64,
        };
        return vec![T::from_f64(value)];
    }

    // Reduction along specific dims: walk the input in logical order and
    // accumulate into the output position with the reduced coords dropped.
    let in_dims = layout.dims().to_vec();
    let in_strides = layout.shape().stride_contiguous();
    let out_dims: Vec<usize> = in_dims
        .iter()
        .enumerate()
        .filter(|(i, _)| !dims.contains(i))
        .map(|(_, &d)| d)
        .collect();
    let out_shape = Shape::new(out_dims);
    let out_strides = out_shape.stride_contiguous();

    let mut acc = vec![0f64; out_shape.elem_count()];
    for (logical, src) in layout.strided_indices().enumerate() {
        let mut remainder = logical;
        let mut out_flat = 0usize;
        let mut oi = 0usize;
        for (d, &stride) in in_strides.iter().enumerate() {
            let coord = remainder / stride;
            remainder %= stride;
            if !dims.contains(&d) {
                out_flat += coord * out_strides[oi];
                oi += 1;
            }
        }
        acc[out_flat] += data[src].to_f64();
    }

    if op == ReduceOp::Mean {
        let n: f64 = dims.iter().map(|&d| in_dims[d] as f64).product();
        for v in acc.iter_mut() {
            *v /= n;
        }
    }
    acc.into_iter().map(T::from_f64).collect()
}

fn matmul_map<T: WithDType + Float>(
    lhs: &[T],
    lhs_layout: &Layout,
    rhs: &[T],
    rhs_layout: &Layout,
) -> Result<Vec<T>> {
    let lhs_dims = lhs_layout.dims();
    let rhs_dims = rhs_layout.dims();
    let lrank = lhs_dims.len();
    let rrank = rhs_dims.len();
    let m = lhs_dims[lrank - 2];
    let k = lhs_dims[lrank - 1];
    let n = rhs_dims[rrank - 1];
    let lhs_batch: usize = lhs_dims[..lrank - 2].iter().product();
    let rhs_batch: usize = rhs_dims[..rrank - 2].iter().product();
    if rhs_batch != lhs_batch && rhs_batch != 1 {
        return Err(Error::msg(format!(
            "matmul: batch dims do not line up ({} vs {})",
            lhs_batch, rhs_batch
        )));
    }

    // Materialize both operands in logical order, then run a cache-friendly
    // i-k-j product with rayon parallelism over output rows.
    let a = gather(lhs, lhs_layout);
    let b = gather(rhs, rhs_layout);
    let mut out = vec![T::from_f64(0.0); lhs_batch * m * n];
    out.par_chunks_mut(n).enumerate().for_each(|(row, out_row)| {
        let batch = row / m;
        let i = row % m;
        let a_row = &a[batch * m * k + i * k..][..k];
        let b_offset = if rhs_batch == 1 { 0 } else { batch * k * n };
        let b_mat = &b[b_offset..][..k * n];
        for (kk, &a_val) in a_row.iter().enumerate() {
            let b_row = &b_mat[kk * n..][..n];
            for (o, &b_val) in out_row.iter_mut().zip(b_row.iter()) {
                *o = *o + a_val * b_val;
            }
        }
    });
    Ok(out)
}

fn cat_into<T: Copy>(
    out: &mut [T],
    out_strides: &[usize],
    data: &[T],
    layout: &Layout,
    dim: usize,
    dim_offset: usize,
) {
    let in_strides = layout.shape().stride_contiguous();
    for (logical, src) in layout.strided_indices().enumerate() {
        let mut remainder = logical;
        let mut out_flat = 0usize;
        for (d, &stride) in in_strides.iter().enumerate() {
            let mut coord = remainder / stride;
            remainder %= stride;
            if d == dim {
                coord += dim_offset;
            }
            out_flat += coord * out_strides[d];
        }
        out[out_flat] = data[src];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_core::Tensor;

    type T = Tensor<CpuBackend>;

    fn assert_vec_approx(got: &[f64], expected: &[f64], tol: f64) {
        assert_eq!(got.len(), expected.len());
        for (g, e) in got.iter().zip(expected.iter()) {
            assert!((g - e).abs() < tol, "got {:?}, expected {:?}", got, expected);
        }
    }

    #[test]
    fn test_add_broadcast() -> Result<()> {
        let device = CpuDevice::seeded(0);
        let a = T::from_f64_slice(&[1.0, 2.0, 3.0], (3, 1), DType::F64, &device)?;
        let b = T::from_f64_slice(&[10.0, 20.0, 30.0, 40.0], (1, 4), DType::F64, &device)?;
        let c = a.add(&b)?;
        assert_eq!(c.dims(), &[3, 4]);
        assert_vec_approx(
            &c.to_f64_vec()?,
            &[
                11.0, 21.0, 31.0, 41.0, 12.0, 22.0, 32.0, 42.0, 13.0, 23.0, 33.0, 43.0,
            ],
            1e-12,
        );
        Ok(())
    }

    #[test]
    fn test_binary_on_transposed_view() -> Result<()> {
        // The transposed operand is non-contiguous; the kernel must follow
        // its real strides.
        let device = CpuDevice::seeded(0);
        let a = T::from_f64_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3), DType::F64, &device)?;
        let b = T::from_f64_slice(&[10.0, 20.0, 30.0, 40.0, 50.0, 60.0], (3, 2), DType::F64, &device)?;
        let c = a.t()?.add(&b)?;
        // a^T = [[1,4],[2,5],[3,6]]
        assert_vec_approx(
            &c.to_f64_vec()?,
            &[11.0, 24.0, 32.0, 45.0, 53.0, 66.0],
            1e-12,
        );
        Ok(())
    }

    #[test]
    fn test_matmul_values() -> Result<()> {
        let device = CpuDevice::seeded(0);
        let a = T::from_f64_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3), DType::F64, &device)?;
        let b = T::from_f64_slice(&[7.0, 8.0, 9.0, 10.0, 11.0, 12.0], (3, 2), DType::F64, &device)?;
        let c = a.matmul(&b)?;
        assert_eq!(c.dims(), &[2, 2]);
        assert_vec_approx(&c.to_f64_vec()?, &[58.0, 64.0, 139.0, 154.0], 1e-12);
        Ok(())
    }

    #[test]
    fn test_matmul_transposed_lhs() -> Result<()> {
        let device = CpuDevice::seeded(0);
        let a = T::from_f64_slice(&[1.0, 2.0, 3.0, 4.0], (2, 2), DType::F64, &device)?;
        let b = T::from_f64_slice(&[1.0, 0.0, 0.0, 1.0], (2, 2), DType::F64, &device)?;
        let c = a.t()?.matmul(&b)?;
        assert_vec_approx(&c.to_f64_vec()?, &[1.0, 3.0, 2.0, 4.0], 1e-12);
        Ok(())
    }

    #[test]
    fn test_reduce_sum_and_mean() -> Result<()> {
        let device = CpuDevice::seeded(0);
        let x = T::from_f64_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3), DType::F64, &device)?;
        assert!((x.sum_all()?.to_scalar_f64()? - 21.0).abs() < 1e-12);
        assert!((x.mean_all()?.to_scalar_f64()? - 3.5).abs() < 1e-12);
        let row_sums = x.sum(1, false)?;
        assert_eq!(row_sums.dims(), &[2]);
        assert_vec_approx(&row_sums.to_f64_vec()?, &[6.0, 15.0], 1e-12);
        let col_means = x.mean(0, true)?;
        assert_eq!(col_means.dims(), &[1, 3]);
        assert_vec_approx(&col_means.to_f64_vec()?, &[2.5, 3.5, 4.5], 1e-12);
        Ok(())
    }

    #[test]
    fn test_cat_of_narrowed_views() -> Result<()> {
        let device = CpuDevice::seeded(0);
        let x = T::from_f64_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3), DType::F64, &device)?;
        let left = x.narrow(1, 0, 1)?;
        let right = x.narrow(1, 2, 1)?;
        let y = T::cat(&[left, right], 1)?;
        assert_eq!(y.dims(), &[2, 2]);
        assert_vec_approx(&y.to_f64_vec()?, &[1.0, 3.0, 4.0, 6.0], 1e-12);
        Ok(())
    }

    #[test]
    fn test_seeded_rand_reproducible() -> Result<()> {
        let a = T::rand((3, 4), DType::F64, &CpuDevice::seeded(7))?;
        let b = T::rand((3, 4), DType::F64, &CpuDevice::seeded(7))?;
        assert_eq!(a.to_f64_vec()?, b.to_f64_vec()?);
        let c = T::rand((3, 4), DType::F64, &CpuDevice::seeded(8))?;
        assert_ne!(a.to_f64_vec()?, c.to_f64_vec()?);
        Ok(())
    }

    #[test]
    fn test_backward_add_broadcast() -> Result<()> {
        let device = CpuDevice::seeded(0);
        let a = T::from_f64_slice(&[1.0, 2.0, 3.0], (3, 1), DType::F64, &device)?.set_variable();
        let b = T::from_f64_slice(&[1.0, 1.0, 1.0, 1.0], (1, 4), DType::F64, &device)?.set_variable();
        let loss = a.add(&b)?.sum_all()?;
        let grads = loss.backward()?;
        // Each element of a is used 4 times, each element of b 3 times.
        let grad_a = grads.get(&a).unwrap();
        assert_eq!(grad_a.dims(), &[3, 1]);
        assert_vec_approx(&grad_a.to_f64_vec()?, &[4.0, 4.0, 4.0], 1e-12);
        let grad_b = grads.get(&b).unwrap();
        assert_eq!(grad_b.dims(), &[1, 4]);
        assert_vec_approx(&grad_b.to_f64_vec()?, &[3.0, 3.0, 3.0, 3.0], 1e-12);
        Ok(())
    }

    #[test]
    fn test_backward_matmul() -> Result<()> {
        let device = CpuDevice::seeded(0);
        let a = T::from_f64_slice(&[1.0, 2.0, 3.0, 4.0], (2, 2), DType::F64, &device)?.set_variable();
        let b = T::from_f64_slice(&[5.0, 6.0, 7.0, 8.0], (2, 2), DType::F64, &device)?.set_variable();
        let loss = a.matmul(&b)?.sum_all()?;
        let grads = loss.backward()?;
        // grad_A = ones @ B^T, grad_B = A^T @ ones
        assert_vec_approx(
            &grads.get(&a).unwrap().to_f64_vec()?,
            &[11.0, 15.0, 11.0, 15.0],
            1e-12,
        );
        assert_vec_approx(
            &grads.get(&b).unwrap().to_f64_vec()?,
            &[4.0, 4.0, 6.0, 6.0],
            1e-12,
        );
        Ok(())
    }

    #[test]
    fn test_backward_tanh() -> Result<()> {
        let device = CpuDevice::seeded(0);
        let values = [0.0, 0.5, -1.0];
        let x = T::from_f64_slice(&values, 3, DType::F64, &device)?.set_variable();
        let loss = x.tanh()?.sum_all()?;
        let grads = loss.backward()?;
        let expected: Vec<f64> = values.iter().map(|v| 1.0 - v.tanh().powi(2)).collect();
        assert_vec_approx(&grads.get(&x).unwrap().to_f64_vec()?, &expected, 1e-12);
        Ok(())
    }

    #[test]
    fn test_backward_square_mean() -> Result<()> {
        let device = CpuDevice::seeded(0);
        let x = T::from_f64_slice(&[1.0, -2.0, 3.0, -4.0], 4, DType::F64, &device)?.set_variable();
        let loss = x.square()?.mean_all()?;
        let grads = loss.backward()?;
        // d(mean(x²))/dx = 2x / n
        assert_vec_approx(
            &grads.get(&x).unwrap().to_f64_vec()?,
            &[0.5, -1.0, 1.5, -2.0],
            1e-12,
        );
        Ok(())
    }

    #[test]
    fn test_backward_narrow_cat() -> Result<()> {
        let device = CpuDevice::seeded(0);
        let x = T::from_f64_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3), DType::F64, &device)?
            .set_variable();
        let picked = T::cat(&[x.narrow(1, 0, 1)?, x.narrow(1, 2, 1)?], 1)?;
        let loss = picked.sum_all()?;
        let grads = loss.backward()?;
        // The middle column was never used, so its gradient stays zero.
        assert_vec_approx(
            &grads.get(&x).unwrap().to_f64_vec()?,
            &[1.0, 0.0, 1.0, 1.0, 0.0, 1.0],
            1e-12,
        );
        Ok(())
    }

    #[test]
    fn test_backward_through_detach_stops() -> Result<()> {
        let device = CpuDevice::seeded(0);
        let x = T::from_f64_slice(&[2.0], 1, DType::F64, &device)?.set_variable();
        let y = x.square()?.detach();
        let loss = y.square()?.sum_all()?;
        let grads = loss.backward()?;
        assert!(grads.get(&x).is_none());
        assert!(grads.get(&y).is_some());
        Ok(())
    }
}
