// Backpropagation — reverse-mode automatic differentiation
//
// The forward pass records a DAG: every tensor's Op points at its inputs.
// backward() then:
//
//   1. topologically sorts the graph from the loss to the leaves,
//   2. seeds grad(loss) = 1.0,
//   3. walks the order in reverse, applying the chain rule per Op and
//      accumulating gradients for each input.
//
// If a tensor feeds several operations, its gradient is the SUM of the
// contributions from each use (multivariate chain rule).
//
// Gradient rules for the ops in this crate:
//
//   Add:       grad_a += g,               grad_b += g
//   Sub:       grad_a += g,               grad_b += -g
//   Mul:       grad_a += g * b,           grad_b += g * a
//   Div:       grad_a += g / b,           grad_b += -g * a / b²
//   Neg:       grad_in += -g
//   Tanh:      grad_in += g * (1 - tanh²(x))
//   Sigmoid:   grad_in += g * σ(x)(1 - σ(x))
//   Square:    grad_in += g * 2x
//   Affine:    grad_in += g * mul
//   Sum:       grad_in += broadcast(g)
//   Mean:      grad_in += broadcast(g) / n
//   Matmul:    grad_A += g @ Bᵀ,          grad_B += Aᵀ @ g
//   Reshape:   grad_in += reshape(g, src_shape)
//   Transpose: grad_in += transpose(g)  (its own inverse)
//   Narrow:    grad_in += scatter(g) at the sliced position
//   Cat:       each input gets its slice of g along the cat dim
//
// Binary ops additionally reduce the gradient over broadcast dimensions so
// it matches the pre-broadcast operand shape.

use std::collections::{HashMap, HashSet};

use crate::backend::{Backend, BinaryOp, ReduceOp, UnaryOp};
use crate::error::Result;
use crate::op::{Op, TensorId};
use crate::shape::Shape;
use crate::tensor::Tensor;

/// Stores gradients for all tensors in a computation graph.
///
/// After calling `tensor.backward()`, use `grads.get(&tensor)` to retrieve
/// the gradient of any tensor that participated.
pub struct GradStore<B: Backend> {
    grads: HashMap<TensorId, Tensor<B>>,
}

impl<B: Backend> Clone for GradStore<B> {
    fn clone(&self) -> Self {
        GradStore {
            grads: self.grads.clone(),
        }
    }
}

impl<B: Backend> Default for GradStore<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> GradStore<B> {
    /// Create a new empty GradStore.
    pub fn new() -> Self {
        GradStore {
            grads: HashMap::new(),
        }
    }

    /// Get the gradient of a tensor (if it exists).
    pub fn get(&self, tensor: &Tensor<B>) -> Option<&Tensor<B>> {
        self.grads.get(&tensor.id())
    }

    fn get_by_id(&self, id: &TensorId) -> Option<&Tensor<B>> {
        self.grads.get(id)
    }

    /// Accumulate a gradient for a tensor, adding to any existing entry.
    pub fn accumulate(&mut self, id: TensorId, grad: Tensor<B>) -> Result<()> {
        if let Some(existing) = self.grads.get(&id) {
            let new_grad = existing.add(&grad)?;
            self.grads.insert(id, new_grad);
        } else {
            self.grads.insert(id, grad);
        }
        Ok(())
    }
}

/// Topological ordering of the graph rooted at `root`: depth-first,
/// post-order, so every tensor appears after all of its inputs.
fn build_topo<B: Backend>(root: &Tensor<B>) -> Vec<Tensor<B>> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();

    fn visit<B: Backend>(
        t: &Tensor<B>,
        visited: &mut HashSet<TensorId>,
        order: &mut Vec<Tensor<B>>,
    ) {
        if visited.contains(&t.id()) {
            return;
        }
        visited.insert(t.id());
        for input in t.op().inputs() {
            visit(input, visited, order);
        }
        order.push(t.clone());
    }

    visit(root, &mut visited, &mut order);
    order
}

/// Compute gradients of `root` with respect to all tensors in its graph.
///
/// `root` must be a scalar (single element); reduce with `.sum_all()` or
/// `.mean_all()` first. This is the entry point behind `tensor.backward()`.
pub fn backward<B: Backend>(root: &Tensor<B>) -> Result<GradStore<B>> {
    if root.elem_count() != 1 {
        return Err(crate::Error::msg(
            "backward() requires a scalar tensor (single element). \
             Use .sum_all() or .mean_all() to reduce to a scalar first.",
        ));
    }

    let topo = build_topo(root);

    // grad(root) = 1.0 (dL/dL = 1)
    let mut grads = GradStore::new();
    let ones = Tensor::<B>::ones(root.shape().clone(), root.dtype(), root.device())?;
    grads.grads.insert(root.id(), ones);

    // Reverse topological order: root first, leaves last.
    for tensor in topo.iter().rev() {
        let grad_output = match grads.get_by_id(&tensor.id()) {
            Some(g) => g.clone(),
            None => continue, // no gradient flows to this tensor
        };

        match tensor.op() {
            Op::None => {
                // Leaf, nothing to propagate.
            }

            Op::Contiguous { input } => {
                grads.accumulate(input.id(), grad_output)?;
            }

            Op::Binary { lhs, rhs, op } => {
                compute_binary_grad(*op, &grad_output, lhs, rhs, &mut grads)?;
            }

            Op::Unary { input, op } => {
                compute_unary_grad(*op, &grad_output, input, &mut grads)?;
            }

            Op::Reduce {
                input, op, dims, ..
            } => {
                compute_reduce_grad(*op, &grad_output, input, dims, &mut grads)?;
            }

            Op::Matmul { lhs, rhs } => {
                compute_matmul_grad(&grad_output, lhs, rhs, &mut grads)?;
            }

            Op::Reshape { input, src_shape } => {
                let grad = grad_output.reshape(src_shape.clone())?;
                grads.accumulate(input.id(), grad)?;
            }

            Op::Transpose { input, dim0, dim1 } => {
                let grad = grad_output.transpose(*dim0, *dim1)?;
                grads.accumulate(input.id(), grad)?;
            }

            Op::Narrow {
                input, dim, start, ..
            } => {
                compute_narrow_grad(&grad_output, input, *dim, *start, &mut grads)?;
            }

            Op::Affine { input, mul, .. } => {
                // d(x * mul + add)/dx = mul
                let grad = grad_output.affine(*mul, 0.0)?;
                grads.accumulate(input.id(), grad)?;
            }

            Op::Cat { inputs, dim, sizes } => {
                // Slice the gradient back into per-input pieces.
                let mut offset = 0usize;
                for (inp, &sz) in inputs.iter().zip(sizes.iter()) {
                    let grad_slice = grad_output.narrow(*dim, offset, sz)?;
                    grads.accumulate(inp.id(), grad_slice)?;
                    offset += sz;
                }
            }
        }
    }

    Ok(grads)
}

//  Binary ops

fn compute_binary_grad<B: Backend>(
    op: BinaryOp,
    grad_output: &Tensor<B>,
    lhs: &Tensor<B>,
    rhs: &Tensor<B>,
    grads: &mut GradStore<B>,
) -> Result<()> {
    match op {
        BinaryOp::Add => {
            let grad_lhs = reduce_broadcast_grad(grad_output, lhs.shape())?;
            let grad_rhs = reduce_broadcast_grad(grad_output, rhs.shape())?;
            grads.accumulate(lhs.id(), grad_lhs)?;
            grads.accumulate(rhs.id(), grad_rhs)?;
        }
        BinaryOp::Sub => {
            let grad_lhs = reduce_broadcast_grad(grad_output, lhs.shape())?;
            let neg = grad_output.neg()?;
            let grad_rhs = reduce_broadcast_grad(&neg, rhs.shape())?;
            grads.accumulate(lhs.id(), grad_lhs)?;
            grads.accumulate(rhs.id(), grad_rhs)?;
        }
        BinaryOp::Mul => {
            let raw_lhs = grad_output.mul(rhs)?;
            let raw_rhs = grad_output.mul(lhs)?;
            grads.accumulate(lhs.id(), reduce_broadcast_grad(&raw_lhs, lhs.shape())?)?;
            grads.accumulate(rhs.id(), reduce_broadcast_grad(&raw_rhs, rhs.shape())?)?;
        }
        BinaryOp::Div => {
            let raw_lhs = grad_output.div(rhs)?;
            grads.accumulate(lhs.id(), reduce_broadcast_grad(&raw_lhs, lhs.shape())?)?;
            let neg_grad = grad_output.neg()?;
            let b_sq = rhs.mul(rhs)?;
            let raw_rhs = neg_grad.mul(lhs)?.div(&b_sq)?;
            grads.accumulate(rhs.id(), reduce_broadcast_grad(&raw_rhs, rhs.shape())?)?;
        }
    }
    Ok(())
}

/// Sum a gradient over broadcast dimensions so it matches the original
/// operand shape.
///
/// If lhs was `[1, 4]` broadcast to `[3, 4]`, the incoming gradient is
/// `[3, 4]` and grad_lhs must be `[1, 4]`: sum over dim 0. A `[4]` operand
/// broadcast to `[3, 4]` additionally drops the leading dim via reshape.
fn reduce_broadcast_grad<B: Backend>(
    grad: &Tensor<B>,
    target_shape: &Shape,
) -> Result<Tensor<B>> {
    let grad_dims = grad.dims();
    let target_dims = target_shape.dims();
    if grad_dims == target_dims {
        return Ok(grad.clone());
    }

    // Pad target dims with leading 1s to the gradient's rank, then sum every
    // dim where the target is 1 but the gradient is larger.
    let grad_rank = grad_dims.len();
    let target_rank = target_dims.len();
    let mut padded_target = vec![1usize; grad_rank];
    let offset = grad_rank - target_rank;
    padded_target[offset..offset + target_rank].copy_from_slice(target_dims);

    let dims_to_sum: Vec<usize> = (0..grad_rank)
        .filter(|&d| padded_target[d] == 1 && grad_dims[d] > 1)
        .collect();

    let mut result = grad.clone();
    // Keep dims while summing so indices stay stable, then reshape once.
    for &d in dims_to_sum.iter().rev() {
        result = result.sum(d, true)?;
    }
    result.reshape(target_shape.clone())
}

//  Unary ops

fn compute_unary_grad<B: Backend>(
    op: UnaryOp,
    grad_output: &Tensor<B>,
    input: &Tensor<B>,
    grads: &mut GradStore<B>,
) -> Result<()> {
    let grad_input = match op {
        // d(-x)/dx = -1
        UnaryOp::Neg => grad_output.neg()?,

        // d(tanh x)/dx = 1 - tanh²(x)
        UnaryOp::Tanh => {
            let tanh_x = input.tanh()?;
            let tanh_sq = tanh_x.mul(&tanh_x)?;
            let one = Tensor::<B>::ones(input.shape().clone(), input.dtype(), input.device())?;
            let dtanh = one.sub(&tanh_sq)?;
            grad_output.mul(&dtanh)?
        }

        // d(σ(x))/dx = σ(x)(1 - σ(x))
        UnaryOp::Sigmoid => {
            let sig = input.sigmoid()?;
            let one = Tensor::<B>::ones(input.shape().clone(), input.dtype(), input.device())?;
            let one_minus_sig = one.sub(&sig)?;
            let dsig = sig.mul(&one_minus_sig)?;
            grad_output.mul(&dsig)?
        }

        // d(x²)/dx = 2x
        UnaryOp::Square => {
            let two_x = input.affine(2.0, 0.0)?;
            grad_output.mul(&two_x)?
        }
    };

    grads.accumulate(input.id(), grad_input)?;
    Ok(())
}

//  Reductions

fn compute_reduce_grad<B: Backend>(
    op: ReduceOp,
    grad_output: &Tensor<B>,
    input: &Tensor<B>,
    dims: &[usize],
    grads: &mut GradStore<B>,
) -> Result<()> {
    match op {
        ReduceOp::Sum => {
            if dims.is_empty() {
                // sum_all → scalar: every input element sees the full gradient.
                let grad_val = grad_output.to_scalar_f64()?;
                let grad = Tensor::<B>::full(
                    input.shape().clone(),
                    grad_val,
                    input.dtype(),
                    input.device(),
                )?;
                grads.accumulate(input.id(), grad)?;
            } else {
                let grad = expand_grad_for_reduce(grad_output, input, dims)?;
                grads.accumulate(input.id(), grad)?;
            }
        }
        ReduceOp::Mean => {
            if dims.is_empty() {
                let n = input.elem_count() as f64;
                let grad_val = grad_output.to_scalar_f64()? / n;
                let grad = Tensor::<B>::full(
                    input.shape().clone(),
                    grad_val,
                    input.dtype(),
                    input.device(),
                )?;
                grads.accumulate(input.id(), grad)?;
            } else {
                let n: f64 = dims.iter().map(|&d| input.dims()[d] as f64).product();
                let grad = expand_grad_for_reduce(grad_output, input, dims)?;
                let grad = grad.affine(1.0 / n, 0.0)?;
                grads.accumulate(input.id(), grad)?;
            }
        }
    }
    Ok(())
}

/// Expand a reduced gradient back to the input shape by repeating its values
/// along the reduced dimension(s).
///
/// Example: input `[2, 3]`, sum(dim=1) → grad_output `[g0, g1]`
///   → grad_input `[[g0, g0, g0], [g1, g1, g1]]`
fn expand_grad_for_reduce<B: Backend>(
    grad: &Tensor<B>,
    input: &Tensor<B>,
    dims: &[usize],
) -> Result<Tensor<B>> {
    let input_dims = input.dims();
    let input_shape = input.shape().clone();
    let grad_data = grad.to_f64_vec()?;
    let total = input_shape.elem_count();
    let input_strides = input_shape.stride_contiguous();

    let grad_dims: Vec<usize> = input_dims
        .iter()
        .enumerate()
        .filter(|(i, _)| !dims.contains(i))
        .map(|(_, &d)| d)
        .collect();
    let grad_strides = Shape::new(grad_dims).stride_contiguous();

    let mut result_data = vec![0.0f64; total];
    for (flat_idx, out) in result_data.iter_mut().enumerate() {
        // Decompose the input index, drop the reduced dims, re-flatten.
        let mut remainder = flat_idx;
        let mut grad_flat = 0;
        let mut gi = 0;
        for (d, &stride) in input_strides.iter().enumerate() {
            let coord = remainder / stride;
            remainder %= stride;
            if !dims.contains(&d) {
                grad_flat += coord * grad_strides[gi];
                gi += 1;
            }
        }
        *out = grad_data[grad_flat];
    }

    Tensor::<B>::from_f64_slice(&result_data, input_shape, input.dtype(), input.device())
}

//  Matmul

/// C = A @ B with A:[m,k], B:[k,n], C:[m,n]
///   grad_A = grad_C @ Bᵀ  →  [m,n] @ [n,k] = [m,k]
///   grad_B = Aᵀ @ grad_C  →  [k,m] @ [m,n] = [k,n]
///
/// For batched matmul only the last two dims are transposed.
fn compute_matmul_grad<B: Backend>(
    grad_output: &Tensor<B>,
    lhs: &Tensor<B>,
    rhs: &Tensor<B>,
    grads: &mut GradStore<B>,
) -> Result<()> {
    let rhs_rank = rhs.rank();
    let lhs_rank = lhs.rank();

    let rhs_t = rhs.transpose(rhs_rank - 2, rhs_rank - 1)?.contiguous()?;
    let grad_lhs = grad_output.matmul(&rhs_t)?;
    grads.accumulate(lhs.id(), grad_lhs)?;

    let lhs_t = lhs.transpose(lhs_rank - 2, lhs_rank - 1)?.contiguous()?;
    let grad_rhs = lhs_t.matmul(grad_output)?;
    grads.accumulate(rhs.id(), grad_rhs)?;

    Ok(())
}

//  Narrow

/// Narrow selects a slice; its backward scatters the gradient into a zero
/// tensor at the original position.
///
/// Example: input `[4]`, narrow(dim=0, start=1, len=2), grad `[g1, g2]`
///   → grad_input `[0, g1, g2, 0]`
fn compute_narrow_grad<B: Backend>(
    grad_output: &Tensor<B>,
    input: &Tensor<B>,
    dim: usize,
    start: usize,
    grads: &mut GradStore<B>,
) -> Result<()> {
    let input_shape = input.shape().clone();
    let input_strides = input_shape.stride_contiguous();
    let grad_data = grad_output.to_f64_vec()?;
    let grad_strides = Shape::new(grad_output.dims().to_vec()).stride_contiguous();

    let mut result_data = vec![0.0f64; input_shape.elem_count()];
    for (grad_flat, &g) in grad_data.iter().enumerate() {
        let mut remainder = grad_flat;
        let mut input_flat = 0;
        for (d, &stride) in grad_strides.iter().enumerate() {
            let mut coord = remainder / stride;
            remainder %= stride;
            if d == dim {
                coord += start;
            }
            input_flat += coord * input_strides[d];
        }
        result_data[input_flat] = g;
    }

    let grad =
        Tensor::<B>::from_f64_slice(&result_data, input_shape, input.dtype(), input.device())?;
    grads.accumulate(input.id(), grad)?;
    Ok(())
}
