// Op — computational graph node for automatic differentiation
//
// Every tensor records HOW it was created via an Op. The ops form a DAG that
// backward() walks in reverse to apply the chain rule.
//
// Example: c = a + b
//   a.op = Op::None (leaf)
//   b.op = Op::None (leaf)
//   c.op = Op::Binary { lhs: a, rhs: b, op: Add }
//
// Each Op variant stores the actual input Tensor<B> handles rather than bare
// ids. Tensors are Arc-wrapped so these clones are refcount bumps, and the
// graph itself keeps inputs alive exactly as long as any output that needs
// them for backward. Dropping the loss releases the whole graph.

use crate::backend::{Backend, BinaryOp, ReduceOp, UnaryOp};

/// Unique identifier for a tensor. Used as keys in GradStore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorId(pub(crate) u64);

impl Default for TensorId {
    fn default() -> Self {
        Self::new()
    }
}

impl TensorId {
    /// Generate a new unique tensor ID (uses a global atomic counter).
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        TensorId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Records the operation that produced a tensor, holding its input tensors.
///
/// `Op<B>` is generic over the Backend because it stores `Tensor<B>`.
pub enum Op<B: Backend> {
    /// No operation: a leaf tensor (input data or a trainable parameter).
    None,

    /// Element-wise binary: result = op(lhs, rhs)
    Binary {
        lhs: crate::Tensor<B>,
        rhs: crate::Tensor<B>,
        op: BinaryOp,
    },

    /// Element-wise unary: result = op(input)
    Unary {
        input: crate::Tensor<B>,
        op: UnaryOp,
    },

    /// Reduction over `dims` (all elements when `dims` is empty).
    Reduce {
        input: crate::Tensor<B>,
        op: ReduceOp,
        dims: Vec<usize>,
        keep_dim: bool,
    },

    /// Matrix multiplication: result = lhs @ rhs
    Matmul {
        lhs: crate::Tensor<B>,
        rhs: crate::Tensor<B>,
    },

    /// Reshape: same data, different shape. `src_shape` records the original
    /// shape so backward can reshape gradients back.
    Reshape {
        input: crate::Tensor<B>,
        src_shape: crate::Shape,
    },

    /// Transpose: swap two dimensions.
    Transpose {
        input: crate::Tensor<B>,
        dim0: usize,
        dim1: usize,
    },

    /// Narrow/slice along a dimension.
    Narrow {
        input: crate::Tensor<B>,
        dim: usize,
        start: usize,
        len: usize,
    },

    /// Affine transform: result = input * mul + add
    Affine {
        input: crate::Tensor<B>,
        mul: f64,
        add: f64,
    },

    /// Contiguous copy: same logical values in row-major memory.
    /// Gradient passes through unchanged.
    Contiguous { input: crate::Tensor<B> },

    /// Concatenation along `dim`. `sizes` stores each input's extent along
    /// `dim` so backward can slice the gradient back apart via narrow.
    Cat {
        inputs: Vec<crate::Tensor<B>>,
        dim: usize,
        sizes: Vec<usize>,
    },
}

// Manual Clone because derive would require B: Clone on the tensor fields.
// All clones are cheap: a Tensor clone is an Arc refcount increment.
impl<B: Backend> Clone for Op<B> {
    fn clone(&self) -> Self {
        match self {
            Op::None => Op::None,
            Op::Binary { lhs, rhs, op } => Op::Binary {
                lhs: lhs.clone(),
                rhs: rhs.clone(),
                op: *op,
            },
            Op::Unary { input, op } => Op::Unary {
                input: input.clone(),
                op: *op,
            },
            Op::Reduce {
                input,
                op,
                dims,
                keep_dim,
            } => Op::Reduce {
                input: input.clone(),
                op: *op,
                dims: dims.clone(),
                keep_dim: *keep_dim,
            },
            Op::Matmul { lhs, rhs } => Op::Matmul {
                lhs: lhs.clone(),
                rhs: rhs.clone(),
            },
            Op::Reshape { input, src_shape } => Op::Reshape {
                input: input.clone(),
                src_shape: src_shape.clone(),
            },
            Op::Transpose { input, dim0, dim1 } => Op::Transpose {
                input: input.clone(),
                dim0: *dim0,
                dim1: *dim1,
            },
            Op::Narrow {
                input,
                dim,
                start,
                len,
            } => Op::Narrow {
                input: input.clone(),
                dim: *dim,
                start: *start,
                len: *len,
            },
            Op::Affine { input, mul, add } => Op::Affine {
                input: input.clone(),
                mul: *mul,
                add: *add,
            },
            Op::Contiguous { input } => Op::Contiguous {
                input: input.clone(),
            },
            Op::Cat { inputs, dim, sizes } => Op::Cat {
                inputs: inputs.clone(),
                dim: *dim,
                sizes: sizes.clone(),
            },
        }
    }
}

// Concise Debug: op kind and input tensor ids, never tensor data.
impl<B: Backend> std::fmt::Debug for Op<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Op::None => write!(f, "None"),
            Op::Binary { lhs, rhs, op } => {
                write!(f, "Binary({:?}, id={:?}, id={:?})", op, lhs.id(), rhs.id())
            }
            Op::Unary { input, op } => {
                write!(f, "Unary({:?}, id={:?})", op, input.id())
            }
            Op::Reduce {
                input, op, dims, ..
            } => {
                write!(f, "Reduce({:?}, dims={:?}, id={:?})", op, dims, input.id())
            }
            Op::Matmul { lhs, rhs } => {
                write!(f, "Matmul(id={:?}, id={:?})", lhs.id(), rhs.id())
            }
            Op::Reshape { input, src_shape } => {
                write!(f, "Reshape(from {}, id={:?})", src_shape, input.id())
            }
            Op::Transpose { input, dim0, dim1 } => {
                write!(f, "Transpose({}, {}, id={:?})", dim0, dim1, input.id())
            }
            Op::Narrow {
                input,
                dim,
                start,
                len,
            } => {
                write!(
                    f,
                    "Narrow(dim={}, {}..{}, id={:?})",
                    dim,
                    start,
                    start + len,
                    input.id()
                )
            }
            Op::Affine { input, mul, add } => {
                write!(f, "Affine(*{} +{}, id={:?})", mul, add, input.id())
            }
            Op::Contiguous { input } => {
                write!(f, "Contiguous(id={:?})", input.id())
            }
            Op::Cat { inputs, dim, .. } => {
                let ids: Vec<_> = inputs.iter().map(|t| t.id()).collect();
                write!(f, "Cat(dim={}, ids={:?})", dim, ids)
            }
        }
    }
}

impl<B: Backend> Op<B> {
    /// References to all input tensors of this operation.
    /// Used by the topological sort in backward() to traverse the graph.
    pub fn inputs(&self) -> Vec<&crate::Tensor<B>> {
        match self {
            Op::None => vec![],
            Op::Binary { lhs, rhs, .. } | Op::Matmul { lhs, rhs } => vec![lhs, rhs],
            Op::Unary { input, .. }
            | Op::Reduce { input, .. }
            | Op::Reshape { input, .. }
            | Op::Transpose { input, .. }
            | Op::Narrow { input, .. }
            | Op::Affine { input, .. }
            | Op::Contiguous { input } => vec![input],
            Op::Cat { inputs, .. } => inputs.iter().collect(),
        }
    }
}
