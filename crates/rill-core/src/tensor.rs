// Tensor — the central data type
//
// A Tensor<B> is a cheap handle (Arc) to:
//
//   storage  — the flat data buffer, behind a RwLock and shared by views
//   layout   — shape + strides + offset into that buffer
//   op       — how this tensor was computed (the autodiff graph edge)
//
// Operations never mutate their inputs; they return new tensors whose Op
// records the inputs. Two deliberate exceptions to immutability exist:
//
//   set_variable()         — marks a leaf as trainable (same id, new handle)
//   update_data_inplace()  — swaps the data behind the lock, so every handle
//                            and view sharing that storage observes the new
//                            values. Optimizers and parameter re-init use
//                            this; it keeps long-lived parameter handles
//                            (e.g. inside an optimizer) valid across updates.

use std::sync::{Arc, RwLock};

use crate::backend::{Backend, BinaryOp, ReduceOp, UnaryOp};
use crate::backprop::{self, GradStore};
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::layout::Layout;
use crate::op::{Op, TensorId};
use crate::shape::Shape;

struct TensorInner<B: Backend> {
    id: TensorId,
    storage: Arc<RwLock<B::Storage>>,
    layout: Layout,
    dtype: DType,
    device: B::Device,
    op: Op<B>,
    is_variable: bool,
}

/// A multi-dimensional array on some backend, with autodiff tracking.
pub struct Tensor<B: Backend> {
    inner: Arc<TensorInner<B>>,
}

// Manual Clone: an Arc refcount bump, independent of whether B is Clone.
impl<B: Backend> Clone for Tensor<B> {
    fn clone(&self) -> Self {
        Tensor {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: Backend> std::fmt::Debug for Tensor<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Tensor(id={:?}, shape={}, dtype={}, device={:?})",
            self.id(),
            self.shape(),
            self.dtype(),
            self.device()
        )
    }
}

impl<B: Backend> Tensor<B> {
    //  Construction internals

    pub(crate) fn from_storage(
        storage: B::Storage,
        layout: Layout,
        dtype: DType,
        device: B::Device,
        op: Op<B>,
    ) -> Tensor<B> {
        Tensor {
            inner: Arc::new(TensorInner {
                id: TensorId::new(),
                storage: Arc::new(RwLock::new(storage)),
                layout,
                dtype,
                device,
                op,
                is_variable: false,
            }),
        }
    }

    /// A new handle over the SAME storage with a different layout and op.
    /// This is how transpose/narrow/reshape views are built.
    fn view_with_layout(&self, layout: Layout, op: Op<B>) -> Tensor<B> {
        Tensor {
            inner: Arc::new(TensorInner {
                id: TensorId::new(),
                storage: Arc::clone(&self.inner.storage),
                layout,
                dtype: self.inner.dtype,
                device: self.inner.device.clone(),
                op,
                is_variable: false,
            }),
        }
    }

    fn read_storage(&self) -> Result<std::sync::RwLockReadGuard<'_, B::Storage>> {
        self.inner
            .storage
            .read()
            .map_err(|_| Error::msg("storage lock poisoned"))
    }

    fn write_storage(&self) -> Result<std::sync::RwLockWriteGuard<'_, B::Storage>> {
        self.inner
            .storage
            .write()
            .map_err(|_| Error::msg("storage lock poisoned"))
    }

    //  Accessors

    pub fn id(&self) -> TensorId {
        self.inner.id
    }

    pub fn shape(&self) -> &Shape {
        self.inner.layout.shape()
    }

    pub fn dims(&self) -> &[usize] {
        self.inner.layout.dims()
    }

    pub fn rank(&self) -> usize {
        self.inner.layout.rank()
    }

    pub fn elem_count(&self) -> usize {
        self.inner.layout.elem_count()
    }

    pub fn dtype(&self) -> DType {
        self.inner.dtype
    }

    pub fn device(&self) -> &B::Device {
        &self.inner.device
    }

    pub fn layout(&self) -> &Layout {
        &self.inner.layout
    }

    pub fn is_contiguous(&self) -> bool {
        self.inner.layout.is_contiguous()
    }

    /// Whether this tensor is a trainable variable (see [`Tensor::set_variable`]).
    pub fn is_variable(&self) -> bool {
        self.inner.is_variable
    }

    /// The operation that produced this tensor.
    pub fn op(&self) -> &Op<B> {
        &self.inner.op
    }

    //  Creation

    /// A tensor filled with zeros.
    pub fn zeros(shape: impl Into<Shape>, dtype: DType, device: &B::Device) -> Result<Tensor<B>> {
        let shape = shape.into();
        let storage = B::zeros(&shape, dtype, device)?;
        Ok(Self::from_storage(
            storage,
            Layout::contiguous(shape),
            dtype,
            device.clone(),
            Op::None,
        ))
    }

    /// A tensor filled with ones.
    pub fn ones(shape: impl Into<Shape>, dtype: DType, device: &B::Device) -> Result<Tensor<B>> {
        let shape = shape.into();
        let storage = B::ones(&shape, dtype, device)?;
        Ok(Self::from_storage(
            storage,
            Layout::contiguous(shape),
            dtype,
            device.clone(),
            Op::None,
        ))
    }

    /// A tensor filled with a constant value.
    pub fn full(
        shape: impl Into<Shape>,
        val: f64,
        dtype: DType,
        device: &B::Device,
    ) -> Result<Tensor<B>> {
        let shape = shape.into();
        let storage = B::full(&shape, val, dtype, device)?;
        Ok(Self::from_storage(
            storage,
            Layout::contiguous(shape),
            dtype,
            device.clone(),
            Op::None,
        ))
    }

    /// A tensor created from a flat f64 slice in row-major order.
    pub fn from_f64_slice(
        data: &[f64],
        shape: impl Into<Shape>,
        dtype: DType,
        device: &B::Device,
    ) -> Result<Tensor<B>> {
        let shape = shape.into();
        let expected = shape.elem_count();
        if data.len() != expected {
            return Err(Error::ElementCountMismatch {
                shape,
                expected,
                got: data.len(),
            });
        }
        let storage = B::from_f64_slice(data, dtype, device)?;
        Ok(Self::from_storage(
            storage,
            Layout::contiguous(shape),
            dtype,
            device.clone(),
            Op::None,
        ))
    }

    /// A tensor with uniform random values in [0, 1), drawn from the
    /// device's generator.
    pub fn rand(shape: impl Into<Shape>, dtype: DType, device: &B::Device) -> Result<Tensor<B>> {
        let shape = shape.into();
        let storage = B::rand_uniform(&shape, dtype, device)?;
        Ok(Self::from_storage(
            storage,
            Layout::contiguous(shape),
            dtype,
            device.clone(),
            Op::None,
        ))
    }

    /// A tensor with standard normal random values, drawn from the device's
    /// generator.
    pub fn randn(shape: impl Into<Shape>, dtype: DType, device: &B::Device) -> Result<Tensor<B>> {
        let shape = shape.into();
        let storage = B::rand_normal(&shape, dtype, device)?;
        Ok(Self::from_storage(
            storage,
            Layout::contiguous(shape),
            dtype,
            device.clone(),
            Op::None,
        ))
    }

    //  Variables and graph control

    /// Mark this tensor as a trainable variable.
    ///
    /// The returned handle keeps the SAME id and storage; only the variable
    /// flag changes. Gradients are computed for any tensor reachable from
    /// the loss, but optimizers look up parameters by id, so the id must
    /// stay stable across this call.
    pub fn set_variable(self) -> Tensor<B> {
        Tensor {
            inner: Arc::new(TensorInner {
                id: self.inner.id,
                storage: Arc::clone(&self.inner.storage),
                layout: self.inner.layout.clone(),
                dtype: self.inner.dtype,
                device: self.inner.device.clone(),
                op: self.inner.op.clone(),
                is_variable: true,
            }),
        }
    }

    /// Cut this tensor out of the autodiff graph.
    ///
    /// The result shares storage with `self` but records no op, so
    /// backward() treats it as a leaf. Training loops that thread recurrent
    /// state across batches detach the carry-state each step; without this
    /// the graph would grow over the whole run.
    pub fn detach(&self) -> Tensor<B> {
        self.view_with_layout(self.inner.layout.clone(), Op::None)
    }

    /// Replace the data behind this tensor's storage lock.
    ///
    /// Every handle and view sharing the storage sees the new values. The
    /// slice must match the tensor's element count; the tensor must own its
    /// storage from the start of the buffer (parameters always do).
    pub fn update_data_inplace(&self, data: &[f64]) -> Result<()> {
        let expected = self.elem_count();
        if data.len() != expected {
            return Err(Error::msg(format!(
                "update_data_inplace: expected {} elements, got {}",
                expected,
                data.len()
            )));
        }
        let new_storage = B::from_f64_slice(data, self.dtype(), self.device())?;
        let mut guard = self.write_storage()?;
        *guard = new_storage;
        Ok(())
    }

    //  Shape manipulation

    /// Change the logical shape without changing the element count.
    ///
    /// Contiguous tensors are reshaped for free (view). Non-contiguous
    /// tensors are first copied to contiguous memory.
    pub fn reshape(&self, shape: impl Into<Shape>) -> Result<Tensor<B>> {
        let shape = shape.into();
        if shape.elem_count() != self.elem_count() {
            return Err(Error::ReshapeElementMismatch {
                src: self.elem_count(),
                dst: shape.elem_count(),
                dst_shape: shape,
            });
        }
        let src_shape = self.shape().clone();
        let base = if self.is_contiguous() {
            self.clone()
        } else {
            self.contiguous()?
        };
        Ok(base.view_with_layout(
            Layout::contiguous(shape),
            Op::Reshape {
                input: self.clone(),
                src_shape,
            },
        ))
    }

    /// Swap two dimensions. Free: only the layout changes.
    pub fn transpose(&self, dim0: usize, dim1: usize) -> Result<Tensor<B>> {
        let layout = self.inner.layout.transpose(dim0, dim1)?;
        Ok(self.view_with_layout(
            layout,
            Op::Transpose {
                input: self.clone(),
                dim0,
                dim1,
            },
        ))
    }

    /// Matrix transpose for rank-2 tensors.
    pub fn t(&self) -> Result<Tensor<B>> {
        if self.rank() != 2 {
            return Err(Error::RankMismatch {
                expected: 2,
                got: self.rank(),
            });
        }
        self.transpose(0, 1)
    }

    /// Slice `len` entries starting at `start` along `dim`. Free (view).
    pub fn narrow(&self, dim: usize, start: usize, len: usize) -> Result<Tensor<B>> {
        let layout = self.inner.layout.narrow(dim, start, len)?;
        Ok(self.view_with_layout(
            layout,
            Op::Narrow {
                input: self.clone(),
                dim,
                start,
                len,
            },
        ))
    }

    /// Copy into row-major contiguous memory. A no-op clone when the tensor
    /// is already contiguous.
    pub fn contiguous(&self) -> Result<Tensor<B>> {
        if self.is_contiguous() {
            return Ok(self.clone());
        }
        let storage = {
            let guard = self.read_storage()?;
            B::to_contiguous(&guard, self.layout())?
        };
        Ok(Self::from_storage(
            storage,
            Layout::contiguous(self.shape().clone()),
            self.dtype(),
            self.device().clone(),
            Op::Contiguous {
                input: self.clone(),
            },
        ))
    }

    /// Split into `n` pieces of (near) equal size along `dim`.
    ///
    /// When the dim size does not divide evenly, the last piece is smaller.
    pub fn chunk(&self, n: usize, dim: usize) -> Result<Vec<Tensor<B>>> {
        if n == 0 {
            return Err(Error::msg("chunk: n must be non-zero"));
        }
        let dim_size = self.shape().dim(dim)?;
        let chunk_size = dim_size.div_ceil(n);
        let mut pieces = Vec::new();
        let mut start = 0;
        while start < dim_size {
            let len = chunk_size.min(dim_size - start);
            pieces.push(self.narrow(dim, start, len)?);
            start += len;
        }
        Ok(pieces)
    }

    /// Concatenate tensors along `dim`.
    ///
    /// All tensors must agree in rank, dtype, and every dimension except `dim`.
    pub fn cat(tensors: &[Tensor<B>], dim: usize) -> Result<Tensor<B>> {
        let first = match tensors.first() {
            Some(t) => t,
            None => return Err(Error::msg("cat: need at least one tensor")),
        };
        if tensors.len() == 1 {
            return Ok(first.clone());
        }
        let rank = first.rank();
        if dim >= rank {
            return Err(Error::DimOutOfRange { dim, rank });
        }
        let dtype = first.dtype();
        for t in tensors.iter().skip(1) {
            if t.rank() != rank {
                return Err(Error::msg(format!(
                    "cat: all tensors must have the same rank (got {} and {})",
                    rank,
                    t.rank()
                )));
            }
            if t.dtype() != dtype {
                return Err(Error::DTypeMismatch {
                    expected: dtype,
                    got: t.dtype(),
                });
            }
            for d in 0..rank {
                if d != dim && t.dims()[d] != first.dims()[d] {
                    return Err(Error::msg(format!(
                        "cat: shapes must match outside dim {} (got {} and {})",
                        dim,
                        first.shape(),
                        t.shape()
                    )));
                }
            }
        }

        let sizes: Vec<usize> = tensors.iter().map(|t| t.dims()[dim]).collect();
        let mut out_dims = first.dims().to_vec();
        out_dims[dim] = sizes.iter().sum();
        let out_shape = Shape::new(out_dims);

        let storage = {
            let guards = tensors
                .iter()
                .map(|t| t.read_storage())
                .collect::<Result<Vec<_>>>()?;
            let pairs: Vec<(&B::Storage, &Layout)> = tensors
                .iter()
                .zip(guards.iter())
                .map(|(t, g)| (&**g, t.layout()))
                .collect();
            B::cat(&pairs, &out_shape, dim)?
        };

        Ok(Self::from_storage(
            storage,
            Layout::contiguous(out_shape),
            dtype,
            first.device().clone(),
            Op::Cat {
                inputs: tensors.to_vec(),
                dim,
                sizes,
            },
        ))
    }

    //  Element-wise arithmetic

    fn binary_op(&self, rhs: &Tensor<B>, op: BinaryOp) -> Result<Tensor<B>> {
        if self.dtype() != rhs.dtype() {
            return Err(Error::DTypeMismatch {
                expected: self.dtype(),
                got: rhs.dtype(),
            });
        }
        let out_shape = self.shape().broadcast_shape(rhs.shape())?;
        let storage = {
            let lhs_guard = self.read_storage()?;
            let rhs_guard = rhs.read_storage()?;
            B::binary_op(op, &lhs_guard, self.layout(), &rhs_guard, rhs.layout())?
        };
        Ok(Self::from_storage(
            storage,
            Layout::contiguous(out_shape),
            self.dtype(),
            self.device().clone(),
            Op::Binary {
                lhs: self.clone(),
                rhs: rhs.clone(),
                op,
            },
        ))
    }

    /// Element-wise addition with broadcasting.
    pub fn add(&self, rhs: &Tensor<B>) -> Result<Tensor<B>> {
        self.binary_op(rhs, BinaryOp::Add)
    }

    /// Element-wise subtraction with broadcasting.
    pub fn sub(&self, rhs: &Tensor<B>) -> Result<Tensor<B>> {
        self.binary_op(rhs, BinaryOp::Sub)
    }

    /// Element-wise multiplication with broadcasting.
    pub fn mul(&self, rhs: &Tensor<B>) -> Result<Tensor<B>> {
        self.binary_op(rhs, BinaryOp::Mul)
    }

    /// Element-wise division with broadcasting.
    pub fn div(&self, rhs: &Tensor<B>) -> Result<Tensor<B>> {
        self.binary_op(rhs, BinaryOp::Div)
    }

    fn unary_op(&self, op: UnaryOp) -> Result<Tensor<B>> {
        let storage = {
            let guard = self.read_storage()?;
            B::unary_op(op, &guard, self.layout())?
        };
        Ok(Self::from_storage(
            storage,
            Layout::contiguous(self.shape().clone()),
            self.dtype(),
            self.device().clone(),
            Op::Unary {
                input: self.clone(),
                op,
            },
        ))
    }

    /// Element-wise negation.
    pub fn neg(&self) -> Result<Tensor<B>> {
        self.unary_op(UnaryOp::Neg)
    }

    /// Element-wise hyperbolic tangent.
    pub fn tanh(&self) -> Result<Tensor<B>> {
        self.unary_op(UnaryOp::Tanh)
    }

    /// Element-wise logistic sigmoid.
    pub fn sigmoid(&self) -> Result<Tensor<B>> {
        self.unary_op(UnaryOp::Sigmoid)
    }

    /// Element-wise square.
    pub fn square(&self) -> Result<Tensor<B>> {
        self.unary_op(UnaryOp::Square)
    }

    /// Affine transform: `self * mul + add`, with f64 scalars.
    pub fn affine(&self, mul: f64, add: f64) -> Result<Tensor<B>> {
        let storage = {
            let guard = self.read_storage()?;
            B::affine(&guard, self.layout(), mul, add)?
        };
        Ok(Self::from_storage(
            storage,
            Layout::contiguous(self.shape().clone()),
            self.dtype(),
            self.device().clone(),
            Op::Affine {
                input: self.clone(),
                mul,
                add,
            },
        ))
    }

    //  Reductions

    fn reduce_op(&self, op: ReduceOp, dims: &[usize], keep_dim: bool) -> Result<Tensor<B>> {
        for &d in dims {
            if d >= self.rank() {
                return Err(Error::DimOutOfRange {
                    dim: d,
                    rank: self.rank(),
                });
            }
        }
        let storage = {
            let guard = self.read_storage()?;
            B::reduce_op(op, &guard, self.layout(), dims, keep_dim)?
        };
        let out_shape = if dims.is_empty() {
            Shape::from(())
        } else if keep_dim {
            let mut d = self.dims().to_vec();
            for &dim in dims {
                d[dim] = 1;
            }
            Shape::new(d)
        } else {
            let d: Vec<usize> = self
                .dims()
                .iter()
                .enumerate()
                .filter(|(i, _)| !dims.contains(i))
                .map(|(_, &s)| s)
                .collect();
            Shape::new(d)
        };
        Ok(Self::from_storage(
            storage,
            Layout::contiguous(out_shape),
            self.dtype(),
            self.device().clone(),
            Op::Reduce {
                input: self.clone(),
                op,
                dims: dims.to_vec(),
                keep_dim,
            },
        ))
    }

    /// Sum of all elements, as a scalar tensor.
    pub fn sum_all(&self) -> Result<Tensor<B>> {
        self.reduce_op(ReduceOp::Sum, &[], false)
    }

    /// Sum along one dimension.
    pub fn sum(&self, dim: usize, keep_dim: bool) -> Result<Tensor<B>> {
        self.reduce_op(ReduceOp::Sum, &[dim], keep_dim)
    }

    /// Mean of all elements, as a scalar tensor.
    pub fn mean_all(&self) -> Result<Tensor<B>> {
        self.reduce_op(ReduceOp::Mean, &[], false)
    }

    /// Mean along one dimension.
    pub fn mean(&self, dim: usize, keep_dim: bool) -> Result<Tensor<B>> {
        self.reduce_op(ReduceOp::Mean, &[dim], keep_dim)
    }

    //  Matrix multiplication

    /// Matrix multiply: `self @ rhs`.
    ///
    /// # Shapes
    /// - `self`: `[..., m, k]`
    /// - `rhs`: `[..., k, n]` (batch dims must match `self`'s or be absent)
    /// - returns: `[..., m, n]`
    pub fn matmul(&self, rhs: &Tensor<B>) -> Result<Tensor<B>> {
        if self.dtype() != rhs.dtype() {
            return Err(Error::DTypeMismatch {
                expected: self.dtype(),
                got: rhs.dtype(),
            });
        }
        if self.rank() < 2 || rhs.rank() < 2 {
            return Err(Error::RankMismatch {
                expected: 2,
                got: self.rank().min(rhs.rank()),
            });
        }
        let lhs_dims = self.dims();
        let rhs_dims = rhs.dims();
        let m = lhs_dims[self.rank() - 2];
        let k1 = lhs_dims[self.rank() - 1];
        let k2 = rhs_dims[rhs.rank() - 2];
        let n = rhs_dims[rhs.rank() - 1];
        if k1 != k2 {
            return Err(Error::MatmulShapeMismatch { m, k1, k2, n });
        }
        let storage = {
            let lhs_guard = self.read_storage()?;
            let rhs_guard = rhs.read_storage()?;
            B::matmul(&lhs_guard, self.layout(), &rhs_guard, rhs.layout())?
        };
        let mut out_dims = lhs_dims[..self.rank() - 2].to_vec();
        out_dims.push(m);
        out_dims.push(n);
        Ok(Self::from_storage(
            storage,
            Layout::contiguous(Shape::new(out_dims)),
            self.dtype(),
            self.device().clone(),
            Op::Matmul {
                lhs: self.clone(),
                rhs: rhs.clone(),
            },
        ))
    }

    //  Host access

    /// Copy the tensor's values to the host as f64, in logical order.
    pub fn to_f64_vec(&self) -> Result<Vec<f64>> {
        let guard = self.read_storage()?;
        B::to_f64_vec(&guard, self.layout())
    }

    /// Read a single-element tensor as an f64 scalar.
    pub fn to_scalar_f64(&self) -> Result<f64> {
        if self.elem_count() != 1 {
            return Err(Error::NotAScalar {
                shape: self.shape().clone(),
            });
        }
        Ok(self.to_f64_vec()?[0])
    }

    //  Autodiff

    /// Compute gradients of this scalar tensor with respect to every tensor
    /// in its graph. See [`crate::backprop::backward`].
    pub fn backward(&self) -> Result<GradStore<B>> {
        backprop::backward(self)
    }
}
