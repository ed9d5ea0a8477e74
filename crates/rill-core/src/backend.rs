use crate::dtype::DType;
use crate::error::Result;
use crate::layout::Layout;
use crate::shape::Shape;
use std::fmt;

// Backend — abstraction over compute devices
//
// Tensor<B> is generic over a Backend so the tensor and autodiff code in
// this crate never touches concrete storage. A backend supplies two
// associated types (its device handle and its storage buffer) plus one
// static method per operation category. All operations receive storage
// together with a Layout; the layout carries shape, strides and offset, so
// backends see views and broadcasts exactly as they are and decide
// themselves when to materialize contiguous data.

/// Identifies a compute device. The device handle owns per-device state
/// such as the random number generator.
pub trait BackendDevice: Clone + fmt::Debug + Send + Sync + 'static {
    /// A human-readable name for this device (e.g. "cpu").
    fn name(&self) -> String;
}

/// A storage buffer holding tensor data on a specific device.
pub trait BackendStorage: Clone + Send + Sync + 'static {
    /// The data type of the elements in this storage.
    fn dtype(&self) -> DType;

    /// Total number of elements in this storage.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// The op enums below are shared between dispatch and autodiff: the backend
// matches on them to run the right kernel, and the recorded Op variant keeps
// them so backward() knows which gradient rule applies.

/// Element-wise binary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Element-wise unary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Tanh,
    Sigmoid,
    Square,
}

/// Reduction operations along dimension(s).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Mean,
}

/// The main backend interface. Implementing this for a struct (e.g.
/// `CpuBackend`) makes it a complete compute backend for rill.
///
/// All operations are immutable: they take storage + layout and return new
/// storage. The only mutation path is `Tensor::update_data_inplace`, which
/// swaps a whole storage buffer behind its lock.
pub trait Backend: Clone + Send + Sync + fmt::Debug + 'static {
    /// The device type for this backend.
    type Device: BackendDevice;
    /// The storage type for this backend.
    type Storage: BackendStorage;

    //  Creation

    /// Allocate storage filled with zeros.
    fn zeros(shape: &Shape, dtype: DType, device: &Self::Device) -> Result<Self::Storage>;

    /// Allocate storage filled with ones.
    fn ones(shape: &Shape, dtype: DType, device: &Self::Device) -> Result<Self::Storage>;

    /// Allocate storage filled with a constant value.
    fn full(shape: &Shape, val: f64, dtype: DType, device: &Self::Device) -> Result<Self::Storage>;

    /// Create storage from a flat f64 slice, converting to the target dtype.
    fn from_f64_slice(data: &[f64], dtype: DType, device: &Self::Device) -> Result<Self::Storage>;

    /// Create storage with random uniform values in [0, 1), drawn from the
    /// device's generator.
    fn rand_uniform(shape: &Shape, dtype: DType, device: &Self::Device) -> Result<Self::Storage>;

    /// Create storage with standard normal values (mean 0, std 1), drawn
    /// from the device's generator.
    fn rand_normal(shape: &Shape, dtype: DType, device: &Self::Device) -> Result<Self::Storage>;

    //  Element-wise ops

    /// Apply a binary op element-wise. The layouts handle broadcasting and
    /// non-contiguous access; the result is contiguous in the broadcast shape.
    fn binary_op(
        op: BinaryOp,
        lhs: &Self::Storage,
        lhs_layout: &Layout,
        rhs: &Self::Storage,
        rhs_layout: &Layout,
    ) -> Result<Self::Storage>;

    /// Apply a unary op element-wise: result[i] = op(input[i]).
    fn unary_op(op: UnaryOp, input: &Self::Storage, layout: &Layout) -> Result<Self::Storage>;

    /// Affine transform: result = input * mul + add.
    fn affine(input: &Self::Storage, layout: &Layout, mul: f64, add: f64) -> Result<Self::Storage>;

    //  Reductions

    /// Reduce along specific dimensions.
    /// If `dims` is empty, reduce over all elements to a single value.
    fn reduce_op(
        op: ReduceOp,
        input: &Self::Storage,
        layout: &Layout,
        dims: &[usize],
        keep_dim: bool,
    ) -> Result<Self::Storage>;

    //  Matrix multiplication

    /// General matrix multiply: C = A @ B.
    /// Supports batched matmul for tensors with rank > 2.
    fn matmul(
        lhs: &Self::Storage,
        lhs_layout: &Layout,
        rhs: &Self::Storage,
        rhs_layout: &Layout,
    ) -> Result<Self::Storage>;

    //  Data movement

    /// Make a contiguous copy of the storage following the given layout.
    /// If the layout is already contiguous, this may just clone the storage.
    fn to_contiguous(input: &Self::Storage, layout: &Layout) -> Result<Self::Storage>;

    /// Copy data to a Vec<f64> on the host, in logical order.
    fn to_f64_vec(input: &Self::Storage, layout: &Layout) -> Result<Vec<f64>>;

    //  Concatenation

    /// Concatenate multiple storages along `dim` into one contiguous storage.
    /// Each entry is (storage, layout) so non-contiguous inputs are handled
    /// correctly. `out_shape` is the pre-validated output shape.
    fn cat(
        inputs: &[(&Self::Storage, &Layout)],
        out_shape: &Shape,
        dim: usize,
    ) -> Result<Self::Storage>;
}
