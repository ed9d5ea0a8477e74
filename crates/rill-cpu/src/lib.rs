//! # rill-cpu
//!
//! CPU backend for rill. Storage is a plain `Vec` per dtype; every operation
//! reads its inputs through their layouts, so views (transpose, narrow) and
//! broadcasts need no copies on the way in. Matmul is parallelized with
//! rayon across output rows.
//!
//! The device owns a seedable random number generator. All random tensor
//! creation draws from it, which makes whole training runs reproducible:
//!
//! ```ignore
//! let device = CpuDevice::seeded(42);
//! let t = Tensor::<CpuBackend>::randn((3, 4), DType::F64, &device)?;
//! ```

use std::fmt;
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::SeedableRng;

use rill_core::backend::{BackendDevice, BackendStorage};
use rill_core::{DType, Tensor};

mod ops;

/// The CPU compute device. Cloning shares the underlying RNG, so every
/// tensor handle created on the same device draws from one stream.
#[derive(Clone)]
pub struct CpuDevice {
    pub(crate) rng: Arc<Mutex<StdRng>>,
}

impl CpuDevice {
    /// A device seeded from OS entropy.
    pub fn new() -> Self {
        CpuDevice {
            rng: Arc::new(Mutex::new(StdRng::from_entropy())),
        }
    }

    /// A device with a fixed seed. Two devices built with the same seed
    /// produce identical random tensors in identical call order.
    pub fn seeded(seed: u64) -> Self {
        CpuDevice {
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }

    /// Reset the device's generator to a fixed seed.
    pub fn set_seed(&self, seed: u64) {
        let mut rng = self.rng.lock().expect("rng lock poisoned");
        *rng = StdRng::seed_from_u64(seed);
    }
}

impl Default for CpuDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CpuDevice")
    }
}

impl BackendDevice for CpuDevice {
    fn name(&self) -> String {
        "cpu".to_string()
    }
}

/// Flat element buffer, one variant per supported dtype.
#[derive(Debug, Clone)]
pub enum CpuStorage {
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl BackendStorage for CpuStorage {
    fn dtype(&self) -> DType {
        match self {
            CpuStorage::F32(_) => DType::F32,
            CpuStorage::F64(_) => DType::F64,
        }
    }

    fn len(&self) -> usize {
        match self {
            CpuStorage::F32(v) => v.len(),
            CpuStorage::F64(v) => v.len(),
        }
    }
}

/// Marker type implementing [`rill_core::backend::Backend`] for the CPU.
#[derive(Debug, Clone)]
pub struct CpuBackend;

/// Tensor on the CPU backend.
pub type CpuTensor = Tensor<CpuBackend>;
