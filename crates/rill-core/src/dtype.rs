use std::fmt;

// DType — Supported numeric data types
//
// Every tensor carries a DType so operations can dispatch to the correct
// typed implementation at runtime. Sequence regression is floating-point
// work, so two types cover it:
//
//   F32 — 32-bit float, the default workhorse
//   F64 — 64-bit float, for high-precision runs and numeric tests

/// Enum of all supported element data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F32,
    F64,
}

impl DType {
    /// Size of one element in bytes.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F64 => 8,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DType::F32 => "f32",
            DType::F64 => "f64",
        };
        write!(f, "{}", s)
    }
}

// WithDType — Trait that connects Rust element types to the DType enum
//
// Implementing this for f32 and f64 lets backend code stay generic:
//
//   fn gather<T: WithDType>(data: &[T], layout: &Layout) -> Vec<T> { ... }
//
// with the runtime DType recovered from T::DTYPE.

/// Trait implemented by Rust types that can be stored in a tensor.
///
/// Provides the mapping between the concrete Rust type and the DType enum,
/// plus conversions to/from f64 for host-side numeric code.
pub trait WithDType: Copy + Send + Sync + 'static + num_traits::NumCast + std::fmt::Debug {
    /// The corresponding DType enum variant.
    const DTYPE: DType;

    /// Convert this value to f64 (for generic numeric code).
    fn to_f64(self) -> f64;

    /// Create a value of this type from f64.
    fn from_f64(v: f64) -> Self;
}

impl WithDType for f32 {
    const DTYPE: DType = DType::F32;
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn from_f64(v: f64) -> Self {
        v as f32
    }
}

impl WithDType for f64 {
    const DTYPE: DType = DType::F64;
    fn to_f64(self) -> f64 {
        self
    }
    fn from_f64(v: f64) -> Self {
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_size() {
        assert_eq!(DType::F32.size_in_bytes(), 4);
        assert_eq!(DType::F64.size_in_bytes(), 8);
    }

    #[test]
    fn test_dtype_display() {
        assert_eq!(DType::F32.to_string(), "f32");
        assert_eq!(DType::F64.to_string(), "f64");
    }

    #[test]
    fn test_with_dtype_f32() {
        assert_eq!(f32::DTYPE, DType::F32);
        assert_eq!(f32::from_f64(3.14).to_f64(), 3.140000104904175); // f32 precision
    }

    #[test]
    fn test_with_dtype_roundtrip() {
        let v: f64 = 42.0;
        assert_eq!(f64::from_f64(v).to_f64(), v);
    }
}
