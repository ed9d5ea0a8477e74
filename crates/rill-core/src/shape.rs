use crate::error::{Error, Result};
use std::fmt;

/// The logical dimensions of a tensor, e.g. `[batch, seq_len, features]`.
///
/// A rank-0 shape (no dimensions) is a scalar with exactly one element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape(Vec<usize>);

impl Shape {
    pub fn new(dims: Vec<usize>) -> Self {
        Shape(dims)
    }

    /// The dimensions as a slice.
    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Total number of elements. A scalar (rank 0) has one element.
    pub fn elem_count(&self) -> usize {
        self.0.iter().product::<usize>().max(1)
    }

    /// Size of one dimension, with a range check.
    pub fn dim(&self, d: usize) -> Result<usize> {
        if d >= self.rank() {
            return Err(Error::DimOutOfRange {
                dim: d,
                rank: self.rank(),
            });
        }
        Ok(self.0[d])
    }

    /// Row-major (C-order) strides for a contiguous tensor of this shape.
    ///
    /// For `[2, 3, 4]` the strides are `[12, 4, 1]`: moving one step along
    /// dim 0 skips 12 elements in flat storage, one step along dim 2 skips 1.
    pub fn stride_contiguous(&self) -> Vec<usize> {
        let mut strides = vec![0; self.rank()];
        let mut acc = 1;
        for (i, &dim) in self.0.iter().enumerate().rev() {
            strides[i] = acc;
            acc *= dim;
        }
        strides
    }

    /// Compute the shape that results from broadcasting `self` with `other`.
    ///
    /// Dimensions are aligned from the right. At each position the sizes must
    /// be equal, or one of them must be 1 (that side is then repeated).
    ///
    /// `[3, 1] ⊕ [1, 4] → [3, 4]`, `[2, 3] ⊕ [3] → [2, 3]`
    pub fn broadcast_shape(&self, other: &Shape) -> Result<Shape> {
        let rank = self.rank().max(other.rank());
        let mut dims = vec![0; rank];
        for i in 0..rank {
            // Index from the right; missing dims count as 1.
            let a = if i < self.rank() {
                self.0[self.rank() - 1 - i]
            } else {
                1
            };
            let b = if i < other.rank() {
                other.0[other.rank() - 1 - i]
            } else {
                1
            };
            dims[rank - 1 - i] = if a == b || b == 1 {
                a
            } else if a == 1 {
                b
            } else {
                return Err(Error::msg(format!(
                    "cannot broadcast shapes {} and {}",
                    self, other
                )));
            };
        }
        Ok(Shape(dims))
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, "]")
    }
}

// From impls so call sites can write shapes naturally:
//   Tensor::zeros((2, 3), ...), t.reshape((batch, seq_len, 1)), ...

impl From<()> for Shape {
    fn from(_: ()) -> Self {
        Shape(vec![])
    }
}

impl From<usize> for Shape {
    fn from(d: usize) -> Self {
        Shape(vec![d])
    }
}

impl From<(usize,)> for Shape {
    fn from(d: (usize,)) -> Self {
        Shape(vec![d.0])
    }
}

impl From<(usize, usize)> for Shape {
    fn from(d: (usize, usize)) -> Self {
        Shape(vec![d.0, d.1])
    }
}

impl From<(usize, usize, usize)> for Shape {
    fn from(d: (usize, usize, usize)) -> Self {
        Shape(vec![d.0, d.1, d.2])
    }
}

impl From<(usize, usize, usize, usize)> for Shape {
    fn from(d: (usize, usize, usize, usize)) -> Self {
        Shape(vec![d.0, d.1, d.2, d.3])
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape(dims.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elem_count() {
        assert_eq!(Shape::from((2, 3, 4)).elem_count(), 24);
        assert_eq!(Shape::from(()).elem_count(), 1); // scalar
        assert_eq!(Shape::from(5).elem_count(), 5);
    }

    #[test]
    fn test_stride_contiguous() {
        assert_eq!(Shape::from((2, 3, 4)).stride_contiguous(), vec![12, 4, 1]);
        assert_eq!(Shape::from((4, 6)).stride_contiguous(), vec![6, 1]);
        assert_eq!(Shape::from(()).stride_contiguous(), Vec::<usize>::new());
    }

    #[test]
    fn test_dim_out_of_range() {
        let s = Shape::from((2, 3));
        assert_eq!(s.dim(1).unwrap(), 3);
        assert!(s.dim(2).is_err());
    }

    #[test]
    fn test_broadcast_shape() {
        let a = Shape::from((3, 1));
        let b = Shape::from((1, 4));
        assert_eq!(a.broadcast_shape(&b).unwrap(), Shape::from((3, 4)));

        // Lower rank is padded with leading 1s.
        let a = Shape::from((2, 3));
        let b = Shape::from(3);
        assert_eq!(a.broadcast_shape(&b).unwrap(), Shape::from((2, 3)));

        // Incompatible sizes.
        let a = Shape::from((2, 3));
        let b = Shape::from((4, 3));
        assert!(a.broadcast_shape(&b).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Shape::from((2, 3)).to_string(), "[2, 3]");
        assert_eq!(Shape::from(()).to_string(), "[]");
    }
}
