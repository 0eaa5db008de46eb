//! Host-side tensors.
//!
//! Parameters, segmentation maps and input volumes cross crate boundaries as
//! row-major `f32` buffers with an explicit shape. Only the burn layer turns
//! them into device tensors.

use std::collections::BTreeMap;

use crate::error::{CoreError, Result};

/// Named parameter tensors of a network, ordered by name.
pub type StateDict = BTreeMap<String, HostTensor>;

/// Row-major `f32` tensor living in host memory.
#[derive(Debug, Clone, PartialEq)]
pub struct HostTensor {
    shape: Vec<usize>,
    values: Vec<f32>,
}

impl HostTensor {
    /// Create a tensor, checking that `values` fills `shape` exactly.
    pub fn new(shape: Vec<usize>, values: Vec<f32>) -> Result<Self> {
        let expected = shape.iter().product::<usize>();
        if expected != values.len() {
            return Err(CoreError::ShapeMismatch {
                expected,
                got: values.len(),
            });
        }
        Ok(Self { shape, values })
    }

    /// Tensor of the given shape filled with `value`.
    pub fn full(shape: Vec<usize>, value: f32) -> Self {
        let numel = shape.iter().product();
        Self {
            shape,
            values: vec![value; numel],
        }
    }

    /// Tensor of zeros.
    pub fn zeros(shape: Vec<usize>) -> Self {
        Self::full(shape, 0.0)
    }

    /// Dimensions.
    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of dimensions.
    #[inline]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Total element count.
    #[inline]
    pub fn numel(&self) -> usize {
        self.values.len()
    }

    /// Flat values.
    #[inline]
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Mutable flat values.
    #[inline]
    pub fn values_mut(&mut self) -> &mut [f32] {
        &mut self.values
    }

    /// Consume into `(shape, values)`.
    pub fn into_parts(self) -> (Vec<usize>, Vec<f32>) {
        (self.shape, self.values)
    }

    /// Row-major strides in elements.
    pub fn strides(&self) -> Vec<usize> {
        let mut strides = vec![1; self.shape.len()];
        for d in (0..self.shape.len().saturating_sub(1)).rev() {
            strides[d] = strides[d + 1] * self.shape[d + 1];
        }
        strides
    }

    /// Select entry `index` of the leading dimension, keeping that dimension with size 1.
    pub fn select_leading(&self, index: usize) -> Result<Self> {
        let len = self.shape.first().copied().unwrap_or(0);
        if index >= len {
            return Err(CoreError::IndexOutOfBounds { index, len });
        }
        let chunk = self.values.len() / len;
        let mut shape = self.shape.clone();
        shape[0] = 1;
        Ok(Self {
            shape,
            values: self.values[index * chunk..(index + 1) * chunk].to_vec(),
        })
    }

    /// Replace every value above `ceiling` with zero.
    pub fn zero_above(&mut self, ceiling: f32) {
        for v in &mut self.values {
            if *v > ceiling {
                *v = 0.0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_checks_shape() {
        assert!(HostTensor::new(vec![2, 3], vec![0.0; 6]).is_ok());
        assert_eq!(
            HostTensor::new(vec![2, 3], vec![0.0; 5]),
            Err(CoreError::ShapeMismatch {
                expected: 6,
                got: 5
            })
        );
    }

    #[test]
    fn test_strides() {
        let t = HostTensor::zeros(vec![2, 3, 4]);
        assert_eq!(t.strides(), vec![12, 4, 1]);
        assert_eq!(HostTensor::zeros(vec![5]).strides(), vec![1]);
    }

    #[test]
    fn test_select_leading() {
        let t = HostTensor::new(vec![2, 1, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let second = t.select_leading(1).unwrap();
        assert_eq!(second.shape(), &[1, 1, 2]);
        assert_eq!(second.values(), &[3.0, 4.0]);
        assert!(t.select_leading(2).is_err());
    }

    #[test]
    fn test_zero_above() {
        let mut t = HostTensor::new(vec![4], vec![1.0, 5.0, 6.0, 9.0]).unwrap();
        t.zero_above(5.0);
        assert_eq!(t.values(), &[1.0, 5.0, 0.0, 0.0]);
    }
}
