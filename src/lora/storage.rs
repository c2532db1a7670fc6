//! Storage of frozen weights: plain f32 or NF4-quantized
//!
//! The representation is chosen once when the layer is built, so every
//! forward pass of a given instance takes the same path.

use crate::quant::{dequantize_nf4, quantize_nf4, Nf4Tensor};
use crate::Tensor;
use ndarray::Array1;

/// Frozen weight values in either full precision or NF4
#[derive(Clone, Debug)]
pub enum WeightStorage {
    /// Full-precision tensor (never requires gradients)
    Plain(Tensor),
    /// NF4-quantized values, decoded on use
    Nf4(Nf4Tensor),
}

impl WeightStorage {
    /// Store values in full precision
    pub fn plain(values: Vec<f32>) -> Self {
        Self::Plain(Tensor::from_vec(values, false))
    }

    /// Store values NF4-quantized
    pub fn nf4(values: &[f32]) -> Self {
        Self::Nf4(quantize_nf4(values))
    }

    /// Store `values` using the same representation as `self`
    pub fn encode_like(&self, values: Vec<f32>) -> Self {
        match self {
            Self::Plain(_) => Self::plain(values),
            Self::Nf4(_) => Self::nf4(&values),
        }
    }

    /// Whether values are stored quantized
    pub fn is_quantized(&self) -> bool {
        matches!(self, Self::Nf4(_))
    }

    /// Number of stored elements
    pub fn len(&self) -> usize {
        match self {
            Self::Plain(t) => t.len(),
            Self::Nf4(q) => q.len(),
        }
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Full-precision copy of the stored values
    pub fn dequantize(&self) -> Array1<f32> {
        match self {
            Self::Plain(t) => t.data().clone(),
            Self::Nf4(q) => Array1::from(dequantize_nf4(q)),
        }
    }

    /// Frozen tensor view used in the forward graph
    ///
    /// Plain storage hands out a clone of its tensor; NF4 storage decodes into
    /// a fresh tensor that does not require gradients.
    pub fn to_tensor(&self) -> Tensor {
        match self {
            Self::Plain(t) => t.clone(),
            Self::Nf4(q) => Tensor::from_vec(dequantize_nf4(q), false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_plain_is_exact_and_frozen() {
        let storage = WeightStorage::plain(vec![0.1, -0.2, 0.3]);
        assert!(!storage.is_quantized());
        assert_eq!(storage.len(), 3);
        assert!(!storage.to_tensor().requires_grad());
        assert_abs_diff_eq!(storage.dequantize()[1], -0.2);
    }

    #[test]
    fn test_nf4_decodes_close_to_input() {
        let values = vec![1.0, -0.5, 0.25, 0.0];
        let storage = WeightStorage::nf4(&values);
        assert!(storage.is_quantized());
        let decoded = storage.dequantize();
        for (a, b) in values.iter().zip(decoded.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 0.1);
        }
    }

    #[test]
    fn test_encode_like_keeps_representation() {
        let plain = WeightStorage::plain(vec![1.0]);
        let nf4 = WeightStorage::nf4(&[1.0]);
        assert!(!plain.encode_like(vec![2.0, 3.0]).is_quantized());
        assert!(nf4.encode_like(vec![2.0, 3.0]).is_quantized());
        assert_eq!(nf4.encode_like(vec![2.0, 3.0]).len(), 2);
    }
}
