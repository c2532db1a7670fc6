//! DoRA (Weight-Decomposed Low-Rank Adaptation) norm computation
//!
//! DoRA splits the adapted weight into direction and magnitude:
//! `W' = m * (W + s·B@A) / ||W + s·B@A||_row`
//!
//! where `s = alpha / rank` and the norm is taken per output row across the
//! input dimension. Norms are floored at [`DORA_NORM_EPS`] so the division
//! by the norm is always defined.

use ndarray::{Array1, Array2};

/// Lower bound for combined-weight row norms
pub const DORA_NORM_EPS: f32 = 1e-6;

/// Combined weight R = W + scale * (B @ A), row-major out×in
///
/// # Arguments
/// * `weight` - Base weight [out_dim * in_dim]
/// * `lora_a` - A [rank * in_dim]
/// * `lora_b` - B [out_dim * rank]
pub fn combined_weight(
    weight: &Array1<f32>,
    lora_a: &Array1<f32>,
    lora_b: &Array1<f32>,
    out_dim: usize,
    in_dim: usize,
    rank: usize,
    scale: f32,
) -> Array1<f32> {
    assert_eq!(weight.len(), out_dim * in_dim, "base weight size mismatch");
    assert_eq!(lora_a.len(), rank * in_dim, "LoRA A size mismatch");
    assert_eq!(lora_b.len(), out_dim * rank, "LoRA B size mismatch");

    let a = Array2::from_shape_fn((rank, in_dim), |(r, i)| lora_a[r * in_dim + i]);
    let b = Array2::from_shape_fn((out_dim, rank), |(o, r)| lora_b[o * rank + r]);
    let delta: Array1<f32> = b.dot(&a).iter().copied().collect();
    weight + &(delta * scale)
}

/// Euclidean norm of each row of a row-major matrix, floored at [`DORA_NORM_EPS`]
pub fn row_norms(matrix: &Array1<f32>, rows: usize, cols: usize) -> Array1<f32> {
    assert_eq!(matrix.len(), rows * cols, "matrix size mismatch");
    (0..rows)
        .map(|r| {
            let row = matrix.slice(ndarray::s![r * cols..(r + 1) * cols]);
            row.dot(&row).sqrt()
        })
        .collect::<Array1<f32>>()
        .mapv_into(clamp_norm)
}

/// Apply the norm floor to a single value
pub fn clamp_norm(norm: f32) -> f32 {
    norm.max(DORA_NORM_EPS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    #[test]
    fn test_combined_weight_adds_scaled_product() {
        // W = I2, A = [1, 2], B = [3, 4]^T, scale = 0.5
        // B@A = [[3, 6], [4, 8]] -> R = [[2.5, 3], [2, 5]]
        let w = ndarray::arr1(&[1.0, 0.0, 0.0, 1.0]);
        let a = ndarray::arr1(&[1.0, 2.0]);
        let b = ndarray::arr1(&[3.0, 4.0]);
        let r = combined_weight(&w, &a, &b, 2, 2, 1, 0.5);
        let expected = [2.5, 3.0, 2.0, 5.0];
        for (got, want) in r.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(*got, *want);
        }
    }

    #[test]
    fn test_row_norms() {
        let m = ndarray::arr1(&[3.0, 4.0, 0.0, 0.0, 1.0, 0.0]);
        let n = row_norms(&m, 2, 3);
        assert_abs_diff_eq!(n[0], 5.0);
        assert_abs_diff_eq!(n[1], 1.0);
    }

    #[test]
    fn test_zero_row_is_floored() {
        let m = ndarray::arr1(&[0.0; 8]);
        let n = row_norms(&m, 2, 4);
        assert_abs_diff_eq!(n[0], DORA_NORM_EPS);
        assert_abs_diff_eq!(n[1], DORA_NORM_EPS);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_row_norms_never_below_floor(
            rows in 1usize..6,
            cols in 1usize..6,
            values in prop::collection::vec(-1e-3f32..1e-3, 36),
        ) {
            let m = Array1::from(values[..rows * cols].to_vec());
            for n in row_norms(&m, rows, cols) {
                prop_assert!(n >= DORA_NORM_EPS);
            }
        }

        #[test]
        fn prop_zero_b_leaves_weight_unchanged(
            out_dim in 1usize..5,
            in_dim in 1usize..5,
            rank in 1usize..4,
            scale in 0.1f32..10.0,
        ) {
            let w = Array1::from_iter((0..out_dim * in_dim).map(|i| (i as f32 * 0.3).sin()));
            let a = Array1::from_elem(rank * in_dim, 0.7);
            let b = Array1::zeros(out_dim * rank);
            let r = combined_weight(&w, &a, &b, out_dim, in_dim, rank, scale);
            prop_assert_eq!(r, w);
        }
    }
}
