//! 4-bit NormalFloat (NF4) quantization for frozen base weights
//!
//! NF4 maps each value to one of 16 code points placed at quantiles of a
//! standard normal distribution, normalized to [-1, 1]. Values are grouped in
//! blocks of [`NF4_BLOCK_SIZE`] elements and each block stores its absolute
//! maximum as the scale:
//!
//! - Quantization: q = argmin_i |x / absmax - CODE[i]|
//! - Dequantization: x ≈ CODE[q] * absmax
//!
//! Two 4-bit indices are packed per byte, the first one in the upper nibble.

use serde::{Deserialize, Serialize};

/// Block size for NF4 quantization (64 elements per block)
pub const NF4_BLOCK_SIZE: usize = 64;

/// NF4 code book (QLoRA, Dettmers et al. 2023)
pub const NF4_CODE: [f32; 16] = [
    -1.0,
    -0.696_192_8,
    -0.525_073_05,
    -0.394_917_5,
    -0.284_441_38,
    -0.184_773_43,
    -0.091_050_036,
    0.0,
    0.079_580_3,
    0.160_930_2,
    0.246_112_3,
    0.337_915_24,
    0.440_709_83,
    0.562_617,
    0.722_956_84,
    1.0,
];

/// NF4-encoded tensor with block-wise absmax scales
///
/// Memory layout:
/// - `scales`: one f32 per block, length = ceil(len / NF4_BLOCK_SIZE)
/// - `data`: packed code indices, 2 per byte
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Nf4Tensor {
    /// Absmax scale per block
    pub scales: Vec<f32>,
    /// Packed 4-bit code indices
    pub data: Vec<u8>,
    /// Original number of elements
    pub len: usize,
}

impl Nf4Tensor {
    /// Number of encoded elements
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get memory usage in bytes
    pub fn memory_bytes(&self) -> usize {
        self.scales.len() * std::mem::size_of::<f32>() + self.data.len()
    }

    /// Get compression ratio vs f32
    pub fn compression_ratio(&self) -> f32 {
        if self.memory_bytes() == 0 {
            return 1.0;
        }
        (self.len * std::mem::size_of::<f32>()) as f32 / self.memory_bytes() as f32
    }

    /// Code index of element `idx`
    fn code_index(&self, idx: usize) -> usize {
        let byte = self.data[idx / 2];
        let nibble = if idx % 2 == 0 { byte >> 4 } else { byte & 0x0F };
        nibble as usize
    }
}

/// Quantize f32 values to NF4 with block-wise absmax scaling
pub fn quantize_nf4(values: &[f32]) -> Nf4Tensor {
    let len = values.len();
    let num_blocks = len.div_ceil(NF4_BLOCK_SIZE);

    let mut scales = Vec::with_capacity(num_blocks);
    let mut data = vec![0u8; len.div_ceil(2)];

    for (block_idx, block) in values.chunks(NF4_BLOCK_SIZE).enumerate() {
        let absmax = block.iter().fold(0.0f32, |acc, v| acc.max(v.abs()));
        scales.push(absmax);

        let start = block_idx * NF4_BLOCK_SIZE;
        for (i, &val) in block.iter().enumerate() {
            let normalized = if absmax > 0.0 { val / absmax } else { 0.0 };
            let code = nearest_code(normalized);

            let idx = start + i;
            if idx % 2 == 0 {
                data[idx / 2] |= code << 4;
            } else {
                data[idx / 2] |= code;
            }
        }
    }

    Nf4Tensor { scales, data, len }
}

/// Dequantize NF4 values back to f32
pub fn dequantize_nf4(quantized: &Nf4Tensor) -> Vec<f32> {
    (0..quantized.len)
        .map(|idx| {
            let scale = quantized.scales[idx / NF4_BLOCK_SIZE];
            NF4_CODE[quantized.code_index(idx)] * scale
        })
        .collect()
}

/// Index of the code point closest to `x` (x already normalized to [-1, 1])
fn nearest_code(x: f32) -> u8 {
    let mut best = 0usize;
    let mut best_dist = f32::INFINITY;
    for (i, &code) in NF4_CODE.iter().enumerate() {
        let dist = (x - code).abs();
        if dist < best_dist {
            best = i;
            best_dist = dist;
        }
    }
    best as u8
}
