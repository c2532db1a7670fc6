//! Quantization of frozen base weights
//!
//! Provides the NF4 (4-bit NormalFloat) codec used by QLoRA-style adapters:
//! base weights are stored compressed and decoded on the fly.

mod nf4;

pub use nf4::{dequantize_nf4, quantize_nf4, Nf4Tensor, NF4_BLOCK_SIZE, NF4_CODE};
