//! LoRA (Low-Rank Adaptation) linear layer
//!
//! A frozen base weight plus a trainable low-rank update, with optional
//! weight-decomposed magnitude (DoRA) and an optional NF4-quantized base.

mod config;
mod dora;
mod init;
mod layer;
mod storage;

pub use config::LoRALinearConfig;
pub use dora::{combined_weight, row_norms, DORA_NORM_EPS};
pub use init::{kaiming_uniform, linear_bias, linear_weight};
pub use layer::{LoRALinear, BIAS, LORA_A, LORA_B, LORA_M, WEIGHT};
pub use storage::WeightStorage;
