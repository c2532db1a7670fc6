//! # Entrenar PEFT: low-rank adapted linear layers
//!
//! A LoRA linear layer on top of a small tape-based autograd engine, with
//! optional DoRA magnitude decomposition and an NF4-quantized frozen base.
//!
//! ## Architecture
//!
//! - **autograd**: Tape-based automatic differentiation
//! - **lora**: `LoRALinear` layer, configuration, initializers and DoRA norms
//! - **quant**: NF4 block-wise 4-bit quantization
//! - **optim**: SGD over the layer's trainable parameters
//!
//! ## Example
//!
//! ```
//! use entrenar_peft::{Context, LoRALinear, LoRALinearConfig, Tensor};
//!
//! let config = LoRALinearConfig::new(4, 2, 1, 1.0).with_dora(true);
//! let mut layer = LoRALinear::new(&config).unwrap();
//! layer.init_dora().unwrap();
//!
//! let x = Tensor::from_vec(vec![1.0, 1.0, 1.0, 1.0], false);
//! let y = layer.forward(&mut Context::new(), &x).unwrap();
//! assert_eq!(y.shape(), &[2]);
//! ```

pub mod autograd;
pub mod lora;
pub mod optim;
pub mod quant;

pub mod error;

// Re-export commonly used types
pub use autograd::{backward, Context, Tensor};
pub use error::{Error, Result};
pub use lora::{LoRALinear, LoRALinearConfig, WeightStorage};
