//! Optimizers for the trainable adapter parameters

mod optimizer;
mod sgd;

pub use optimizer::Optimizer;
pub use sgd::SGD;
