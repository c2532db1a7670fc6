//! Optimizer trait

use crate::Tensor;

/// Trait for optimization algorithms
///
/// Parameters are passed as the mutable references handed out by
/// [`LoRALinear::trainable_params`](crate::LoRALinear::trainable_params), so
/// updates land in the layer's own tensors.
pub trait Optimizer {
    /// Perform a single optimization step
    ///
    /// Parameters without a gradient are left unchanged.
    fn step(&mut self, params: &mut [&mut Tensor]);

    /// Zero out all gradients
    fn zero_grad(&mut self, params: &mut [&mut Tensor]) {
        for param in params.iter() {
            param.zero_grad();
        }
    }

    /// Get learning rate
    fn lr(&self) -> f32;

    /// Set learning rate
    fn set_lr(&mut self, lr: f32);
}
