//! Backward operation trait

use super::Tensor;

/// Trait for backward pass operations
///
/// An op reads the gradient of the tensor it produced and accumulates into
/// its inputs. It never calls the backward ops of its inputs; [`backward`]
/// schedules every op of the graph exactly once.
///
/// [`backward`]: super::backward
pub trait BackwardOp {
    /// Tensors this op propagates gradients to
    fn inputs(&self) -> Vec<&Tensor>;

    /// Accumulate gradients into the inputs
    fn backward(&self);
}
