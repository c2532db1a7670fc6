//! Tape-based autograd engine
//!
//! Provides automatic differentiation using a computational graph with gradient tape.

mod backward;
mod context;
mod ops;
mod tensor;


pub use backward::BackwardOp;
pub use context::{Context, DEFAULT_SEED};
pub use ops::*;
pub use tensor::Tensor;

use ndarray::Array1;
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

/// Perform backward pass on a tensor
///
/// Ops run in reverse topological order, so every op sees the complete
/// gradient of its result before passing it on, however many consumers the
/// result has.
pub fn backward(tensor: &mut Tensor, grad_output: Option<Array1<f32>>) {
    if let Some(grad) = grad_output {
        tensor.set_grad(grad);
    } else {
        // Initialize with ones for scalar loss
        let ones = Array1::ones(tensor.data().len());
        tensor.set_grad(ones);
    }

    for op in topological_order(tensor) {
        op.backward();
    }
}

/// Graph nodes are identified by their gradient cell, which clones share
type NodeKey = *const RefCell<Option<Array1<f32>>>;

/// Backward ops reachable from `root`, consumers before producers
fn topological_order(root: &Tensor) -> Vec<Rc<dyn BackwardOp>> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(root, &mut visited, &mut order);
    order.reverse();
    order
}

fn visit(tensor: &Tensor, visited: &mut HashSet<NodeKey>, order: &mut Vec<Rc<dyn BackwardOp>>) {
    let Some(op) = tensor.backward_op() else {
        return;
    };
    if !visited.insert(Rc::as_ptr(&tensor.grad_cell())) {
        return;
    }
    for input in op.inputs() {
        visit(input, visited, order);
    }
    order.push(op);
}
