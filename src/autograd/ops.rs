//! Autograd operations with backward passes

use super::{BackwardOp, Tensor};
use ndarray::Array1;
use rand::Rng;
use std::cell::RefCell;
use std::rc::Rc;

type GradCell = Rc<RefCell<Option<Array1<f32>>>>;

/// Add two tensors element-wise
///
/// The result takes the shape of `a`.
pub fn add(a: &Tensor, b: &Tensor) -> Tensor {
    assert_eq!(a.len(), b.len(), "add: length mismatch");
    let data = a.data() + b.data();
    let requires_grad = a.requires_grad() || b.requires_grad();

    let mut result = Tensor::new(data, requires_grad);
    result.set_shape(a.shape().to_vec());

    if requires_grad {
        let backward_op = Rc::new(AddBackward {
            a: a.clone(),
            b: b.clone(),
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct AddBackward {
    a: Tensor,
    b: Tensor,
    result_grad: GradCell,
}

impl BackwardOp for AddBackward {
    fn inputs(&self) -> Vec<&Tensor> {
        vec![&self.a, &self.b]
    }

    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                self.a.accumulate_grad(grad.clone());
            }
            if self.b.requires_grad() {
                self.b.accumulate_grad(grad.clone());
            }
        }
    }
}

/// Multiply two tensors element-wise
pub fn mul(a: &Tensor, b: &Tensor) -> Tensor {
    assert_eq!(a.len(), b.len(), "mul: length mismatch");
    let data = a.data() * b.data();
    let requires_grad = a.requires_grad() || b.requires_grad();

    let mut result = Tensor::new(data, requires_grad);
    result.set_shape(a.shape().to_vec());

    if requires_grad {
        let backward_op = Rc::new(MulBackward {
            a: a.clone(),
            b: b.clone(),
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct MulBackward {
    a: Tensor,
    b: Tensor,
    result_grad: GradCell,
}

impl BackwardOp for MulBackward {
    fn inputs(&self) -> Vec<&Tensor> {
        vec![&self.a, &self.b]
    }

    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                // ∂L/∂a = ∂L/∂out * b
                self.a.accumulate_grad(grad * self.b.data());
            }
            if self.b.requires_grad() {
                // ∂L/∂b = ∂L/∂out * a
                self.b.accumulate_grad(grad * self.a.data());
            }
        }
    }
}

/// Divide two tensors element-wise
pub fn div(a: &Tensor, b: &Tensor) -> Tensor {
    assert_eq!(a.len(), b.len(), "div: length mismatch");
    let data = a.data() / b.data();
    let requires_grad = a.requires_grad() || b.requires_grad();

    let mut result = Tensor::new(data, requires_grad);
    result.set_shape(a.shape().to_vec());

    if requires_grad {
        let backward_op = Rc::new(DivBackward {
            a: a.clone(),
            b: b.clone(),
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct DivBackward {
    a: Tensor,
    b: Tensor,
    result_grad: GradCell,
}

impl BackwardOp for DivBackward {
    fn inputs(&self) -> Vec<&Tensor> {
        vec![&self.a, &self.b]
    }

    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                // ∂L/∂a = ∂L/∂out / b
                self.a.accumulate_grad(grad / self.b.data());
            }
            if self.b.requires_grad() {
                // ∂L/∂b = -∂L/∂out * a / b²
                let b_sq = self.b.data().mapv(|v| v * v);
                let grad_b = -(grad * self.a.data()) / &b_sq;
                self.b.accumulate_grad(grad_b);
            }
        }
    }
}

/// Scale tensor by a scalar
pub fn scale(a: &Tensor, factor: f32) -> Tensor {
    let data = a.data() * factor;
    let requires_grad = a.requires_grad();

    let mut result = Tensor::new(data, requires_grad);
    result.set_shape(a.shape().to_vec());

    if requires_grad {
        let backward_op = Rc::new(ScaleBackward {
            a: a.clone(),
            factor,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct ScaleBackward {
    a: Tensor,
    factor: f32,
    result_grad: GradCell,
}

impl BackwardOp for ScaleBackward {
    fn inputs(&self) -> Vec<&Tensor> {
        vec![&self.a]
    }

    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                // ∂L/∂a = ∂L/∂out * factor
                self.a.accumulate_grad(grad * self.factor);
            }
        }
    }
}

/// Sum all elements
pub fn sum(a: &Tensor) -> Tensor {
    let data = Array1::from(vec![a.data().sum()]);
    let requires_grad = a.requires_grad();

    let mut result = Tensor::new(data, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(SumBackward {
            a: a.clone(),
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct SumBackward {
    a: Tensor,
    result_grad: GradCell,
}

impl BackwardOp for SumBackward {
    fn inputs(&self) -> Vec<&Tensor> {
        vec![&self.a]
    }

    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                // ∂L/∂a = ∂L/∂sum * 1 (broadcast)
                let grad_a = Array1::from_elem(self.a.len(), grad[0]);
                self.a.accumulate_grad(grad_a);
            }
        }
    }
}

/// Affine transform y = x @ W^T + b
///
/// - `x` holds `rows` rows of `d_in` features (any leading shape)
/// - `weight` is d_out×d_in, row-major
/// - `bias` is optional, length d_out
///
/// The result keeps the leading dimensions of `x` and replaces the last one
/// with `d_out`.
pub fn linear(x: &Tensor, weight: &Tensor, bias: Option<&Tensor>, d_in: usize, d_out: usize) -> Tensor {
    assert!(d_in > 0, "linear: d_in must be positive");
    assert_eq!(x.len() % d_in, 0, "linear: input size is not a multiple of d_in");
    assert_eq!(weight.len(), d_out * d_in, "linear: weight size mismatch");
    if let Some(b) = bias {
        assert_eq!(b.len(), d_out, "linear: bias size mismatch");
    }
    let rows = x.len() / d_in;

    let x_data = x.data();
    let w_data = weight.data();
    let mut out = vec![0.0; rows * d_out];
    for r in 0..rows {
        let x_row = r * d_in;
        for o in 0..d_out {
            let w_row = o * d_in;
            let mut acc = 0.0;
            for i in 0..d_in {
                acc += x_data[x_row + i] * w_data[w_row + i];
            }
            if let Some(b) = bias {
                acc += b.data()[o];
            }
            out[r * d_out + o] = acc;
        }
    }

    let requires_grad = x.requires_grad()
        || weight.requires_grad()
        || bias.is_some_and(|b| b.requires_grad());
    let mut result = Tensor::new(Array1::from(out), requires_grad);
    let out_shape = if x.shape().last() == Some(&d_in) {
        replace_last_dim(x.shape(), d_out)
    } else {
        vec![rows, d_out]
    };
    result.set_shape(out_shape);

    if requires_grad {
        let backward_op = Rc::new(LinearBackward {
            x: x.clone(),
            weight: weight.clone(),
            bias: bias.cloned(),
            rows,
            d_in,
            d_out,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct LinearBackward {
    x: Tensor,
    weight: Tensor,
    bias: Option<Tensor>,
    rows: usize,
    d_in: usize,
    d_out: usize,
    result_grad: GradCell,
}

impl BackwardOp for LinearBackward {
    fn inputs(&self) -> Vec<&Tensor> {
        let mut inputs = vec![&self.x, &self.weight];
        inputs.extend(self.bias.as_ref());
        inputs
    }

    fn backward(&self) {
        if let Some(grad_output) = self.result_grad.borrow().as_ref() {
            let (rows, d_in, d_out) = (self.rows, self.d_in, self.d_out);

            // ∂L/∂x = ∂L/∂y @ W
            if self.x.requires_grad() {
                let w = self.weight.data();
                let mut grad_x = vec![0.0; rows * d_in];
                for r in 0..rows {
                    for o in 0..d_out {
                        let g = grad_output[r * d_out + o];
                        for i in 0..d_in {
                            grad_x[r * d_in + i] += g * w[o * d_in + i];
                        }
                    }
                }
                self.x.accumulate_grad(Array1::from(grad_x));
            }

            // ∂L/∂W = (∂L/∂y)^T @ x
            if self.weight.requires_grad() {
                let x = self.x.data();
                let mut grad_w = vec![0.0; d_out * d_in];
                for r in 0..rows {
                    for o in 0..d_out {
                        let g = grad_output[r * d_out + o];
                        for i in 0..d_in {
                            grad_w[o * d_in + i] += g * x[r * d_in + i];
                        }
                    }
                }
                self.weight.accumulate_grad(Array1::from(grad_w));
            }

            // ∂L/∂b = Σ_rows ∂L/∂y
            if let Some(bias) = self.bias.as_ref().filter(|b| b.requires_grad()) {
                let mut grad_b = vec![0.0; d_out];
                for r in 0..rows {
                    for (o, gb) in grad_b.iter_mut().enumerate() {
                        *gb += grad_output[r * d_out + o];
                    }
                }
                bias.accumulate_grad(Array1::from(grad_b));
            }
        }
    }
}

/// Inverted dropout
///
/// Each element is zeroed with probability `p`; survivors are scaled by
/// `1 / (1 - p)`. With `p == 0` the input is returned as-is.
pub fn dropout<R: Rng>(a: &Tensor, p: f32, rng: &mut R) -> Tensor {
    assert!((0.0..1.0).contains(&p), "dropout: p must be in [0, 1)");
    if p == 0.0 {
        return a.clone();
    }

    let keep_scale = 1.0 / (1.0 - p);
    let mask: Array1<f32> = (0..a.len())
        .map(|_| if rng.random::<f32>() < p { 0.0 } else { keep_scale })
        .collect();
    let data = a.data() * &mask;
    let requires_grad = a.requires_grad();

    let mut result = Tensor::new(data, requires_grad);
    result.set_shape(a.shape().to_vec());

    if requires_grad {
        let backward_op = Rc::new(DropoutBackward {
            a: a.clone(),
            mask,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct DropoutBackward {
    a: Tensor,
    mask: Array1<f32>,
    result_grad: GradCell,
}

impl BackwardOp for DropoutBackward {
    fn inputs(&self) -> Vec<&Tensor> {
        vec![&self.a]
    }

    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                self.a.accumulate_grad(grad * &self.mask);
            }
        }
    }
}

/// Multiply every row of `x` element-wise by the vector `s`
///
/// `x` holds rows of `cols` elements (any leading shape); `s` has length
/// `cols` and is broadcast over all rows.
pub fn mul_broadcast_rows(x: &Tensor, s: &Tensor, cols: usize) -> Tensor {
    assert!(cols > 0, "mul_broadcast_rows: cols must be positive");
    assert_eq!(s.len(), cols, "mul_broadcast_rows: scale length mismatch");
    assert_eq!(x.len() % cols, 0, "mul_broadcast_rows: input is not a multiple of cols");
    let rows = x.len() / cols;

    let s_data = s.data();
    let data: Array1<f32> = x
        .data()
        .iter()
        .enumerate()
        .map(|(idx, &v)| v * s_data[idx % cols])
        .collect();

    let requires_grad = x.requires_grad() || s.requires_grad();
    let mut result = Tensor::new(data, requires_grad);
    result.set_shape(x.shape().to_vec());

    if requires_grad {
        let backward_op = Rc::new(MulBroadcastRowsBackward {
            x: x.clone(),
            s: s.clone(),
            rows,
            cols,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct MulBroadcastRowsBackward {
    x: Tensor,
    s: Tensor,
    rows: usize,
    cols: usize,
    result_grad: GradCell,
}

impl BackwardOp for MulBroadcastRowsBackward {
    fn inputs(&self) -> Vec<&Tensor> {
        vec![&self.x, &self.s]
    }

    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            let cols = self.cols;

            if self.x.requires_grad() {
                let s = self.s.data();
                let grad_x: Array1<f32> = grad
                    .iter()
                    .enumerate()
                    .map(|(idx, &g)| g * s[idx % cols])
                    .collect();
                self.x.accumulate_grad(grad_x);
            }

            // ∂L/∂s_c = Σ_r ∂L/∂y_rc * x_rc
            if self.s.requires_grad() {
                let x = self.x.data();
                let mut grad_s = Array1::zeros(cols);
                for r in 0..self.rows {
                    for c in 0..cols {
                        grad_s[c] += grad[r * cols + c] * x[r * cols + c];
                    }
                }
                self.s.accumulate_grad(grad_s);
            }
        }
    }
}

fn replace_last_dim(shape: &[usize], last: usize) -> Vec<usize> {
    let mut out = shape.to_vec();
    match out.last_mut() {
        Some(dim) => *dim = last,
        None => out.push(last),
    }
    out
}
