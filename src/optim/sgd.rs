//! Stochastic Gradient Descent optimizer

use super::Optimizer;
use crate::Tensor;
use ndarray::Array1;

/// SGD optimizer with optional momentum
#[derive(Debug, Clone)]
pub struct SGD {
    lr: f32,
    momentum: f32,
    velocities: Vec<Option<Array1<f32>>>,
}

impl SGD {
    /// Create a new SGD optimizer
    pub fn new(lr: f32, momentum: f32) -> Self {
        Self {
            lr,
            momentum,
            velocities: Vec::new(),
        }
    }

    /// Get momentum
    pub fn momentum(&self) -> f32 {
        self.momentum
    }

    /// Initialize velocities if the parameter list changed
    fn ensure_velocities(&mut self, count: usize) {
        if self.velocities.len() != count {
            self.velocities = vec![None; count];
        }
    }
}

impl Optimizer for SGD {
    fn step(&mut self, params: &mut [&mut Tensor]) {
        self.ensure_velocities(params.len());

        for (i, param) in params.iter_mut().enumerate() {
            let Some(grad) = param.grad() else {
                continue;
            };

            if self.momentum > 0.0 {
                // v = momentum * v - lr * grad
                let velocity = match &self.velocities[i] {
                    Some(v) => v * self.momentum - &grad * self.lr,
                    None => &grad * (-self.lr),
                };

                *param.data_mut() += &velocity;
                self.velocities[i] = Some(velocity);
            } else {
                // param -= lr * grad
                param.data_mut().scaled_add(-self.lr, &grad);
            }
        }
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    /// Run `iterations` steps on f(x) = x² and report whether all values end
    /// below `threshold`
    fn converges_on_quadratic(mut optimizer: SGD, iterations: usize, threshold: f32) -> bool {
        let mut param = Tensor::from_vec(vec![3.0, -2.0, 1.5, -2.5], true);

        for _ in 0..iterations {
            // ∇(x²) = 2x
            let grad = param.data().mapv(|x| 2.0 * x);
            param.set_grad(grad);
            optimizer.step(&mut [&mut param]);
        }

        param.data().iter().all(|&val| val.abs() < threshold)
    }

    #[test]
    fn test_plain_step() {
        let mut param = Tensor::from_vec(vec![1.0, 2.0], true);
        param.set_grad(ndarray::arr1(&[0.5, -1.0]));

        let mut sgd = SGD::new(0.1, 0.0);
        sgd.step(&mut [&mut param]);

        assert_abs_diff_eq!(param.data()[0], 0.95);
        assert_abs_diff_eq!(param.data()[1], 2.1);
    }

    #[test]
    fn test_momentum_accumulates() {
        let mut param = Tensor::from_vec(vec![0.0], true);
        let mut sgd = SGD::new(1.0, 0.5);

        param.set_grad(ndarray::arr1(&[1.0]));
        sgd.step(&mut [&mut param]);
        assert_abs_diff_eq!(param.data()[0], -1.0);

        // v = 0.5 * -1 - 1 = -1.5
        sgd.step(&mut [&mut param]);
        assert_abs_diff_eq!(param.data()[0], -2.5);
    }

    #[test]
    fn test_params_without_grad_are_skipped() {
        let mut with_grad = Tensor::from_vec(vec![1.0], true);
        let mut without_grad = Tensor::from_vec(vec![1.0], true);
        with_grad.set_grad(ndarray::arr1(&[1.0]));

        let mut sgd = SGD::new(0.5, 0.9);
        sgd.step(&mut [&mut with_grad, &mut without_grad]);

        assert_abs_diff_eq!(with_grad.data()[0], 0.5);
        assert_abs_diff_eq!(without_grad.data()[0], 1.0);
    }

    #[test]
    fn test_zero_grad() {
        let mut param = Tensor::from_vec(vec![1.0, 2.0], true);
        param.set_grad(ndarray::arr1(&[3.0, 4.0]));

        let mut sgd = SGD::new(0.1, 0.0);
        sgd.zero_grad(&mut [&mut param]);

        assert!(param.grad().is_none());
    }

    #[test]
    fn test_set_lr() {
        let mut sgd = SGD::new(0.1, 0.0);
        sgd.set_lr(0.01);
        assert_abs_diff_eq!(sgd.lr(), 0.01);
        assert_abs_diff_eq!(sgd.momentum(), 0.0);
    }

    proptest! {
        #[test]
        fn prop_sgd_converges_quadratic(
            lr in 0.01f32..0.5,
            momentum in 0.0f32..0.9
        ) {
            prop_assert!(converges_on_quadratic(SGD::new(lr, momentum), 100, 1.0));
        }
    }
}
