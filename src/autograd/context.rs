//! Execution context for forward passes
//!
//! Holds the training/eval switch and the random state used by stochastic
//! ops such as dropout.

use rand::rngs::StdRng;
use rand::SeedableRng;

/// Default seed for contexts created with [`Context::new`]
pub const DEFAULT_SEED: u64 = 42;

/// Context for managing the computational graph
pub struct Context {
    training: bool,
    rng: StdRng,
}

impl Context {
    /// Create a new context in training mode
    pub fn new() -> Self {
        Self::with_seed(DEFAULT_SEED)
    }

    /// Create a new context in training mode with a fixed RNG seed
    pub fn with_seed(seed: u64) -> Self {
        Self {
            training: true,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Set training mode
    pub fn train(&mut self) {
        self.training = true;
    }

    /// Set evaluation mode
    pub fn eval(&mut self) {
        self.training = false;
    }

    /// Check if in training mode
    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Random state for stochastic ops
    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
