//! Parameter initializers

use rand::Rng;

/// Kaiming-uniform initialization for a weight with the given fan-in
///
/// Samples U(-bound, bound) with `bound = sqrt(3) * gain / sqrt(fan_in)` and
/// `gain = sqrt(2 / (1 + a²))`, where `a` is the negative slope of the
/// following leaky ReLU.
pub fn kaiming_uniform<R: Rng>(len: usize, fan_in: usize, a: f32, rng: &mut R) -> Vec<f32> {
    let gain = (2.0 / (1.0 + a * a)).sqrt();
    let bound = 3.0f32.sqrt() * gain / (fan_in as f32).sqrt();
    uniform(len, bound, rng)
}

/// Default linear-layer weight init: Kaiming uniform with a = √5
///
/// This reduces to U(-1/√fan_in, 1/√fan_in). Also used for LoRA A.
pub fn linear_weight<R: Rng>(len: usize, fan_in: usize, rng: &mut R) -> Vec<f32> {
    kaiming_uniform(len, fan_in, 5.0f32.sqrt(), rng)
}

/// Default linear-layer bias init: U(-1/√fan_in, 1/√fan_in)
pub fn linear_bias<R: Rng>(len: usize, fan_in: usize, rng: &mut R) -> Vec<f32> {
    uniform(len, 1.0 / (fan_in as f32).sqrt(), rng)
}

fn uniform<R: Rng>(len: usize, bound: f32, rng: &mut R) -> Vec<f32> {
    if bound <= 0.0 || !bound.is_finite() {
        return vec![0.0; len];
    }
    (0..len).map(|_| rng.random_range(-bound..bound)).collect()
}
