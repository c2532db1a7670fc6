//! Low-rank adapted linear layer (LoRA, optionally DoRA, optionally NF4 base)
//!
//! For a frozen weight matrix W ∈ ℝ^(d_out × d_in), LoRA adds a trainable
//! low-rank update ΔW = s · B @ A with A ∈ ℝ^(r × d_in), B ∈ ℝ^(d_out × r)
//! and s = alpha / r:
//!
//! y = x @ Wᵀ + b + s · ((dropout(x) @ Aᵀ) @ Bᵀ)
//!
//! With DoRA enabled the sum is rescaled per output channel by
//! m / ||W + ΔW||_row, where the norm is treated as a constant:
//!
//! y = (x @ Wᵀ + b + s · B(A(dropout(x)))) ⊙ (m / ||W + ΔW||)
//!
//! B starts at zero, so a freshly built layer reproduces the base transform.

use super::config::LoRALinearConfig;
use super::dora::{clamp_norm, combined_weight, row_norms};
use super::init;
use super::storage::WeightStorage;
use crate::autograd::{add, div, dropout, linear, mul_broadcast_rows, scale, Context};
use crate::error::{Error, Result};
use crate::Tensor;
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

/// Parameter name of the frozen base weight
pub const WEIGHT: &str = "weight";
/// Parameter name of the frozen base bias
pub const BIAS: &str = "bias";
/// Parameter name of LoRA A (down-projection)
pub const LORA_A: &str = "lora_a.weight";
/// Parameter name of LoRA B (up-projection)
pub const LORA_B: &str = "lora_b.weight";
/// Parameter name of the DoRA magnitude vector
pub const LORA_M: &str = "lora_m";

/// Linear layer with a low-rank adapter on a frozen base weight
#[derive(Debug)]
pub struct LoRALinear {
    in_dim: usize,
    out_dim: usize,
    rank: usize,
    alpha: f32,
    /// alpha / rank
    scale: f32,
    dropout: f32,
    /// Frozen base weight [out_dim × in_dim]
    weight: WeightStorage,
    /// Frozen base bias [out_dim]
    bias: Option<Tensor>,
    /// LoRA A [rank × in_dim], trainable
    lora_a: Tensor,
    /// LoRA B [out_dim × rank], trainable
    lora_b: Tensor,
    /// DoRA magnitude [1 × out_dim], trainable
    lora_m: Option<Tensor>,
    /// When set, forward returns the base transform only
    disabled: bool,
    dora_initialized: bool,
}

impl LoRALinear {
    /// Build a layer from its configuration
    ///
    /// The base weight (and bias) get the standard linear-layer init and are
    /// meant to be overwritten by a checkpoint loader via [`set_parameter`].
    /// Adapter parameters are initialized with [`reset_adapter_parameters`].
    ///
    /// Fails with [`Error::UnsupportedConfiguration`] for a quantized base with
    /// bias, before any tensor is allocated.
    ///
    /// [`set_parameter`]: Self::set_parameter
    /// [`reset_adapter_parameters`]: Self::reset_adapter_parameters
    pub fn new(config: &LoRALinearConfig) -> Result<Self> {
        config.validate()?;

        let LoRALinearConfig {
            in_dim,
            out_dim,
            rank,
            alpha,
            dropout,
            use_dora,
            use_bias,
            quantize_base,
            seed,
        } = *config;

        let mut rng = StdRng::seed_from_u64(seed);

        let weight_data = init::linear_weight(out_dim * in_dim, in_dim, &mut rng);
        let weight = if quantize_base {
            WeightStorage::nf4(&weight_data)
        } else {
            WeightStorage::plain(weight_data)
        };
        let bias = use_bias.then(|| {
            Tensor::from_vec(init::linear_bias(out_dim, in_dim, &mut rng), false)
        });

        let mut lora_a = Tensor::zeros(rank * in_dim, true);
        lora_a.set_shape(vec![rank, in_dim]);
        let mut lora_b = Tensor::zeros(out_dim * rank, true);
        lora_b.set_shape(vec![out_dim, rank]);
        let lora_m = use_dora.then(|| {
            let mut m = Tensor::ones(out_dim, true);
            m.set_shape(vec![1, out_dim]);
            m
        });

        let mut layer = Self {
            in_dim,
            out_dim,
            rank,
            alpha,
            scale: config.scale(),
            dropout,
            weight,
            bias,
            lora_a,
            lora_b,
            lora_m,
            disabled: false,
            dora_initialized: false,
        };
        layer.reset_adapter_parameters(&mut rng);

        debug!(
            in_dim,
            out_dim,
            rank,
            alpha,
            dropout,
            use_dora,
            use_bias,
            quantize_base,
            "built LoRA linear layer"
        );

        Ok(layer)
    }

    /// Re-initialize the adapter: A Kaiming-uniform (a = √5), B zeros, m ones
    ///
    /// After this call the adapter is a no-op and the DoRA magnitude must be
    /// committed again with [`init_dora`](Self::init_dora).
    pub fn reset_adapter_parameters<R: Rng>(&mut self, rng: &mut R) {
        let a = init::linear_weight(self.rank * self.in_dim, self.in_dim, rng);
        self.lora_a.assign(Array1::from(a));
        self.lora_b.assign(Array1::zeros(self.out_dim * self.rank));
        if let Some(m) = self.lora_m.as_mut() {
            m.assign(Array1::ones(self.out_dim));
        }
        self.dora_initialized = false;
    }

    /// Names of the trainable adapter parameters
    ///
    /// Matches the names used by [`named_parameters`](Self::named_parameters)
    /// and the order of [`trainable_params`](Self::trainable_params).
    pub fn adapter_params(&self) -> Vec<&'static str> {
        let mut names = vec![LORA_A, LORA_B];
        if self.lora_m.is_some() {
            names.push(LORA_M);
        }
        names
    }

    /// All registered parameters by name
    ///
    /// Returned tensors share gradient cells with the layer's own parameters.
    /// A quantized base weight is returned decoded.
    pub fn named_parameters(&self) -> Vec<(&'static str, Tensor)> {
        let mut weight = self.weight.to_tensor();
        weight.set_shape(vec![self.out_dim, self.in_dim]);

        let mut params = vec![(WEIGHT, weight)];
        if let Some(bias) = &self.bias {
            params.push((BIAS, bias.clone()));
        }
        params.push((LORA_A, self.lora_a.clone()));
        params.push((LORA_B, self.lora_b.clone()));
        if let Some(m) = &self.lora_m {
            params.push((LORA_M, m.clone()));
        }
        params
    }

    /// Mutable references to the trainable parameters (A, B, then m)
    pub fn trainable_params(&mut self) -> Vec<&mut Tensor> {
        let mut params = vec![&mut self.lora_a, &mut self.lora_b];
        if let Some(m) = self.lora_m.as_mut() {
            params.push(m);
        }
        params
    }

    /// Number of trainable scalars
    pub fn num_trainable_parameters(&self) -> usize {
        self.lora_a.len() + self.lora_b.len() + self.lora_m.as_ref().map_or(0, Tensor::len)
    }

    /// Overwrite a parameter by name (checkpoint loading hook)
    ///
    /// Values are row-major. Setting `weight` on a quantized layer re-encodes
    /// the values to NF4.
    pub fn set_parameter(&mut self, name: &str, values: Vec<f32>) -> Result<()> {
        let (in_dim, out_dim, rank) = (self.in_dim, self.out_dim, self.rank);
        match name {
            WEIGHT => {
                check_len(&values, &[out_dim, in_dim])?;
                self.weight = self.weight.encode_like(values);
            }
            BIAS => {
                let bias = self
                    .bias
                    .as_mut()
                    .ok_or_else(|| Error::InvalidParameter("layer has no bias".to_string()))?;
                check_len(&values, &[out_dim])?;
                bias.assign(Array1::from(values));
            }
            LORA_A => {
                check_len(&values, &[rank, in_dim])?;
                self.lora_a.assign(Array1::from(values));
            }
            LORA_B => {
                check_len(&values, &[out_dim, rank])?;
                self.lora_b.assign(Array1::from(values));
            }
            LORA_M => {
                let m = self
                    .lora_m
                    .as_mut()
                    .ok_or_else(|| Error::InvalidParameter("DoRA is not enabled".to_string()))?;
                check_len(&values, &[1, out_dim])?;
                m.assign(Array1::from(values));
            }
            other => {
                return Err(Error::InvalidParameter(format!(
                    "unknown parameter name: {other}"
                )))
            }
        }
        Ok(())
    }

    /// Row norms of the combined weight W + (alpha/rank)·B@A, floored at 1e-6
    ///
    /// The base weight is decoded first when stored quantized, and the norm
    /// is returned in the same representation as the base weight.
    pub fn dora_weight_norm(&self) -> WeightStorage {
        let norm = self.combined_norm();
        self.weight.encode_like(norm.to_vec())
    }

    /// Commit the DoRA magnitude from the current combined-weight norm
    ///
    /// Must be called exactly once, after the real base weight has been
    /// loaded and before training. The magnitude keeps its gradient cell.
    ///
    /// A second call fails with [`Error::DoraAlreadyInitialized`] instead of
    /// overwriting a magnitude that may already be trained.
    /// [`reset_adapter_parameters`](Self::reset_adapter_parameters) clears the
    /// flag, after which the magnitude can be committed again.
    pub fn init_dora(&mut self) -> Result<()> {
        if self.lora_m.is_none() {
            return Err(Error::UnsupportedConfiguration(
                "init_dora called on a layer without DoRA".to_string(),
            ));
        }
        if self.dora_initialized {
            return Err(Error::DoraAlreadyInitialized);
        }

        let norm = self.decoded_weight_norm();
        if let Some(m) = self.lora_m.as_mut() {
            m.assign(norm);
        }
        self.dora_initialized = true;

        info!(
            out_dim = self.out_dim,
            quantized = self.weight.is_quantized(),
            "committed DoRA magnitude"
        );
        Ok(())
    }

    /// Forward pass
    ///
    /// `x` has shape `[..., in_dim]`; the result has shape `[..., out_dim]`.
    /// Dropout on the adapter input is applied only in training mode.
    pub fn forward(&self, ctx: &mut Context, x: &Tensor) -> Result<Tensor> {
        if x.shape().last() != Some(&self.in_dim) {
            let mut expected = x.shape().to_vec();
            match expected.last_mut() {
                Some(last) => *last = self.in_dim,
                None => expected.push(self.in_dim),
            }
            return Err(Error::ShapeMismatch {
                expected,
                got: x.shape().to_vec(),
            });
        }

        let weight = self.weight.to_tensor();
        let out = linear(x, &weight, self.bias.as_ref(), self.in_dim, self.out_dim);
        if self.disabled {
            return Ok(out);
        }

        let p = if ctx.is_training() { self.dropout } else { 0.0 };
        let x_dropped = dropout(x, p, ctx.rng());
        let lora_out = linear(&x_dropped, &self.lora_a, None, self.in_dim, self.rank);
        let lora_out = linear(&lora_out, &self.lora_b, None, self.rank, self.out_dim);
        let lora_out = scale(&lora_out, self.scale);

        match &self.lora_m {
            None => Ok(add(&out, &lora_out)),
            Some(m) => {
                let weight_norm = Tensor::new(self.decoded_weight_norm(), false);
                let mag_norm_scale = div(m, &weight_norm);
                Ok(mul_broadcast_rows(
                    &add(&out, &lora_out),
                    &mag_norm_scale,
                    self.out_dim,
                ))
            }
        }
    }

    /// Effective dense weight [out_dim × in_dim] for inference export
    ///
    /// W + (alpha/rank)·B@A, rescaled row-wise by m / norm when DoRA is on.
    /// Computed on detached values; the layer is not modified.
    pub fn merged_weight(&self) -> Tensor {
        let mut merged = self.combined();
        if let Some(row_scale) = self.dora_row_scale() {
            for (o, factor) in row_scale.iter().enumerate() {
                merged
                    .slice_mut(ndarray::s![o * self.in_dim..(o + 1) * self.in_dim])
                    .mapv_inplace(|v| v * factor);
            }
        }
        let mut tensor = Tensor::new(merged, false);
        tensor.set_shape(vec![self.out_dim, self.in_dim]);
        tensor
    }

    /// Effective bias matching [`merged_weight`](Self::merged_weight)
    pub fn merged_bias(&self) -> Option<Tensor> {
        let bias = self.bias.as_ref()?;
        let data = match self.dora_row_scale() {
            Some(row_scale) => bias.data() * &row_scale,
            None => bias.data().clone(),
        };
        Some(Tensor::new(data, false))
    }

    /// Decoded base weight [out_dim * in_dim]
    pub fn base_weight(&self) -> Array1<f32> {
        self.weight.dequantize()
    }

    /// Stored base weight
    pub fn weight_storage(&self) -> &WeightStorage {
        &self.weight
    }

    /// Get reference to the base bias
    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }

    /// Get reference to LoRA A matrix
    pub fn lora_a(&self) -> &Tensor {
        &self.lora_a
    }

    /// Get mutable reference to LoRA A matrix
    pub fn lora_a_mut(&mut self) -> &mut Tensor {
        &mut self.lora_a
    }

    /// Get reference to LoRA B matrix
    pub fn lora_b(&self) -> &Tensor {
        &self.lora_b
    }

    /// Get mutable reference to LoRA B matrix
    pub fn lora_b_mut(&mut self) -> &mut Tensor {
        &mut self.lora_b
    }

    /// Get reference to the DoRA magnitude
    pub fn lora_m(&self) -> Option<&Tensor> {
        self.lora_m.as_ref()
    }

    /// Turn the adapter off (base-only forward) or back on
    pub fn set_disabled(&mut self, disabled: bool) {
        self.disabled = disabled;
    }

    /// Check if the adapter is turned off
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Check if the DoRA magnitude has been committed
    pub fn is_dora_initialized(&self) -> bool {
        self.dora_initialized
    }

    /// Check if DoRA is enabled
    pub fn use_dora(&self) -> bool {
        self.lora_m.is_some()
    }

    /// Check if the base weight is stored quantized
    pub fn is_quantized(&self) -> bool {
        self.weight.is_quantized()
    }

    /// Get rank
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Get alpha
    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    /// Get scale factor (alpha / rank)
    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Get dropout probability
    pub fn dropout(&self) -> f32 {
        self.dropout
    }

    /// Get output dimension
    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    /// Get input dimension
    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    fn combined(&self) -> Array1<f32> {
        combined_weight(
            &self.weight.dequantize(),
            self.lora_a.data(),
            self.lora_b.data(),
            self.out_dim,
            self.in_dim,
            self.rank,
            self.scale,
        )
    }

    fn combined_norm(&self) -> Array1<f32> {
        row_norms(&self.combined(), self.out_dim, self.in_dim)
    }

    /// Norm as consumed by forward and `init_dora`; the floor is re-applied
    /// because NF4 can round small norms to zero.
    fn decoded_weight_norm(&self) -> Array1<f32> {
        self.dora_weight_norm().dequantize().mapv_into(clamp_norm)
    }

    fn dora_row_scale(&self) -> Option<Array1<f32>> {
        let m = self.lora_m.as_ref()?;
        Some(m.data() / &self.decoded_weight_norm())
    }
}

fn check_len(values: &[f32], shape: &[usize]) -> Result<()> {
    let expected: usize = shape.iter().product();
    if values.len() != expected {
        return Err(Error::ShapeMismatch {
            expected: shape.to_vec(),
            got: vec![values.len()],
        });
    }
    Ok(())
}
