//! Construction parameters for [`LoRALinear`](super::LoRALinear)
//!
//! Can be built in code with the builder methods or loaded from YAML:
//!
//! ```yaml
//! in_dim: 4096
//! out_dim: 4096
//! rank: 16
//! alpha: 32.0
//! dropout: 0.05
//! use_dora: true
//! quantize_base: true
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

fn default_seed() -> u64 {
    crate::autograd::DEFAULT_SEED
}

/// Configuration of a low-rank adapted linear layer
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoRALinearConfig {
    /// Input dimension
    pub in_dim: usize,
    /// Output dimension
    pub out_dim: usize,
    /// LoRA rank
    pub rank: usize,
    /// LoRA alpha (scaling parameter)
    pub alpha: f32,
    /// Dropout probability applied to the adapter input
    #[serde(default)]
    pub dropout: f32,
    /// Enable weight-decomposed adaptation (DoRA)
    #[serde(default)]
    pub use_dora: bool,
    /// Include a bias in the base affine transform
    #[serde(default)]
    pub use_bias: bool,
    /// Store the base weight NF4-quantized
    #[serde(default)]
    pub quantize_base: bool,
    /// Seed for parameter initialization
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl LoRALinearConfig {
    /// Create a configuration with no dropout, no DoRA, no bias and a plain base
    ///
    /// # Arguments
    /// * `in_dim` - Input dimension
    /// * `out_dim` - Output dimension
    /// * `rank` - LoRA rank (typically 4, 8, 16, 32, or 64)
    /// * `alpha` - LoRA alpha scaling parameter (often same as rank)
    pub fn new(in_dim: usize, out_dim: usize, rank: usize, alpha: f32) -> Self {
        Self {
            in_dim,
            out_dim,
            rank,
            alpha,
            dropout: 0.0,
            use_dora: false,
            use_bias: false,
            quantize_base: false,
            seed: default_seed(),
        }
    }

    /// Set dropout probability
    pub fn with_dropout(mut self, dropout: f32) -> Self {
        self.dropout = dropout;
        self
    }

    /// Enable or disable DoRA
    pub fn with_dora(mut self, use_dora: bool) -> Self {
        self.use_dora = use_dora;
        self
    }

    /// Enable or disable the base bias
    pub fn with_bias(mut self, use_bias: bool) -> Self {
        self.use_bias = use_bias;
        self
    }

    /// Enable or disable NF4 storage of the base weight
    pub fn with_quantized_base(mut self, quantize_base: bool) -> Self {
        self.quantize_base = quantize_base;
        self
    }

    /// Set the initialization seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Scaling applied to the low-rank path: alpha / rank
    pub fn scale(&self) -> f32 {
        self.alpha / self.rank as f32
    }

    /// Check the configuration before any tensor is allocated
    pub fn validate(&self) -> Result<()> {
        if self.quantize_base && self.use_bias {
            return Err(Error::UnsupportedConfiguration(
                "quantized base weight does not support bias".to_string(),
            ));
        }
        if self.in_dim == 0 || self.out_dim == 0 {
            return Err(Error::ConfigError(format!(
                "dimensions must be > 0 (in_dim={}, out_dim={})",
                self.in_dim, self.out_dim
            )));
        }
        if self.rank == 0 {
            return Err(Error::ConfigError("LoRA rank must be > 0".to_string()));
        }
        if !self.alpha.is_finite() {
            return Err(Error::ConfigError(format!(
                "LoRA alpha must be finite, got {}",
                self.alpha
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::ConfigError(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        Ok(())
    }

    /// Parse a configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| Error::ConfigError(format!("Failed to parse YAML config: {e}")))
    }

    /// Load a configuration from a YAML file
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let yaml = fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Serialize the configuration to YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| Error::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_defaults() {
        let config = LoRALinearConfig::new(16, 8, 4, 8.0);
        assert_eq!(config.dropout, 0.0);
        assert!(!config.use_dora);
        assert!(!config.use_bias);
        assert!(!config.quantize_base);
        assert_eq!(config.seed, 42);
        assert_eq!(config.scale(), 2.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_quantized_base_with_bias_is_unsupported() {
        let config = LoRALinearConfig::new(4, 4, 2, 1.0)
            .with_quantized_base(true)
            .with_bias(true);
        assert!(matches!(
            config.validate(),
            Err(Error::UnsupportedConfiguration(_))
        ));
    }

    #[test]
    fn test_invalid_values() {
        let base = LoRALinearConfig::new(4, 4, 2, 1.0);
        assert!(base.clone().with_dropout(1.0).validate().is_err());
        assert!(base.clone().with_dropout(-0.1).validate().is_err());
        assert!(LoRALinearConfig::new(0, 4, 2, 1.0).validate().is_err());
        assert!(LoRALinearConfig::new(4, 0, 2, 1.0).validate().is_err());
        assert!(LoRALinearConfig::new(4, 4, 0, 1.0).validate().is_err());
        assert!(LoRALinearConfig::new(4, 4, 2, f32::NAN).validate().is_err());
    }

    #[test]
    fn test_rank_above_min_dim_is_allowed() {
        assert!(LoRALinearConfig::new(2, 2, 8, 1.0).validate().is_ok());
    }

    #[test]
    fn test_yaml_applies_defaults() {
        let yaml = "in_dim: 64\nout_dim: 32\nrank: 8\nalpha: 16.0\nuse_dora: true\n";
        let config = LoRALinearConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.in_dim, 64);
        assert!(config.use_dora);
        assert!(!config.quantize_base);
        assert_eq!(config.dropout, 0.0);
        assert_eq!(config.seed, 42);
    }

    #[test]
    fn test_yaml_missing_field_is_config_error() {
        let err = LoRALinearConfig::from_yaml_str("in_dim: 4\nrank: 2\n").unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn test_yaml_file_round_trip() {
        let config = LoRALinearConfig::new(8, 4, 2, 4.0)
            .with_dropout(0.1)
            .with_dora(true)
            .with_seed(7);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layer.yaml");
        std::fs::write(&path, config.to_yaml().unwrap()).unwrap();

        let loaded = LoRALinearConfig::from_yaml_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = LoRALinearConfig::from_yaml_file("/nonexistent/layer.yaml").unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_scale_is_alpha_over_rank(
            rank in 1usize..64,
            alpha in 0.5f32..128.0,
        ) {
            let config = LoRALinearConfig::new(8, 8, rank, alpha);
            prop_assert!((config.scale() - alpha / rank as f32).abs() < 1e-6);
        }

        #[test]
        fn prop_valid_dropout_accepted(p in 0.0f32..0.99) {
            let config = LoRALinearConfig::new(8, 8, 2, 2.0).with_dropout(p);
            prop_assert!(config.validate().is_ok());
        }
    }
}
