//! Configuration surface for the anomaly detector.
//!
//! Mirrors the recognized training options and their effects. Configurations
//! can be parsed from JSON files; every field has a sensible default, so a
//! minimal file only overrides what it needs.
//!
//! # Example
//!
//! ```json
//! {
//!   "layers_to_extract_from": ["layer2", "layer3"],
//!   "patchsize": 3,
//!   "patchstride": 1,
//!   "pretrain_embed_dimension": 1536,
//!   "target_embed_dimension": 1536,
//!   "meta_epochs": 40,
//!   "gan_epochs": 4,
//!   "dsc_margin": 0.5,
//!   "cos_lr": true
//! }
//! ```

use serde::Deserialize;
use std::error::Error;
use std::fs;
use std::io;

/// Detector configuration: patch geometry, embedding widths, loop bounds,
/// noise mixture, and discriminator hyperparameters.
///
/// One detector instance is built per training run from one of these values;
/// there is no process-wide state.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Backbone layer names, in order; the first is the reference scale.
    pub layers_to_extract_from: Vec<String>,

    /// Patch edge length (odd).
    pub patchsize: usize,
    /// Patch sampling stride.
    pub patchstride: usize,

    /// Intermediate per-layer embedding width.
    pub pretrain_embed_dimension: usize,
    /// Final patch embedding width.
    pub target_embed_dimension: usize,

    /// Outer training-and-evaluation cycles.
    pub meta_epochs: usize,
    /// Inner discriminator epochs per meta-epoch.
    pub gan_epochs: usize,

    /// Noise mixture component count K.
    pub mix_noise: usize,
    /// Base noise standard deviation.
    pub noise_std: f32,

    /// Discriminator depth (hidden blocks + tail).
    pub dsc_layers: usize,
    /// Fixed hidden width; shrink by ~1.5x per block when absent.
    pub dsc_hidden: Option<usize>,
    /// Hinge margin.
    pub dsc_margin: f32,
    /// Discriminator learning rate.
    pub dsc_lr: f32,

    /// Pre-projection depth; 0 disables the stage.
    pub pre_proj: usize,
    /// Projection layer flavor; > 1 inserts leaky ReLU between layers.
    pub proj_layer_type: usize,

    /// Enable per-epoch cosine learning rate decay.
    pub cos_lr: bool,

    /// Image score reduction: mean of the top_k patch maxima when > 1,
    /// plain maximum otherwise.
    pub top_k: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            layers_to_extract_from: Vec::new(),
            patchsize: 3,
            patchstride: 1,
            pretrain_embed_dimension: 1536,
            target_embed_dimension: 1536,
            meta_epochs: 40,
            gan_epochs: 4,
            mix_noise: 1,
            noise_std: 0.05,
            dsc_layers: 2,
            dsc_hidden: None,
            dsc_margin: 0.5,
            dsc_lr: 0.0002,
            pre_proj: 0,
            proj_layer_type: 0,
            cos_lr: false,
            top_k: 0,
        }
    }
}

/// Loads a detector configuration from a JSON file.
///
/// # Returns
///
/// `Ok(DetectorConfig)` on success, or an error if the file cannot be read,
/// the JSON is invalid, or a value fails validation.
pub fn load_config(path: &str) -> Result<DetectorConfig, Box<dyn Error>> {
    let contents = fs::read_to_string(path)?;
    let config: DetectorConfig = serde_json::from_str(&contents)?;
    validate_config(&config)?;
    Ok(config)
}

/// Validates a detector configuration.
///
/// Checks the patch geometry (odd patch size, positive stride), embedding
/// widths, loop bounds, noise mixture, and discriminator hyperparameters.
pub fn validate_config(config: &DetectorConfig) -> Result<(), Box<dyn Error>> {
    if config.layers_to_extract_from.is_empty() {
        return Err(Box::new(io::Error::new(
            io::ErrorKind::InvalidData,
            "layers_to_extract_from must name at least one backbone layer",
        )));
    }

    if config.patchsize == 0 || config.patchsize % 2 == 0 {
        return Err(Box::new(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("patchsize must be odd and positive, got {}", config.patchsize),
        )));
    }

    if config.patchstride == 0 {
        return Err(Box::new(io::Error::new(
            io::ErrorKind::InvalidData,
            "patchstride must be greater than 0",
        )));
    }

    if config.pretrain_embed_dimension == 0 {
        return Err(Box::new(io::Error::new(
            io::ErrorKind::InvalidData,
            "pretrain_embed_dimension must be greater than 0",
        )));
    }

    if config.target_embed_dimension == 0 {
        return Err(Box::new(io::Error::new(
            io::ErrorKind::InvalidData,
            "target_embed_dimension must be greater than 0",
        )));
    }

    if config.meta_epochs == 0 {
        return Err(Box::new(io::Error::new(
            io::ErrorKind::InvalidData,
            "meta_epochs must be greater than 0",
        )));
    }

    if config.gan_epochs == 0 {
        return Err(Box::new(io::Error::new(
            io::ErrorKind::InvalidData,
            "gan_epochs must be greater than 0",
        )));
    }

    if config.mix_noise == 0 {
        return Err(Box::new(io::Error::new(
            io::ErrorKind::InvalidData,
            "mix_noise must be greater than 0",
        )));
    }

    if config.noise_std <= 0.0 {
        return Err(Box::new(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("noise_std must be positive, got {}", config.noise_std),
        )));
    }

    if config.dsc_layers == 0 {
        return Err(Box::new(io::Error::new(
            io::ErrorKind::InvalidData,
            "dsc_layers must be greater than 0",
        )));
    }

    if let Some(hidden) = config.dsc_hidden {
        if hidden == 0 {
            return Err(Box::new(io::Error::new(
                io::ErrorKind::InvalidData,
                "dsc_hidden must be greater than 0 when set",
            )));
        }
    }

    if config.dsc_margin <= 0.0 {
        return Err(Box::new(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("dsc_margin must be positive, got {}", config.dsc_margin),
        )));
    }

    if config.dsc_lr <= 0.0 {
        return Err(Box::new(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("dsc_lr must be positive, got {}", config.dsc_lr),
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> DetectorConfig {
        DetectorConfig {
            layers_to_extract_from: vec!["layer2".to_string(), "layer3".to_string()],
            ..DetectorConfig::default()
        }
    }

    #[test]
    fn test_default_values() {
        let config = DetectorConfig::default();
        assert_eq!(config.patchsize, 3);
        assert_eq!(config.patchstride, 1);
        assert_eq!(config.mix_noise, 1);
        assert_eq!(config.noise_std, 0.05);
        assert_eq!(config.dsc_layers, 2);
        assert!(config.dsc_hidden.is_none());
        assert_eq!(config.pre_proj, 0);
        assert!(!config.cos_lr);
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(validate_config(&base_config()).is_ok());
    }

    #[test]
    fn test_rejects_missing_layers() {
        let config = DetectorConfig::default();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rejects_even_patchsize() {
        let config = DetectorConfig {
            patchsize: 4,
            ..base_config()
        };
        let result = validate_config(&config);
        assert!(result.is_err());
        assert!(result.err().unwrap().to_string().contains("odd"));
    }

    #[test]
    fn test_rejects_zero_stride() {
        let config = DetectorConfig {
            patchstride: 0,
            ..base_config()
        };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rejects_zero_mix_noise() {
        let config = DetectorConfig {
            mix_noise: 0,
            ..base_config()
        };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rejects_non_positive_noise_std() {
        let config = DetectorConfig {
            noise_std: 0.0,
            ..base_config()
        };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rejects_non_positive_margin() {
        let config = DetectorConfig {
            dsc_margin: 0.0,
            ..base_config()
        };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_load_config_from_json() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let json_content = r#"{
  "layers_to_extract_from": ["layer2", "layer3"],
  "patchsize": 5,
  "meta_epochs": 10,
  "gan_epochs": 2,
  "cos_lr": true
}"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(json_content.as_bytes()).unwrap();
        let temp_path = temp_file.path().to_str().unwrap();

        let config = load_config(temp_path).unwrap();
        assert_eq!(config.patchsize, 5);
        assert_eq!(config.meta_epochs, 10);
        assert_eq!(config.gan_epochs, 2);
        assert!(config.cos_lr);
        // defaults fill the rest
        assert_eq!(config.target_embed_dimension, 1536);
        assert_eq!(config.dsc_lr, 0.0002);
    }

    #[test]
    fn test_load_config_rejects_invalid_values() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let json_content = r#"{
  "layers_to_extract_from": ["layer2"],
  "patchsize": 2
}"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(json_content.as_bytes()).unwrap();
        let temp_path = temp_file.path().to_str().unwrap();

        assert!(load_config(temp_path).is_err());
    }
}
