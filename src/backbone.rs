//! Backbone feature extractor collaborator boundary.
//!
//! Any pretrained network that maps an image batch to named feature tensors
//! can drive the detector; the core depends only on this capability
//! interface and never on a concrete network type.

use std::collections::HashMap;
use std::error::Error;

use crate::tensor::FeatureTensor;

/// Capability interface for pretrained feature extraction.
///
/// Given a batch of images `(batch, 3, H, W)` and a set of layer names,
/// returns a mapping from layer name to feature tensor. Tensors arrive
/// either as `(batch, C, h, w)` maps or, via
/// [`FeatureTensor::from_tokens`], as `(batch, tokens, C)` sequences with a
/// perfect-square token count.
pub trait FeatureExtractor {
    /// Extract features for the named layers.
    ///
    /// # Errors
    ///
    /// Implementations fail when a requested layer does not exist or the
    /// image batch has an unexpected shape.
    fn extract(
        &self,
        images: &FeatureTensor,
        layer_names: &[String],
    ) -> Result<HashMap<String, FeatureTensor>, Box<dyn Error>>;
}
