//! Integration tests for the embedding pipeline and batch prediction.
//!
//! A synthetic backbone stands in for the pretrained network: it derives
//! deterministic feature maps from the input images at two resolutions.

use std::collections::HashMap;
use std::error::Error;

use patchnet::backbone::FeatureExtractor;
use patchnet::config::DetectorConfig;
use patchnet::detector::AnomalyDetector;
use patchnet::tensor::FeatureTensor;

/// Backbone stub emitting named 4D layers derived from the image content.
struct SyntheticBackbone {
    layers: Vec<(String, usize, usize, usize)>,
}

impl FeatureExtractor for SyntheticBackbone {
    fn extract(
        &self,
        images: &FeatureTensor,
        layer_names: &[String],
    ) -> Result<HashMap<String, FeatureTensor>, Box<dyn Error>> {
        let mut result = HashMap::new();
        for name in layer_names {
            let (_, channels, h, w) = self
                .layers
                .iter()
                .find(|(n, _, _, _)| n == name)
                .ok_or_else(|| format!("unknown layer {:?}", name))?;
            let mut data = Vec::with_capacity(images.batch() * channels * h * w);
            for b in 0..images.batch() {
                for c in 0..*channels {
                    for y in 0..*h {
                        for x in 0..*w {
                            let pixel =
                                images.at(b, 0, y % images.height(), x % images.width());
                            data.push(pixel + 0.01 * c as f32 + 0.001 * b as f32);
                        }
                    }
                }
            }
            result.insert(
                name.clone(),
                FeatureTensor::new(data, images.batch(), *channels, *h, *w)?,
            );
        }
        Ok(result)
    }
}

/// Backbone stub emitting a (batch, tokens, channels) sequence per layer.
struct TokenBackbone {
    tokens: usize,
    channels: usize,
}

impl FeatureExtractor for TokenBackbone {
    fn extract(
        &self,
        images: &FeatureTensor,
        layer_names: &[String],
    ) -> Result<HashMap<String, FeatureTensor>, Box<dyn Error>> {
        let mut result = HashMap::new();
        for name in layer_names {
            let mut data = Vec::with_capacity(images.batch() * self.tokens * self.channels);
            for b in 0..images.batch() {
                for t in 0..self.tokens {
                    for c in 0..self.channels {
                        data.push((b + t + c) as f32 * 0.1);
                    }
                }
            }
            result.insert(
                name.clone(),
                FeatureTensor::from_tokens(data, images.batch(), self.tokens, self.channels)?,
            );
        }
        Ok(result)
    }
}

fn image_batch(batch: usize, h: usize, w: usize) -> FeatureTensor {
    let data: Vec<f32> = (0..batch * 3 * h * w)
        .map(|v| ((v % 13) as f32) / 13.0)
        .collect();
    FeatureTensor::new(data, batch, 3, h, w).unwrap()
}

fn two_scale_config() -> DetectorConfig {
    DetectorConfig {
        layers_to_extract_from: vec!["layer2".to_string(), "layer3".to_string()],
        patchsize: 3,
        patchstride: 1,
        pretrain_embed_dimension: 32,
        target_embed_dimension: 16,
        ..DetectorConfig::default()
    }
}

fn two_scale_backbone() -> Box<SyntheticBackbone> {
    Box::new(SyntheticBackbone {
        layers: vec![
            ("layer2".to_string(), 64, 14, 14),
            ("layer3".to_string(), 128, 7, 7),
        ],
    })
}

#[test]
fn test_embedding_shape_two_scales() {
    // 4 images, layers at 14x14 (64ch) and 7x7 (128ch), patch 3, stride 1:
    // the 14x14 reference grid yields 196 patches per image.
    let detector = AnomalyDetector::new(two_scale_config(), two_scale_backbone(), 42).unwrap();

    let images = image_batch(4, 28, 28);
    let (embeddings, ref_grid) = detector.embed(&images).unwrap();

    assert_eq!(ref_grid, (14, 14));
    assert_eq!(embeddings.rows, 4 * 196);
    assert_eq!(embeddings.dim, 16);
    assert!(embeddings.data.iter().all(|v| v.is_finite()));
}

#[test]
fn test_embedding_deterministic() {
    let detector = AnomalyDetector::new(two_scale_config(), two_scale_backbone(), 42).unwrap();

    let images = image_batch(2, 28, 28);
    let (a, _) = detector.embed(&images).unwrap();
    let (b, _) = detector.embed(&images).unwrap();
    assert_eq!(a.data, b.data);
}

#[test]
fn test_predict_shapes() {
    let mut detector = AnomalyDetector::new(two_scale_config(), two_scale_backbone(), 42).unwrap();

    let images = image_batch(3, 28, 28);
    let prediction = detector.predict(&images).unwrap();

    assert_eq!(prediction.grid, (14, 14));
    assert_eq!(prediction.image_scores.len(), 3);
    assert_eq!(prediction.score_maps.len(), 3);
    for map in &prediction.score_maps {
        assert_eq!(map.len(), 28 * 28);
        assert!(map.iter().all(|v| v.is_finite()));
    }
}

#[test]
fn test_image_score_is_max_of_patch_scores() {
    let mut detector = AnomalyDetector::new(two_scale_config(), two_scale_backbone(), 42).unwrap();

    let images = image_batch(2, 28, 28);
    let prediction = detector.predict(&images).unwrap();

    // top_k defaults to max reduction; the per-image score must not be below
    // any reconstructed pixel only because of interpolation, but it must
    // equal the max over the raw patch grid, which bounds the map values.
    for (score, map) in prediction.image_scores.iter().zip(&prediction.score_maps) {
        let map_max = map.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        assert!(
            map_max <= score + 1e-4,
            "interpolated map exceeded the patch maximum: {} > {}",
            map_max,
            score
        );
    }
}

#[test]
fn test_token_layer_reshape() {
    let config = DetectorConfig {
        layers_to_extract_from: vec!["tokens".to_string()],
        pretrain_embed_dimension: 16,
        target_embed_dimension: 8,
        ..DetectorConfig::default()
    };
    let backbone = Box::new(TokenBackbone {
        tokens: 196,
        channels: 12,
    });
    let detector = AnomalyDetector::new(config, backbone, 7).unwrap();

    let images = image_batch(2, 28, 28);
    let (embeddings, ref_grid) = detector.embed(&images).unwrap();
    assert_eq!(ref_grid, (14, 14));
    assert_eq!(embeddings.rows, 2 * 196);
    assert_eq!(embeddings.dim, 8);
}

#[test]
fn test_missing_backbone_layer_fails_fast() {
    let config = DetectorConfig {
        layers_to_extract_from: vec!["layer2".to_string(), "missing".to_string()],
        ..two_scale_config()
    };
    let detector = AnomalyDetector::new(config, two_scale_backbone(), 42).unwrap();

    let images = image_batch(1, 28, 28);
    assert!(detector.embed(&images).is_err());
}

#[test]
fn test_even_patchsize_rejected_at_construction() {
    let config = DetectorConfig {
        patchsize: 4,
        ..two_scale_config()
    };
    assert!(AnomalyDetector::new(config, two_scale_backbone(), 42).is_err());
}
