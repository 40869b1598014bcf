//! Integration tests for the full training loop: meta-epochs, best-record
//! selection, checkpoint persistence, and resume-from-checkpoint.

use std::collections::HashMap;
use std::error::Error;
use std::path::Path;

use patchnet::backbone::FeatureExtractor;
use patchnet::checkpoint::load_checkpoint;
use patchnet::config::DetectorConfig;
use patchnet::detector::{AnomalyDetector, EvaluationData};
use patchnet::metrics::MetricsProvider;
use patchnet::tensor::FeatureTensor;

/// Backbone stub: two small layers derived deterministically from images.
struct TinyBackbone;

impl FeatureExtractor for TinyBackbone {
    fn extract(
        &self,
        images: &FeatureTensor,
        layer_names: &[String],
    ) -> Result<HashMap<String, FeatureTensor>, Box<dyn Error>> {
        let specs: &[(&str, usize, usize)] = &[("a", 4, 4), ("b", 8, 2)];
        let mut result = HashMap::new();
        for name in layer_names {
            let (_, channels, side) = specs
                .iter()
                .find(|(n, _, _)| n == name)
                .ok_or_else(|| format!("unknown layer {:?}", name))?;
            let mut data = Vec::with_capacity(images.batch() * channels * side * side);
            for b in 0..images.batch() {
                for c in 0..*channels {
                    for y in 0..*side {
                        for x in 0..*side {
                            let pixel =
                                images.at(b, 0, y % images.height(), x % images.width());
                            data.push(pixel * (1.0 + c as f32 * 0.1));
                        }
                    }
                }
            }
            result.insert(
                name.clone(),
                FeatureTensor::new(data, images.batch(), *channels, *side, *side)?,
            );
        }
        Ok(result)
    }
}

/// Backbone stub that poisons features with NaN to trigger the fatal-loss
/// path.
struct NanBackbone;

impl FeatureExtractor for NanBackbone {
    fn extract(
        &self,
        images: &FeatureTensor,
        layer_names: &[String],
    ) -> Result<HashMap<String, FeatureTensor>, Box<dyn Error>> {
        let mut result = HashMap::new();
        for name in layer_names {
            let data = vec![f32::NAN; images.batch() * 4 * 16];
            result.insert(
                name.clone(),
                FeatureTensor::new(data, images.batch(), 4, 4, 4)?,
            );
        }
        Ok(result)
    }
}

/// Pairwise-comparison AUROC; the crate itself ships no metric computation.
struct PairwiseMetrics;

fn pairwise_auroc(scores: &[f32], labels: &[bool]) -> f32 {
    let pos: Vec<f32> = scores
        .iter()
        .zip(labels)
        .filter(|(_, &l)| l)
        .map(|(&s, _)| s)
        .collect();
    let neg: Vec<f32> = scores
        .iter()
        .zip(labels)
        .filter(|(_, &l)| !l)
        .map(|(&s, _)| s)
        .collect();
    if pos.is_empty() || neg.is_empty() {
        return 0.5;
    }
    let mut wins = 0.0f32;
    for &p in &pos {
        for &n in &neg {
            if p > n {
                wins += 1.0;
            } else if p == n {
                wins += 0.5;
            }
        }
    }
    wins / (pos.len() * neg.len()) as f32
}

impl MetricsProvider for PairwiseMetrics {
    fn image_auroc(&self, scores: &[f32], labels: &[bool]) -> f32 {
        pairwise_auroc(scores, labels)
    }

    fn pixel_auroc(&self, score_maps: &[Vec<f32>], mask_maps: &[Vec<f32>]) -> f32 {
        let scores: Vec<f32> = score_maps.iter().flatten().cloned().collect();
        let labels: Vec<bool> = mask_maps.iter().flatten().map(|&m| m > 0.5).collect();
        pairwise_auroc(&scores, &labels)
    }

    fn pro(&self, _mask_maps: &[Vec<f32>], _score_maps: &[Vec<f32>]) -> f32 {
        0.0
    }
}

fn tiny_config() -> DetectorConfig {
    DetectorConfig {
        layers_to_extract_from: vec!["a".to_string(), "b".to_string()],
        patchsize: 3,
        patchstride: 1,
        pretrain_embed_dimension: 16,
        target_embed_dimension: 8,
        meta_epochs: 2,
        gan_epochs: 2,
        dsc_lr: 0.001,
        ..DetectorConfig::default()
    }
}

fn image_batch(batch: usize, offset: f32) -> FeatureTensor {
    let data: Vec<f32> = (0..batch * 3 * 8 * 8)
        .map(|v| ((v % 7) as f32) / 7.0 + offset)
        .collect();
    FeatureTensor::new(data, batch, 3, 8, 8).unwrap()
}

fn eval_data() -> EvaluationData {
    // normal images resemble the training offset; anomalous ones are shifted
    let batches = vec![image_batch(2, 0.0), image_batch(2, 0.8)];
    let labels = vec![false, false, true, true];
    let masks = Some(vec![
        vec![0.0; 64],
        vec![0.0; 64],
        vec![1.0; 64],
        vec![1.0; 64],
    ]);
    EvaluationData {
        batches,
        labels,
        masks,
    }
}

#[test]
fn test_train_produces_checkpoint_and_valid_record() {
    let dir = tempfile::tempdir().unwrap();
    let ckpt = dir.path().join("ckpt.json");

    let mut detector = AnomalyDetector::new(tiny_config(), Box::new(TinyBackbone), 42).unwrap();
    let train_batches = vec![image_batch(2, 0.0), image_batch(2, 0.05)];
    let best = detector
        .train(&train_batches, &eval_data(), &PairwiseMetrics, &ckpt)
        .unwrap();

    assert!((0.0..=1.0).contains(&best.image_auroc));
    assert!((0.0..=1.0).contains(&best.pixel_auroc));
    assert!(ckpt.exists(), "final snapshot must be persisted");

    let record = load_checkpoint(&ckpt).unwrap().unwrap();
    assert!(record.discriminator.contains_key("tail.weight"));
    assert!(record.pre_projection.is_none());
}

#[test]
fn test_train_with_projection_persists_both_modules() {
    let dir = tempfile::tempdir().unwrap();
    let ckpt = dir.path().join("ckpt.json");

    let config = DetectorConfig {
        pre_proj: 1,
        ..tiny_config()
    };
    let mut detector = AnomalyDetector::new(config, Box::new(TinyBackbone), 42).unwrap();
    let train_batches = vec![image_batch(2, 0.0)];
    detector
        .train(&train_batches, &eval_data(), &PairwiseMetrics, &ckpt)
        .unwrap();

    let record = load_checkpoint(&ckpt).unwrap().unwrap();
    assert!(record.pre_projection.is_some());
    assert!(record.pre_projection.unwrap().contains_key("layers.0.weight"));
}

#[test]
fn test_existing_checkpoint_resumes_instead_of_training() {
    let dir = tempfile::tempdir().unwrap();
    let ckpt = dir.path().join("ckpt.json");

    let train_batches = vec![image_batch(2, 0.0)];
    let mut detector = AnomalyDetector::new(tiny_config(), Box::new(TinyBackbone), 42).unwrap();
    detector
        .train(&train_batches, &eval_data(), &PairwiseMetrics, &ckpt)
        .unwrap();
    let saved = load_checkpoint(&ckpt).unwrap().unwrap();

    // a fresh detector with the same checkpoint path restores and evaluates
    let mut resumed = AnomalyDetector::new(tiny_config(), Box::new(TinyBackbone), 99).unwrap();
    let record = resumed
        .train(&train_batches, &eval_data(), &PairwiseMetrics, &ckpt)
        .unwrap();
    assert!((0.0..=1.0).contains(&record.image_auroc));

    // the checkpoint on disk is untouched by the resume
    let after = load_checkpoint(&ckpt).unwrap().unwrap();
    assert_eq!(after.discriminator, saved.discriminator);
}

#[test]
fn test_failed_run_writes_no_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let ckpt = dir.path().join("ckpt.json");

    let config = DetectorConfig {
        layers_to_extract_from: vec!["a".to_string()],
        ..tiny_config()
    };
    let mut detector = AnomalyDetector::new(config, Box::new(NanBackbone), 42).unwrap();
    let train_batches = vec![image_batch(2, 0.0)];
    let result = detector.train(&train_batches, &eval_data(), &PairwiseMetrics, &ckpt);

    assert!(result.is_err(), "NaN features must abort the run");
    assert!(
        !ckpt.exists(),
        "a failed run must not leave a checkpoint behind"
    );
}

#[test]
fn test_eval_without_masks_reports_sentinels() {
    let dir = tempfile::tempdir().unwrap();
    let ckpt = dir.path().join("ckpt.json");

    let mut detector = AnomalyDetector::new(tiny_config(), Box::new(TinyBackbone), 42).unwrap();
    let train_batches = vec![image_batch(2, 0.0)];
    let eval = EvaluationData {
        masks: None,
        ..eval_data()
    };
    let best = detector
        .train(&train_batches, &eval, &PairwiseMetrics, &ckpt)
        .unwrap();

    assert!((0.0..=1.0).contains(&best.image_auroc));
    assert_eq!(best.pixel_auroc, -1.0);
    assert_eq!(best.pro_score, -1.0);
}

#[test]
fn test_restored_detector_reproduces_scores() {
    let dir = tempfile::tempdir().unwrap();
    let ckpt = dir.path().join("ckpt.json");

    let train_batches = vec![image_batch(2, 0.0)];
    let mut trained = AnomalyDetector::new(tiny_config(), Box::new(TinyBackbone), 42).unwrap();
    trained
        .train(&train_batches, &eval_data(), &PairwiseMetrics, &ckpt)
        .unwrap();

    // the persisted record is the best snapshot, not necessarily the final
    // live parameters, so both detectors restore it before comparing
    let record = load_checkpoint(Path::new(&ckpt)).unwrap().unwrap();
    trained.apply_record(&record).unwrap();
    let mut restored = AnomalyDetector::new(tiny_config(), Box::new(TinyBackbone), 7).unwrap();
    restored.apply_record(&record).unwrap();

    let images = image_batch(2, 0.3);
    let a = trained.predict(&images).unwrap();
    let b = restored.predict(&images).unwrap();
    assert_eq!(a.image_scores, b.image_scores);
}
