//! End-to-end anomaly detector.
//!
//! Wires the pipeline together: backbone features → multi-scale alignment →
//! channel projection → scale aggregation → patch embeddings, which feed the
//! discriminator for scoring or the trainer for learning. Patch scores are
//! reduced to one scalar per image and reconstructed into pixel-level
//! anomaly maps.

use std::error::Error;
use std::io;
use std::path::Path;

use log::info;

use crate::backbone::FeatureExtractor;
use crate::checkpoint::{load_checkpoint, save_checkpoint, CheckpointRecord};
use crate::config::{validate_config, DetectorConfig};
use crate::discriminator::{Discriminator, Projection};
use crate::embedding::{ChannelProjector, PatchEmbeddings, ScaleAggregator, ScaleAligner};
use crate::metrics::MetricsProvider;
use crate::patches::{PatchGrid, ScoreGrid};
use crate::segmentation::{ensemble_maps, ensemble_scores, SegmentationReconstructor};
use crate::selector::{BestRecord, CheckpointSelector};
use crate::tensor::FeatureTensor;
use crate::trainer::DiscriminatorTrainer;
use crate::utils::rng::SimpleRng;

/// Scores and pixel maps for one image batch.
///
/// `image_scores` and `score_maps` are raw (un-normalized) anomaly scores:
/// higher means more anomalous.
pub struct BatchPrediction {
    pub image_scores: Vec<f32>,
    pub score_maps: Vec<Vec<f32>>,
    pub grid: (usize, usize),
}

/// Held-out evaluation set: image batches, per-image anomaly labels, and
/// optional per-image ground-truth masks at image resolution.
pub struct EvaluationData {
    pub batches: Vec<FeatureTensor>,
    pub labels: Vec<bool>,
    pub masks: Option<Vec<Vec<f32>>>,
}

/// One anomaly detection model instance: configuration, backbone handle, and
/// discriminator state. One instance per training run.
pub struct AnomalyDetector {
    config: DetectorConfig,
    backbone: Box<dyn FeatureExtractor>,
    aligner: ScaleAligner,
    projector: ChannelProjector,
    aggregator: ScaleAggregator,
    discriminator: Discriminator,
    projection: Option<Projection>,
    rng: SimpleRng,
}

impl AnomalyDetector {
    /// Build a detector from a validated configuration.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration values.
    pub fn new(
        config: DetectorConfig,
        backbone: Box<dyn FeatureExtractor>,
        seed: u64,
    ) -> Result<Self, Box<dyn Error>> {
        validate_config(&config)?;

        let grid = PatchGrid::new(config.patchsize, config.patchstride)?;
        let aligner = ScaleAligner::new(grid);
        let projector = ChannelProjector::new(config.pretrain_embed_dimension)?;
        let aggregator = ScaleAggregator::new(config.target_embed_dimension)?;

        let mut rng = SimpleRng::new(seed);
        let discriminator = Discriminator::new(
            config.target_embed_dimension,
            config.dsc_layers,
            config.dsc_hidden,
            &mut rng,
        )?;
        let projection = if config.pre_proj > 0 {
            Some(Projection::new(
                config.target_embed_dimension,
                config.target_embed_dimension,
                config.pre_proj,
                config.proj_layer_type,
                &mut rng,
            )?)
        } else {
            None
        };

        Ok(Self {
            config,
            backbone,
            aligner,
            projector,
            aggregator,
            discriminator,
            projection,
            rng,
        })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Pull the configured layers from the backbone, in order.
    fn ordered_features(
        &self,
        images: &FeatureTensor,
    ) -> Result<Vec<FeatureTensor>, Box<dyn Error>> {
        let mut features = self
            .backbone
            .extract(images, &self.config.layers_to_extract_from)?;
        let mut ordered = Vec::with_capacity(self.config.layers_to_extract_from.len());
        for name in &self.config.layers_to_extract_from {
            let tensor = features.remove(name).ok_or_else(|| {
                Box::new(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("backbone did not return layer {:?}", name),
                )) as Box<dyn Error>
            })?;
            ordered.push(tensor);
        }
        Ok(ordered)
    }

    /// Compute patch embeddings for an image batch.
    ///
    /// Returns the embeddings and the reference patch grid dimensions.
    pub fn embed(
        &self,
        images: &FeatureTensor,
    ) -> Result<(PatchEmbeddings, (usize, usize)), Box<dyn Error>> {
        let features = self.ordered_features(images)?;
        let (aligned, patch_shapes) = self.aligner.align(&features)?;
        let ref_grid = patch_shapes[0];

        let rows = aligned[0].batch() * aligned[0].cells();
        let stacked = self.projector.project(&aligned)?;
        let embeddings = self.aggregator.aggregate(
            &stacked,
            rows,
            aligned.len(),
            self.projector.output_dim(),
        )?;
        Ok((embeddings, ref_grid))
    }

    /// Score one image batch.
    ///
    /// Produces a raw anomaly score per image (max or top-k mean over the
    /// patch grid) and a pixel-level anomaly map per image at the input
    /// resolution.
    pub fn predict(&mut self, images: &FeatureTensor) -> Result<BatchPrediction, Box<dyn Error>> {
        self.discriminator.set_training(false);

        let (embeddings, (grid_h, grid_w)) = self.embed(images)?;
        let scored = match &self.projection {
            Some(projection) => projection.forward(&embeddings.data, embeddings.rows),
            None => embeddings.data.clone(),
        };
        let normality = self.discriminator.forward(&scored, embeddings.rows);
        // higher discriminator score = more normal; negate for anomaly
        let anomaly: Vec<f32> = normality.iter().map(|s| -s).collect();

        let batch = images.batch();
        let grid: ScoreGrid = PatchGrid::unpatch_scores(anomaly, batch, 1)?;
        if grid.cells() != grid_h * grid_w {
            return Err(Box::new(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "{} patch scores per image do not fill the ({}, {}) grid",
                    grid.cells(),
                    grid_h,
                    grid_w
                ),
            )));
        }
        let image_scores = PatchGrid::reduce_to_scalar(&grid, self.config.top_k);

        let reconstructor = SegmentationReconstructor::new(images.height(), images.width())?;
        let cells = grid.cells();
        let mut score_maps = Vec::with_capacity(batch);
        for b in 0..batch {
            let per_image = &grid.data()[b * cells..(b + 1) * cells];
            score_maps.push(reconstructor.reconstruct(per_image, grid_h, grid_w)?);
        }

        Ok(BatchPrediction {
            image_scores,
            score_maps,
            grid: (grid_h, grid_w),
        })
    }

    /// Evaluate on a held-out set.
    ///
    /// Scores are min-max normalized per prediction pass before the metrics
    /// collaborator sees them; pixel metrics are skipped (reported as -1.0)
    /// when no ground-truth masks exist.
    pub fn evaluate(
        &mut self,
        data: &EvaluationData,
        metrics: &dyn MetricsProvider,
    ) -> Result<BestRecord, Box<dyn Error>> {
        let mut scores = Vec::with_capacity(data.labels.len());
        let mut maps = Vec::with_capacity(data.labels.len());
        for batch in &data.batches {
            let prediction = self.predict(batch)?;
            scores.extend(prediction.image_scores);
            maps.extend(prediction.score_maps);
        }
        if scores.len() != data.labels.len() {
            return Err(Box::new(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "{} predictions do not match {} labels",
                    scores.len(),
                    data.labels.len()
                ),
            )));
        }

        let normalized_scores = ensemble_scores(&[scores])?;
        let image_auroc = metrics.image_auroc(&normalized_scores, &data.labels);

        let (pixel_auroc, pro_score) = match &data.masks {
            Some(masks) => {
                if masks.len() != maps.len() {
                    return Err(Box::new(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("{} masks do not match {} score maps", masks.len(), maps.len()),
                    )));
                }
                let normalized_maps = ensemble_maps(&[maps])?;
                (
                    metrics.pixel_auroc(&normalized_maps, masks),
                    metrics.pro(masks, &normalized_maps),
                )
            }
            None => (-1.0, -1.0),
        };

        Ok(BestRecord {
            image_auroc,
            pixel_auroc,
            pro_score,
        })
    }

    /// Restore discriminator (and projection) parameters from a record.
    pub fn apply_record(&mut self, record: &CheckpointRecord) -> Result<(), Box<dyn Error>> {
        self.discriminator.load_state_dict(&record.discriminator)?;
        if let (Some(projection), Some(state)) = (&mut self.projection, &record.pre_projection) {
            projection.load_state_dict(state)?;
        }
        Ok(())
    }

    /// Train the discriminator over the configured meta-epochs.
    ///
    /// When a checkpoint already exists at `checkpoint_path`, it is restored
    /// and evaluated instead of retraining. Otherwise the meta-epoch loop
    /// runs: inner discriminator epochs, held-out evaluation, best-record
    /// selection, and a single atomic persist of the winning snapshot at the
    /// very end. A failed run leaves any previous checkpoint untouched.
    pub fn train(
        &mut self,
        training_batches: &[FeatureTensor],
        eval_data: &EvaluationData,
        metrics: &dyn MetricsProvider,
        checkpoint_path: &Path,
    ) -> Result<BestRecord, Box<dyn Error>> {
        if let Some(record) = load_checkpoint(checkpoint_path)? {
            info!("restoring checkpoint from {:?}", checkpoint_path);
            self.apply_record(&record)?;
            return self.evaluate(eval_data, metrics);
        }

        if training_batches.is_empty() {
            return Err(Box::new(io::Error::new(
                io::ErrorKind::InvalidData,
                "training requires at least one image batch",
            )));
        }

        let mut trainer =
            DiscriminatorTrainer::new(&self.config, &self.discriminator, self.projection.as_ref())?;
        let mut selector = CheckpointSelector::new();

        for meta_epoch in 0..self.config.meta_epochs {
            let mut embeddings = Vec::with_capacity(training_batches.len());
            for batch in training_batches {
                let (batch_embeddings, _) = self.embed(batch)?;
                embeddings.push(batch_embeddings);
            }

            trainer.run(
                &mut self.discriminator,
                self.projection.as_mut(),
                &embeddings,
                &mut self.rng,
            )?;

            let eval = self.evaluate(eval_data, metrics)?;
            selector.observe(eval, &self.discriminator, self.projection.as_ref());
            let best = selector.best().unwrap();
            info!(
                "----- {} I-AUROC:{:.4}(MAX:{:.4}) P-AUROC:{:.4}(MAX:{:.4}) PRO:{:.4}(MAX:{:.4}) -----",
                meta_epoch,
                eval.image_auroc,
                best.image_auroc,
                eval.pixel_auroc,
                best.pixel_auroc,
                eval.pro_score,
                best.pro_score
            );
        }

        let (best, record) = selector
            .into_best()
            .expect("at least one meta-epoch was evaluated");
        save_checkpoint(&record, checkpoint_path)?;
        Ok(best)
    }
}
