//! Discriminator training loop.
//!
//! Each inner epoch walks the embedding batches: real embeddings (through the
//! pre-projection when enabled) are perturbed into synthetic fakes, both
//! populations are scored in one concatenated discriminator pass so they
//! share normalization statistics, and a hinge margin loss pushes real scores
//! above `+margin` and fake scores below `-margin`.

use std::error::Error;
use std::io;

use log::{debug, info};

use crate::config::DetectorConfig;
use crate::discriminator::{Discriminator, Projection};
use crate::embedding::PatchEmbeddings;
use crate::noise::NoiseSynthesizer;
use crate::optimizers::{Adam, Optimizer};
use crate::utils::lr_scheduler::{CosineAnnealing, LRScheduler};
use crate::utils::rng::SimpleRng;

const ADAM_BETA1: f32 = 0.9;
const ADAM_BETA2: f32 = 0.999;
const ADAM_EPSILON: f32 = 1e-8;
const DSC_WEIGHT_DECAY: f32 = 1e-5;
/// The pre-projection trains at a tenth of the discriminator rate.
const PROJ_LR_FACTOR: f32 = 0.1;
/// Cosine decay floor relative to the base discriminator rate.
const COS_MIN_LR_FACTOR: f32 = 0.4;

/// Diagnostics for one inner epoch.
///
/// `p_true` / `p_fake` are the fractions of real/fake scores already beyond
/// the margin; they are observability only and never alter control flow.
#[derive(Debug, Clone, Copy)]
pub struct EpochStats {
    pub loss: f32,
    pub p_true: f32,
    pub p_fake: f32,
    pub lr: f32,
}

/// Runs the inner discriminator epochs of each meta-epoch.
///
/// Owns the optimizer banks and the optional cosine schedule, so learning
/// rate state carries across meta-epochs.
pub struct DiscriminatorTrainer {
    gan_epochs: usize,
    margin: f32,
    noise: NoiseSynthesizer,
    dsc_optimizers: Vec<Adam>,
    proj_optimizers: Vec<Adam>,
    scheduler: Option<CosineAnnealing>,
}

impl DiscriminatorTrainer {
    /// Build a trainer for a discriminator (and optional projection).
    pub fn new(
        config: &DetectorConfig,
        discriminator: &Discriminator,
        projection: Option<&Projection>,
    ) -> Result<Self, Box<dyn Error>> {
        let noise = NoiseSynthesizer::new(config.mix_noise, config.noise_std)?;

        let dsc_optimizers: Vec<Adam> = (0..discriminator.num_parameter_tensors())
            .map(|_| {
                Adam::with_weight_decay(
                    config.dsc_lr,
                    ADAM_BETA1,
                    ADAM_BETA2,
                    ADAM_EPSILON,
                    DSC_WEIGHT_DECAY,
                )
            })
            .collect();

        let proj_optimizers: Vec<Adam> = projection
            .map(|proj| {
                (0..proj.num_parameter_tensors())
                    .map(|_| {
                        Adam::new(
                            config.dsc_lr * PROJ_LR_FACTOR,
                            ADAM_BETA1,
                            ADAM_BETA2,
                            ADAM_EPSILON,
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();

        let scheduler = config.cos_lr.then(|| {
            CosineAnnealing::new(
                config.dsc_lr,
                config.dsc_lr * COS_MIN_LR_FACTOR,
                config.meta_epochs * config.gan_epochs,
            )
        });

        Ok(Self {
            gan_epochs: config.gan_epochs,
            margin: config.dsc_margin,
            noise,
            dsc_optimizers,
            proj_optimizers,
            scheduler,
        })
    }

    /// Current discriminator learning rate.
    pub fn learning_rate(&self) -> f32 {
        self.dsc_optimizers
            .first()
            .map_or(0.0, |opt| opt.learning_rate())
    }

    /// Run the inner epochs of one meta-epoch over the given batches.
    ///
    /// Returns per-epoch diagnostics.
    ///
    /// # Errors
    ///
    /// A non-finite loss is fatal: the run aborts immediately so a corrupted
    /// discriminator is never checkpointed. Shape mismatches between the
    /// embeddings and the discriminator also abort.
    pub fn run(
        &mut self,
        discriminator: &mut Discriminator,
        mut projection: Option<&mut Projection>,
        batches: &[PatchEmbeddings],
        rng: &mut SimpleRng,
    ) -> Result<Vec<EpochStats>, Box<dyn Error>> {
        if batches.is_empty() {
            return Err(Box::new(io::Error::new(
                io::ErrorKind::InvalidData,
                "discriminator training requires at least one embedding batch",
            )));
        }
        for batch in batches {
            if batch.dim != discriminator.input_size() {
                return Err(Box::new(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "embedding width {} does not match discriminator input {}",
                        batch.dim,
                        discriminator.input_size()
                    ),
                )));
            }
        }

        discriminator.set_training(true);

        let mut epochs = Vec::with_capacity(self.gan_epochs);
        for epoch in 0..self.gan_epochs {
            let mut sum_loss = 0.0f32;
            let mut sum_p_true = 0.0f32;
            let mut sum_p_fake = 0.0f32;

            for batch in batches {
                let (loss, p_true, p_fake) = self.train_batch(
                    discriminator,
                    projection.as_deref_mut(),
                    batch,
                    rng,
                )?;
                sum_loss += loss;
                sum_p_true += p_true;
                sum_p_fake += p_fake;
            }

            if let Some(scheduler) = &mut self.scheduler {
                scheduler.step();
                let lr = scheduler.get_lr();
                for opt in &mut self.dsc_optimizers {
                    opt.set_learning_rate(lr);
                }
                for opt in &mut self.proj_optimizers {
                    opt.set_learning_rate(lr * PROJ_LR_FACTOR);
                }
            }

            let n = batches.len() as f32;
            let stats = EpochStats {
                loss: sum_loss / n,
                p_true: sum_p_true / n,
                p_fake: sum_p_fake / n,
                lr: self.learning_rate(),
            };
            info!(
                "epoch:{} loss:{:.5} lr:{:.6} p_true:{:.3} p_fake:{:.3}",
                epoch, stats.loss, stats.lr, stats.p_true, stats.p_fake
            );
            epochs.push(stats);
        }
        Ok(epochs)
    }

    fn train_batch(
        &mut self,
        discriminator: &mut Discriminator,
        projection: Option<&mut Projection>,
        batch: &PatchEmbeddings,
        rng: &mut SimpleRng,
    ) -> Result<(f32, f32, f32), Box<dyn Error>> {
        let rows = batch.rows;
        let dim = batch.dim;

        let true_feats = match &projection {
            Some(proj) => proj.forward(&batch.data, rows),
            None => batch.data.clone(),
        };
        let fake_feats = self.noise.synthesize(&true_feats, rows, dim, rng);

        // One pass over real + fake so batch normalization sees both.
        let mut combined = Vec::with_capacity(2 * rows * dim);
        combined.extend_from_slice(&true_feats);
        combined.extend_from_slice(&fake_feats);
        let scores = discriminator.forward(&combined, 2 * rows);
        if scores.iter().any(|s| !s.is_finite()) {
            return Err(Box::new(io::Error::new(
                io::ErrorKind::InvalidData,
                "non-finite discriminator scores; aborting the run",
            )));
        }
        let (true_scores, fake_scores) = scores.split_at(rows);

        let margin = self.margin;
        let p_true =
            true_scores.iter().filter(|&&s| s >= margin).count() as f32 / rows as f32;
        let p_fake =
            fake_scores.iter().filter(|&&s| s < -margin).count() as f32 / rows as f32;

        let true_loss: f32 = true_scores.iter().map(|&s| (margin - s).max(0.0)).sum::<f32>()
            / rows as f32;
        let fake_loss: f32 = fake_scores.iter().map(|&s| (margin + s).max(0.0)).sum::<f32>()
            / rows as f32;
        let loss = true_loss + fake_loss;

        if !loss.is_finite() {
            return Err(Box::new(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("non-finite training loss {}; aborting the run", loss),
            )));
        }
        debug!(
            "batch rows:{} loss:{:.5} p_true:{:.3} p_fake:{:.3}",
            rows, loss, p_true, p_fake
        );

        // Hinge gradient: active real samples push up, active fakes push down.
        let mut grad_scores = vec![0.0f32; 2 * rows];
        let inv = 1.0 / rows as f32;
        for (g, &s) in grad_scores[..rows].iter_mut().zip(true_scores) {
            if margin - s > 0.0 {
                *g = -inv;
            }
        }
        for (g, &s) in grad_scores[rows..].iter_mut().zip(fake_scores) {
            if margin + s > 0.0 {
                *g = inv;
            }
        }

        let grad_input = discriminator.backward(&grad_scores);
        discriminator.apply_gradients(&mut self.dsc_optimizers);

        if let Some(proj) = projection {
            let _ = proj.backward(&grad_input[..rows * dim]);
            proj.apply_gradients(&mut self.proj_optimizers);
        }

        Ok((loss, p_true, p_fake))
    }
}

/// Hinge margin loss over split score populations.
///
/// Zero exactly when every real score clears `+margin` and every fake score
/// clears `-margin`; non-negative always.
pub fn hinge_loss(true_scores: &[f32], fake_scores: &[f32], margin: f32) -> f32 {
    let true_loss: f32 = true_scores.iter().map(|&s| (margin - s).max(0.0)).sum::<f32>()
        / true_scores.len().max(1) as f32;
    let fake_loss: f32 = fake_scores.iter().map(|&s| (margin + s).max(0.0)).sum::<f32>()
        / fake_scores.len().max(1) as f32;
    true_loss + fake_loss
}
