//! Synthetic anomalous embedding generation.
//!
//! Fake embeddings are real embeddings perturbed with a mixture of zero-mean
//! gaussians whose standard deviations grow geometrically. Exactly one
//! mixture component is selected uniformly at random per sample and applied
//! via a one-hot mask multiply-and-sum, not a branch.

use std::error::Error;
use std::io;

use crate::utils::rng::SimpleRng;

/// Geometric growth factor between successive noise channels.
const CHANNEL_GROWTH: f32 = 1.1;

/// Gaussian-mixture noise generator for synthetic anomalies.
///
/// Channel `k` samples from `Normal(0, noise_std * 1.1^k)` for
/// `k in [0, mix_noise)`. With `mix_noise = 1` this degenerates to a single
/// fixed-std gaussian perturbation.
pub struct NoiseSynthesizer {
    mix_noise: usize,
    noise_std: f32,
}

impl NoiseSynthesizer {
    /// Create a synthesizer.
    ///
    /// # Errors
    ///
    /// Rejects a zero mixture count or a non-positive base deviation.
    pub fn new(mix_noise: usize, noise_std: f32) -> Result<Self, Box<dyn Error>> {
        if mix_noise == 0 {
            return Err(Box::new(io::Error::new(
                io::ErrorKind::InvalidData,
                "mix_noise must be greater than 0",
            )));
        }
        if !(noise_std > 0.0) {
            return Err(Box::new(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("noise_std must be positive, got {}", noise_std),
            )));
        }
        Ok(Self { mix_noise, noise_std })
    }

    pub fn mix_noise(&self) -> usize {
        self.mix_noise
    }

    pub fn noise_std(&self) -> f32 {
        self.noise_std
    }

    /// Perturb real embeddings into synthetic anomalous ones.
    ///
    /// Draws one channel index per row, materializes every channel's noise
    /// over the full shape, and combines them through the per-row one-hot
    /// mask. The generator is passed in explicitly so runs are reproducible.
    ///
    /// # Panics
    ///
    /// Panics when the buffer does not match `rows * dim`.
    pub fn synthesize(
        &self,
        real: &[f32],
        rows: usize,
        dim: usize,
        rng: &mut SimpleRng,
    ) -> Vec<f32> {
        assert_eq!(
            real.len(),
            rows * dim,
            "embedding buffer mismatch: expected {}, got {}",
            rows * dim,
            real.len()
        );

        let channel_idxs: Vec<usize> = (0..rows).map(|_| rng.gen_usize(self.mix_noise)).collect();

        let mut channels = Vec::with_capacity(self.mix_noise);
        for k in 0..self.mix_noise {
            let std = self.noise_std * CHANNEL_GROWTH.powi(k as i32);
            let noise: Vec<f32> = (0..rows * dim).map(|_| rng.gen_gaussian(0.0, std)).collect();
            channels.push(noise);
        }

        let mut out = real.to_vec();
        for r in 0..rows {
            for (k, channel) in channels.iter().enumerate() {
                // one-hot select: only the drawn channel contributes
                let mask = if channel_idxs[r] == k { 1.0 } else { 0.0 };
                for d in 0..dim {
                    out[r * dim + d] += mask * channel[r * dim + d];
                }
            }
        }
        out
    }
}
