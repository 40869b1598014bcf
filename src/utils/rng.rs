//! Simple random number generator for reproducibility.
//!
//! This module provides a lightweight xorshift-based PRNG that doesn't require
//! external dependencies, ensuring reproducible results across runs. Gaussian
//! samples are produced with the Box-Muller transform so that noise synthesis
//! and weight initialization stay deterministic under a fixed seed.

/// Simple RNG for reproducibility without external crates.
///
/// Uses xorshift for uniform draws and Box-Muller for gaussian draws.
pub struct SimpleRng {
    state: u64,
    cached_gaussian: Option<f32>,
}

impl SimpleRng {
    /// Create a new RNG with explicit seed (if zero, use a fixed value).
    pub fn new(seed: u64) -> Self {
        let state = if seed == 0 { 0x9e3779b97f4a7c15 } else { seed };
        Self {
            state,
            cached_gaussian: None,
        }
    }

    /// Basic xorshift to generate u32.
    pub fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        (x >> 32) as u32
    }

    /// Convert to [0, 1).
    pub fn next_f32(&mut self) -> f32 {
        self.next_u32() as f32 / u32::MAX as f32
    }

    /// Uniform sample in [low, high).
    pub fn gen_range_f32(&mut self, low: f32, high: f32) -> f32 {
        low + (high - low) * self.next_f32()
    }

    /// Integer sample in [0, upper).
    pub fn gen_usize(&mut self, upper: usize) -> usize {
        if upper == 0 {
            0
        } else {
            (self.next_u32() as usize) % upper
        }
    }

    /// Standard normal sample via the Box-Muller transform.
    ///
    /// Two uniform draws yield a pair of independent normals; the second is
    /// cached and returned by the next call.
    pub fn next_gaussian(&mut self) -> f32 {
        if let Some(z) = self.cached_gaussian.take() {
            return z;
        }
        // Guard the log against a zero draw.
        let mut u1 = self.next_f32();
        while u1 <= f32::EPSILON {
            u1 = self.next_f32();
        }
        let u2 = self.next_f32();
        let radius = (-2.0 * u1.ln()).sqrt();
        let angle = 2.0 * std::f32::consts::PI * u2;
        self.cached_gaussian = Some(radius * angle.sin());
        radius * angle.cos()
    }

    /// Normal sample with the given mean and standard deviation.
    pub fn gen_gaussian(&mut self, mean: f32, std: f32) -> f32 {
        mean + std * self.next_gaussian()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rng_deterministic() {
        let mut rng1 = SimpleRng::new(42);
        let mut rng2 = SimpleRng::new(42);

        for _ in 0..100 {
            assert_eq!(rng1.next_u32(), rng2.next_u32());
        }
    }

    #[test]
    fn test_rng_next_f32_range() {
        let mut rng = SimpleRng::new(12345);

        for _ in 0..1000 {
            let val = rng.next_f32();
            assert!(val >= 0.0 && val < 1.0);
        }
    }

    #[test]
    fn test_rng_gen_range_f32() {
        let mut rng = SimpleRng::new(67890);

        for _ in 0..1000 {
            let val = rng.gen_range_f32(-1.0, 1.0);
            assert!(val >= -1.0 && val < 1.0);
        }
    }

    #[test]
    fn test_rng_gen_usize() {
        let mut rng = SimpleRng::new(11111);

        for _ in 0..1000 {
            let val = rng.gen_usize(10);
            assert!(val < 10);
        }
    }

    #[test]
    fn test_rng_gen_usize_zero() {
        let mut rng = SimpleRng::new(22222);
        assert_eq!(rng.gen_usize(0), 0);
    }

    #[test]
    fn test_gaussian_deterministic() {
        let mut rng1 = SimpleRng::new(7);
        let mut rng2 = SimpleRng::new(7);

        for _ in 0..100 {
            assert_eq!(rng1.next_gaussian(), rng2.next_gaussian());
        }
    }

    #[test]
    fn test_gaussian_moments() {
        let mut rng = SimpleRng::new(33333);
        let n = 20000;
        let samples: Vec<f32> = (0..n).map(|_| rng.next_gaussian()).collect();

        let mean: f32 = samples.iter().sum::<f32>() / n as f32;
        let var: f32 = samples.iter().map(|&x| (x - mean) * (x - mean)).sum::<f32>() / n as f32;

        assert!(mean.abs() < 0.05, "mean should be ~0, got {}", mean);
        assert!((var - 1.0).abs() < 0.05, "variance should be ~1, got {}", var);
    }

    #[test]
    fn test_gaussian_scaled() {
        let mut rng = SimpleRng::new(44444);
        let n = 20000;
        let samples: Vec<f32> = (0..n).map(|_| rng.gen_gaussian(3.0, 0.5)).collect();

        let mean: f32 = samples.iter().sum::<f32>() / n as f32;
        let var: f32 = samples.iter().map(|&x| (x - mean) * (x - mean)).sum::<f32>() / n as f32;

        assert!((mean - 3.0).abs() < 0.05);
        assert!((var - 0.25).abs() < 0.02);
    }
}
