//! Pixel-level anomaly map reconstruction.
//!
//! Patch-grid score maps are bilinearly upsampled to the original image
//! resolution, and per-image min-max normalization (with a floor-clamped
//! denominator) makes maps comparable across images and across ensembled
//! prediction passes.

use std::error::Error;
use std::io;

use crate::utils::resample_bilinear;

/// Denominator floor for min-max normalization of degenerate maps.
const NORM_FLOOR: f32 = 1e-2;

/// Upsamples patch-resolution score maps to image resolution.
pub struct SegmentationReconstructor {
    target_h: usize,
    target_w: usize,
}

impl SegmentationReconstructor {
    /// Create a reconstructor for a fixed output resolution.
    ///
    /// # Errors
    ///
    /// Rejects zero target dimensions.
    pub fn new(target_h: usize, target_w: usize) -> Result<Self, Box<dyn Error>> {
        if target_h == 0 || target_w == 0 {
            return Err(Box::new(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid segmentation target ({}, {})", target_h, target_w),
            )));
        }
        Ok(Self { target_h, target_w })
    }

    pub fn target(&self) -> (usize, usize) {
        (self.target_h, self.target_w)
    }

    /// Resize one patch-grid score map to the target resolution.
    ///
    /// Score-preserving: values are interpolated, never re-ranked.
    ///
    /// # Errors
    ///
    /// Fails when the buffer does not match the stated grid.
    pub fn reconstruct(
        &self,
        patch_scores: &[f32],
        grid_h: usize,
        grid_w: usize,
    ) -> Result<Vec<f32>, Box<dyn Error>> {
        if patch_scores.len() != grid_h * grid_w {
            return Err(Box::new(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "score map of {} values does not match grid ({}, {})",
                    patch_scores.len(),
                    grid_h,
                    grid_w
                ),
            )));
        }
        let mut out = vec![0.0f32; self.target_h * self.target_w];
        resample_bilinear(
            patch_scores,
            grid_h,
            grid_w,
            &mut out,
            self.target_h,
            self.target_w,
        );
        Ok(out)
    }
}

/// Min-max normalize a score buffer in place.
///
/// The denominator is clamped to a floor of 1e-2, so a constant map
/// normalizes to near-zero values instead of dividing by zero.
pub fn normalize_min_max(scores: &mut [f32]) {
    if scores.is_empty() {
        return;
    }
    let min = scores.iter().cloned().fold(f32::INFINITY, f32::min);
    let max = scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let denom = (max - min).max(NORM_FLOOR);
    for v in scores.iter_mut() {
        *v = (*v - min) / denom;
    }
}

/// Average per-pass image scores after per-pass min-max normalization.
///
/// Each pass holds one score per image; a single pass reduces to plain
/// normalization.
pub fn ensemble_scores(passes: &[Vec<f32>]) -> Result<Vec<f32>, Box<dyn Error>> {
    if passes.is_empty() {
        return Err(Box::new(io::Error::new(
            io::ErrorKind::InvalidData,
            "score ensembling requires at least one pass",
        )));
    }
    let n_images = passes[0].len();
    for (i, pass) in passes.iter().enumerate() {
        if pass.len() != n_images {
            return Err(Box::new(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "pass {} holds {} scores but the first pass holds {}",
                    i,
                    pass.len(),
                    n_images
                ),
            )));
        }
    }

    let mut accum = vec![0.0f32; n_images];
    for pass in passes {
        let mut normalized = pass.clone();
        normalize_min_max(&mut normalized);
        for (a, v) in accum.iter_mut().zip(&normalized) {
            *a += v;
        }
    }
    let inv = 1.0 / passes.len() as f32;
    for a in &mut accum {
        *a *= inv;
    }
    Ok(accum)
}

/// Average per-pass segmentation maps after per-image min-max normalization.
///
/// `passes[p][i]` is image `i`'s pixel map in pass `p`. Each map is
/// normalized per image before averaging across passes.
pub fn ensemble_maps(passes: &[Vec<Vec<f32>>]) -> Result<Vec<Vec<f32>>, Box<dyn Error>> {
    if passes.is_empty() {
        return Err(Box::new(io::Error::new(
            io::ErrorKind::InvalidData,
            "map ensembling requires at least one pass",
        )));
    }
    let n_images = passes[0].len();
    for (i, pass) in passes.iter().enumerate() {
        if pass.len() != n_images {
            return Err(Box::new(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "pass {} holds {} maps but the first pass holds {}",
                    i,
                    pass.len(),
                    n_images
                ),
            )));
        }
    }

    let mut result = Vec::with_capacity(n_images);
    for img in 0..n_images {
        let mut accum = vec![0.0f32; passes[0][img].len()];
        for pass in passes {
            let mut normalized = pass[img].clone();
            normalize_min_max(&mut normalized);
            if normalized.len() != accum.len() {
                return Err(Box::new(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("inconsistent map sizes for image {}", img),
                )));
            }
            for (a, v) in accum.iter_mut().zip(&normalized) {
                *a += v;
            }
        }
        let inv = 1.0 / passes.len() as f32;
        for a in &mut accum {
            *a *= inv;
        }
        result.push(accum);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconstruct_constant_map() {
        let reconstructor = SegmentationReconstructor::new(8, 8).unwrap();
        let map = reconstructor.reconstruct(&[3.0; 4], 2, 2).unwrap();
        assert_eq!(map.len(), 64);
        for &v in &map {
            assert!((v - 3.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_reconstruct_rejects_bad_grid() {
        let reconstructor = SegmentationReconstructor::new(8, 8).unwrap();
        assert!(reconstructor.reconstruct(&[1.0; 5], 2, 2).is_err());
    }

    #[test]
    fn test_reconstruct_preserves_peak_location() {
        let reconstructor = SegmentationReconstructor::new(9, 9).unwrap();
        // peak in the bottom-right cell of a 3x3 grid
        let grid = vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0];
        let map = reconstructor.reconstruct(&grid, 3, 3).unwrap();
        let (argmax, _) = map
            .iter()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |(bi, bv), (i, &v)| {
                if v > bv {
                    (i, v)
                } else {
                    (bi, bv)
                }
            });
        let (y, x) = (argmax / 9, argmax % 9);
        assert!(y >= 6 && x >= 6, "peak drifted to ({}, {})", y, x);
    }

    #[test]
    fn test_normalize_spans_unit_interval() {
        let mut scores = vec![2.0f32, 4.0, 6.0];
        normalize_min_max(&mut scores);
        assert_eq!(scores, vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn test_normalize_degenerate_map() {
        // all entries equal: floor-clamped denominator, near-zero output
        let mut scores = vec![5.0f32; 16];
        normalize_min_max(&mut scores);
        for &v in &scores {
            assert!(v.abs() < 1e-6);
            assert!(!v.is_nan());
        }
    }

    #[test]
    fn test_single_pass_ensemble_is_plain_normalization() {
        let pass = vec![vec![1.0f32, 3.0, 2.0]];
        let ensembled = ensemble_scores(&pass).unwrap();
        let mut expected = pass[0].clone();
        normalize_min_max(&mut expected);
        assert_eq!(ensembled, expected);
    }

    #[test]
    fn test_ensemble_scores_averages_passes() {
        let passes = vec![vec![0.0f32, 1.0], vec![1.0f32, 0.0]];
        let ensembled = ensemble_scores(&passes).unwrap();
        assert_eq!(ensembled, vec![0.5, 0.5]);
    }

    #[test]
    fn test_ensemble_scores_rejects_mismatch() {
        let passes = vec![vec![0.0f32, 1.0], vec![1.0f32]];
        assert!(ensemble_scores(&passes).is_err());
    }

    #[test]
    fn test_ensemble_maps_normalizes_per_image() {
        let passes = vec![vec![vec![0.0f32, 10.0], vec![5.0f32, 5.0]]];
        let maps = ensemble_maps(&passes).unwrap();
        assert_eq!(maps[0], vec![0.0, 1.0]);
        // degenerate map stays near zero
        assert!(maps[1].iter().all(|&v| v.abs() < 1e-6));
    }
}
