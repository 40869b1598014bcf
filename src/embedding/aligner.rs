//! Multi-scale patch alignment.
//!
//! Backbone layers emit feature maps at different spatial resolutions. Each
//! layer is patchified with the shared grid spec, and every non-reference
//! layer's patch grid is bilinearly resampled onto the first layer's grid so
//! that anomaly evidence from all layers lands on the same patch locations
//! before fusion.

use std::error::Error;
use std::io;

use crate::patches::{PatchGrid, PatchSet};
use crate::tensor::FeatureTensor;
use crate::utils::resample_bilinear;

/// Aligns patches from several backbone layers onto one reference grid.
pub struct ScaleAligner {
    grid: PatchGrid,
}

impl ScaleAligner {
    pub fn new(grid: PatchGrid) -> Self {
        Self { grid }
    }

    pub fn grid(&self) -> &PatchGrid {
        &self.grid
    }

    /// Patchify every layer and regrid all of them onto the first layer's
    /// patch grid.
    ///
    /// Returns the aligned per-layer patch sets (all sharing the reference
    /// grid dimensions) together with each layer's original grid dimensions.
    ///
    /// # Errors
    ///
    /// Fails on an empty layer list, on batch-size disagreement between
    /// layers, or on patchify shape errors. Resampling a layer already at the
    /// reference resolution returns its values unchanged.
    pub fn align(
        &self,
        features: &[FeatureTensor],
    ) -> Result<(Vec<PatchSet>, Vec<(usize, usize)>), Box<dyn Error>> {
        if features.is_empty() {
            return Err(Box::new(io::Error::new(
                io::ErrorKind::InvalidData,
                "alignment requires at least one feature layer",
            )));
        }
        let batch = features[0].batch();
        for (i, layer) in features.iter().enumerate() {
            if layer.batch() != batch {
                return Err(Box::new(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "layer {} has batch size {} but the reference layer has {}",
                        i,
                        layer.batch(),
                        batch
                    ),
                )));
            }
        }

        let mut patch_sets = Vec::with_capacity(features.len());
        let mut patch_shapes = Vec::with_capacity(features.len());
        for layer in features {
            let (patches, dims) = self.grid.patchify(layer)?;
            patch_sets.push(patches);
            patch_shapes.push(dims);
        }

        let (ref_h, ref_w) = patch_shapes[0];
        for patches in patch_sets.iter_mut().skip(1) {
            if patches.grid_h() == ref_h && patches.grid_w() == ref_w {
                continue;
            }
            *patches = regrid(patches, ref_h, ref_w);
        }

        Ok((patch_sets, patch_shapes))
    }
}

/// Resample a patch set's grid plane to new grid dimensions.
///
/// For every (batch, channel, patch-row, patch-col) coordinate, the values
/// across the grid form a 2D plane that is bilinearly resampled from the
/// source grid to the destination grid (half-pixel-centered sampling).
fn regrid(patches: &PatchSet, dst_h: usize, dst_w: usize) -> PatchSet {
    let batch = patches.batch();
    let channels = patches.channels();
    let p = patches.patch_size();
    let (src_h, src_w) = (patches.grid_h(), patches.grid_w());

    let mut out = vec![0.0f32; batch * dst_h * dst_w * channels * p * p];
    let mut src_plane = vec![0.0f32; src_h * src_w];
    let mut dst_plane = vec![0.0f32; dst_h * dst_w];
    for b in 0..batch {
        for c in 0..channels {
            for py in 0..p {
                for px in 0..p {
                    for gy in 0..src_h {
                        for gx in 0..src_w {
                            src_plane[gy * src_w + gx] = patches.at(b, gy * src_w + gx, c, py, px);
                        }
                    }
                    resample_bilinear(&src_plane, src_h, src_w, &mut dst_plane, dst_h, dst_w);
                    for gy in 0..dst_h {
                        for gx in 0..dst_w {
                            let cell = gy * dst_w + gx;
                            let idx = (((b * dst_h * dst_w + cell) * channels + c) * p + py) * p + px;
                            out[idx] = dst_plane[gy * dst_w + gx];
                        }
                    }
                }
            }
        }
    }
    PatchSet::from_raw(out, batch, dst_h, dst_w, channels, p)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_tensor(batch: usize, channels: usize, h: usize, w: usize) -> FeatureTensor {
        let data: Vec<f32> = (0..batch * channels * h * w).map(|v| v as f32).collect();
        FeatureTensor::new(data, batch, channels, h, w).unwrap()
    }

    #[test]
    fn test_align_empty_fails() {
        let aligner = ScaleAligner::new(PatchGrid::new(3, 1).unwrap());
        assert!(aligner.align(&[]).is_err());
    }

    #[test]
    fn test_align_batch_mismatch_fails() {
        let aligner = ScaleAligner::new(PatchGrid::new(3, 1).unwrap());
        let a = ramp_tensor(2, 1, 4, 4);
        let b = ramp_tensor(3, 1, 4, 4);
        let result = aligner.align(&[a, b]);
        assert!(result.is_err());
        assert!(result.err().unwrap().to_string().contains("batch size"));
    }

    #[test]
    fn test_align_same_resolution_is_identity() {
        let aligner = ScaleAligner::new(PatchGrid::new(3, 1).unwrap());
        let a = ramp_tensor(1, 2, 6, 6);
        let b = ramp_tensor(1, 3, 6, 6);
        let (sets, shapes) = aligner.align(&[a.clone(), b.clone()]).unwrap();
        assert_eq!(shapes, vec![(6, 6), (6, 6)]);

        let (expected, _) = aligner.grid().patchify(&b).unwrap();
        for (u, v) in sets[1].data().iter().zip(expected.data()) {
            assert!((u - v).abs() < 1e-5);
        }
    }

    #[test]
    fn test_align_upsamples_to_reference_grid() {
        let aligner = ScaleAligner::new(PatchGrid::new(3, 1).unwrap());
        let reference = ramp_tensor(2, 4, 14, 14);
        let coarse = ramp_tensor(2, 8, 7, 7);
        let (sets, shapes) = aligner.align(&[reference, coarse]).unwrap();

        assert_eq!(shapes, vec![(14, 14), (7, 7)]);
        assert_eq!(sets[0].grid_h(), 14);
        assert_eq!(sets[1].grid_h(), 14);
        assert_eq!(sets[1].grid_w(), 14);
        assert_eq!(sets[1].channels(), 8);
        assert_eq!(sets[1].cells(), 196);
    }

    #[test]
    fn test_regrid_constant_plane() {
        let grid = PatchGrid::new(1, 1).unwrap();
        let t = FeatureTensor::new(vec![2.5; 9], 1, 1, 3, 3).unwrap();
        let (patches, _) = grid.patchify(&t).unwrap();
        let up = regrid(&patches, 6, 6);
        assert_eq!(up.cells(), 36);
        for &v in up.data() {
            assert!((v - 2.5).abs() < 1e-5);
        }
    }
}
