//! Patch extraction and score-grid handling.
//!
//! A feature map is sliced into overlapping square patches on a regular grid;
//! per-patch scores later flow back through the same grid to become per-image
//! scalars and spatial score maps.

use std::error::Error;
use std::io;

use crate::tensor::FeatureTensor;

/// Patch extraction geometry: window edge length and sampling stride.
///
/// Padding is fixed at `(patch_size - 1) / 2` zeros on each spatial border,
/// which requires an odd `patch_size`; even values are rejected on
/// construction rather than silently truncated.
#[derive(Debug, Clone, Copy)]
pub struct PatchGrid {
    patch_size: usize,
    stride: usize,
}

/// Overlapping patches extracted from one feature tensor.
///
/// Layout is `(batch, grid_h * grid_w, channels, patch, patch)` flattened
/// row-major, so dropping the grid split yields the
/// `(batch * cells, channels, patch, patch)` view downstream stages consume.
#[derive(Debug, Clone)]
pub struct PatchSet {
    pub(crate) data: Vec<f32>,
    batch: usize,
    grid_h: usize,
    grid_w: usize,
    channels: usize,
    patch_size: usize,
}

impl PatchSet {
    pub(crate) fn from_raw(
        data: Vec<f32>,
        batch: usize,
        grid_h: usize,
        grid_w: usize,
        channels: usize,
        patch_size: usize,
    ) -> Self {
        debug_assert_eq!(data.len(), batch * grid_h * grid_w * channels * patch_size * patch_size);
        Self {
            data,
            batch,
            grid_h,
            grid_w,
            channels,
            patch_size,
        }
    }

    pub fn batch(&self) -> usize {
        self.batch
    }

    pub fn grid_h(&self) -> usize {
        self.grid_h
    }

    pub fn grid_w(&self) -> usize {
        self.grid_w
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn patch_size(&self) -> usize {
        self.patch_size
    }

    /// Total patches per image.
    pub fn cells(&self) -> usize {
        self.grid_h * self.grid_w
    }

    /// Flat buffer, `(batch * cells, channels, patch, patch)` row-major.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Value at (batch, cell, channel, py, px).
    pub fn at(&self, b: usize, cell: usize, c: usize, py: usize, px: usize) -> f32 {
        let p = self.patch_size;
        self.data[(((b * self.cells() + cell) * self.channels + c) * p + py) * p + px]
    }
}

/// Per-patch scores reshaped back to per-image rows.
///
/// Holds `(batch, cells, inner)` values; `inner > 1` carries any trailing
/// score dimensions that have not been reduced yet. Reinterpretation only,
/// values are never altered.
#[derive(Debug, Clone)]
pub struct ScoreGrid {
    pub(crate) data: Vec<f32>,
    batch: usize,
    cells: usize,
    inner: usize,
}

impl ScoreGrid {
    pub fn batch(&self) -> usize {
        self.batch
    }

    pub fn cells(&self) -> usize {
        self.cells
    }

    pub fn inner(&self) -> usize {
        self.inner
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }
}

impl PatchGrid {
    /// Create a patch grid spec.
    ///
    /// # Errors
    ///
    /// Rejects even or zero `patch_size` and zero `stride`.
    pub fn new(patch_size: usize, stride: usize) -> Result<Self, Box<dyn Error>> {
        if patch_size == 0 || patch_size % 2 == 0 {
            return Err(Box::new(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("patch_size must be odd and positive, got {}", patch_size),
            )));
        }
        if stride == 0 {
            return Err(Box::new(io::Error::new(
                io::ErrorKind::InvalidData,
                "stride must be greater than 0",
            )));
        }
        Ok(Self { patch_size, stride })
    }

    pub fn patch_size(&self) -> usize {
        self.patch_size
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Zero padding applied to each spatial border.
    pub fn padding(&self) -> usize {
        (self.patch_size - 1) / 2
    }

    /// Number of patch positions along one spatial axis of length `dim`.
    pub fn cells_along(&self, dim: usize) -> usize {
        (dim + 2 * self.padding() - (self.patch_size - 1) - 1) / self.stride + 1
    }

    /// Grid dimensions (height cells, width cells) for a feature map.
    pub fn grid_dims(&self, height: usize, width: usize) -> (usize, usize) {
        (self.cells_along(height), self.cells_along(width))
    }

    /// Slice a feature tensor into overlapping zero-padded patches.
    ///
    /// Returns one patch per grid cell, each `(channels, patch, patch)`, and
    /// the grid dimensions.
    ///
    /// # Errors
    ///
    /// Fails when a spatial dimension is zero.
    pub fn patchify(
        &self,
        tensor: &FeatureTensor,
    ) -> Result<(PatchSet, (usize, usize)), Box<dyn Error>> {
        if tensor.height() == 0 || tensor.width() == 0 {
            return Err(Box::new(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "cannot patchify empty spatial dimensions ({}, {})",
                    tensor.height(),
                    tensor.width()
                ),
            )));
        }

        let (batch, channels) = (tensor.batch(), tensor.channels());
        let (height, width) = (tensor.height(), tensor.width());
        let (grid_h, grid_w) = self.grid_dims(height, width);
        let pad = self.padding() as isize;
        let p = self.patch_size;

        let mut data = vec![0.0f32; batch * grid_h * grid_w * channels * p * p];
        let mut dst = 0usize;
        for b in 0..batch {
            for gy in 0..grid_h {
                for gx in 0..grid_w {
                    for c in 0..channels {
                        for py in 0..p {
                            let sy = (gy * self.stride + py) as isize - pad;
                            for px in 0..p {
                                let sx = (gx * self.stride + px) as isize - pad;
                                if sy >= 0
                                    && sy < height as isize
                                    && sx >= 0
                                    && sx < width as isize
                                {
                                    data[dst] = tensor.at(b, c, sy as usize, sx as usize);
                                }
                                dst += 1;
                            }
                        }
                    }
                }
            }
        }

        Ok((
            PatchSet {
                data,
                batch,
                grid_h,
                grid_w,
                channels,
                patch_size: p,
            },
            (grid_h, grid_w),
        ))
    }

    /// Reinterpret a flat per-patch score buffer as per-image rows.
    ///
    /// `inner` carries trailing score dimensions (1 for plain scalars). The
    /// buffer is moved, never rewritten.
    ///
    /// # Errors
    ///
    /// Fails when the buffer does not divide evenly into
    /// `batch_size * inner` groups.
    pub fn unpatch_scores(
        scores: Vec<f32>,
        batch_size: usize,
        inner: usize,
    ) -> Result<ScoreGrid, Box<dyn Error>> {
        if batch_size == 0 || inner == 0 || scores.len() % (batch_size * inner) != 0 {
            return Err(Box::new(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "score buffer of {} values does not split into batch {} with inner {}",
                    scores.len(),
                    batch_size,
                    inner
                ),
            )));
        }
        let cells = scores.len() / (batch_size * inner);
        Ok(ScoreGrid {
            data: scores,
            batch: batch_size,
            cells,
            inner,
        })
    }

    /// Collapse a score grid to one scalar per image.
    ///
    /// Any trailing `inner` dimension is max-reduced first. Over the cell
    /// axis, `top_k <= 1` takes the maximum; `top_k > 1` takes the mean of
    /// the `top_k` largest values. Anomalies are local, so max (not mean) is
    /// the default ranking rule.
    pub fn reduce_to_scalar(grid: &ScoreGrid, top_k: usize) -> Vec<f32> {
        let mut result = Vec::with_capacity(grid.batch);
        for b in 0..grid.batch {
            // max over the trailing axis first
            let mut cell_scores = Vec::with_capacity(grid.cells);
            for cell in 0..grid.cells {
                let start = (b * grid.cells + cell) * grid.inner;
                let m = grid.data[start..start + grid.inner]
                    .iter()
                    .cloned()
                    .fold(f32::NEG_INFINITY, f32::max);
                cell_scores.push(m);
            }
            if top_k > 1 {
                let k = top_k.min(cell_scores.len());
                cell_scores.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
                let sum: f32 = cell_scores[..k].iter().sum();
                result.push(sum / k as f32);
            } else {
                let m = cell_scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
                result.push(m);
            }
        }
        result
    }
}
