//! Channel projection and scale aggregation.
//!
//! Different backbone layers emit different channel counts. The projector
//! pools every layer's per-patch features to one common width and stacks the
//! layers; the aggregator then pools the stack down to the final embedding
//! dimension. Both stages are parameter-free and deterministic.

use std::error::Error;
use std::io;

use crate::patches::PatchSet;

/// Final per-patch embeddings, `(rows, dim)` row-major.
#[derive(Debug, Clone)]
pub struct PatchEmbeddings {
    pub data: Vec<f32>,
    pub rows: usize,
    pub dim: usize,
}

impl PatchEmbeddings {
    pub fn new(data: Vec<f32>, rows: usize, dim: usize) -> Self {
        assert_eq!(data.len(), rows * dim, "embedding buffer size mismatch");
        Self { data, rows, dim }
    }

    /// One embedding row.
    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }
}

/// 1D adaptive average pooling from `src` onto `dst`.
///
/// Output bucket `i` averages `src[floor(i*L/out) .. ceil((i+1)*L/out)]`, so
/// every input value lands in at least one bucket and pooling to the same
/// length is the identity.
pub fn adaptive_avg_pool1d(src: &[f32], dst: &mut [f32]) {
    let len = src.len();
    let out = dst.len();
    assert!(len > 0 && out > 0, "adaptive pooling over empty buffers");

    for (i, slot) in dst.iter_mut().enumerate() {
        let start = i * len / out;
        let end = ((i + 1) * len + out - 1) / out;
        let sum: f32 = src[start..end].iter().sum();
        *slot = sum / (end - start) as f32;
    }
}

/// Pools each layer's per-patch channels to a common width and stacks the
/// layers along a new axis.
///
/// Input: aligned patch sets, one per layer, sharing batch and grid.
/// Output: `(batch * cells, num_layers, output_dim)` flattened row-major.
pub struct ChannelProjector {
    output_dim: usize,
}

impl ChannelProjector {
    pub fn new(output_dim: usize) -> Result<Self, Box<dyn Error>> {
        if output_dim == 0 {
            return Err(Box::new(io::Error::new(
                io::ErrorKind::InvalidData,
                "projector output dimension must be greater than 0",
            )));
        }
        Ok(Self { output_dim })
    }

    pub fn output_dim(&self) -> usize {
        self.output_dim
    }

    /// Project and stack aligned layers.
    ///
    /// # Errors
    ///
    /// Fails when the layers disagree on patch count (they must already be
    /// aligned to one grid).
    pub fn project(&self, layers: &[PatchSet]) -> Result<Vec<f32>, Box<dyn Error>> {
        if layers.is_empty() {
            return Err(Box::new(io::Error::new(
                io::ErrorKind::InvalidData,
                "projection requires at least one layer",
            )));
        }
        let rows = layers[0].batch() * layers[0].cells();
        for (i, layer) in layers.iter().enumerate() {
            if layer.batch() * layer.cells() != rows {
                return Err(Box::new(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "layer {} holds {} patches but the reference layer holds {}",
                        i,
                        layer.batch() * layer.cells(),
                        rows
                    ),
                )));
            }
        }

        let num_layers = layers.len();
        let mut out = vec![0.0f32; rows * num_layers * self.output_dim];
        for (li, layer) in layers.iter().enumerate() {
            let feat_len = layer.channels() * layer.patch_size() * layer.patch_size();
            for r in 0..rows {
                let src = &layer.data()[r * feat_len..(r + 1) * feat_len];
                let dst_start = (r * num_layers + li) * self.output_dim;
                adaptive_avg_pool1d(src, &mut out[dst_start..dst_start + self.output_dim]);
            }
        }
        Ok(out)
    }
}

/// Pools the stacked per-layer features down to the final embedding width.
pub struct ScaleAggregator {
    target_dim: usize,
}

impl ScaleAggregator {
    pub fn new(target_dim: usize) -> Result<Self, Box<dyn Error>> {
        if target_dim == 0 {
            return Err(Box::new(io::Error::new(
                io::ErrorKind::InvalidData,
                "aggregator target dimension must be greater than 0",
            )));
        }
        Ok(Self { target_dim })
    }

    pub fn target_dim(&self) -> usize {
        self.target_dim
    }

    /// Flatten `(num_layers, layer_dim)` per patch and pool to `target_dim`.
    ///
    /// # Errors
    ///
    /// Fails when the stacked buffer does not match the stated geometry.
    pub fn aggregate(
        &self,
        stacked: &[f32],
        rows: usize,
        num_layers: usize,
        layer_dim: usize,
    ) -> Result<PatchEmbeddings, Box<dyn Error>> {
        let flat = num_layers * layer_dim;
        if stacked.len() != rows * flat {
            return Err(Box::new(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "stacked buffer mismatch: expected {} values for {} rows of {}x{}, got {}",
                    rows * flat,
                    rows,
                    num_layers,
                    layer_dim,
                    stacked.len()
                ),
            )));
        }

        let mut out = vec![0.0f32; rows * self.target_dim];
        for r in 0..rows {
            let src = &stacked[r * flat..(r + 1) * flat];
            let dst = &mut out[r * self.target_dim..(r + 1) * self.target_dim];
            adaptive_avg_pool1d(src, dst);
        }
        Ok(PatchEmbeddings::new(out, rows, self.target_dim))
    }
}
