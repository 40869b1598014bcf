//! Dense feature tensor type exchanged with the backbone collaborator.
//!
//! Backbones return either 4D (batch, channels, height, width) maps or 3D
//! (batch, tokens, channels) token sequences; the latter are reshaped to a
//! square spatial map on construction. Data is stored as a flat row-major
//! `Vec<f32>` buffer.

use std::error::Error;
use std::io;

/// A 4-dimensional feature tensor (batch, channels, height, width).
///
/// Produced by the backbone per batch and consumed by the alignment pipeline;
/// immutable once built.
///
/// # Example
///
/// ```
/// use patchnet::tensor::FeatureTensor;
///
/// let t = FeatureTensor::zeros(2, 3, 4, 4);
/// assert_eq!(t.batch(), 2);
/// assert_eq!(t.channels(), 3);
/// assert_eq!(t.data().len(), 2 * 3 * 4 * 4);
/// ```
#[derive(Debug, Clone)]
pub struct FeatureTensor {
    data: Vec<f32>,
    batch: usize,
    channels: usize,
    height: usize,
    width: usize,
}

impl FeatureTensor {
    /// Create a tensor from a flat row-major buffer.
    ///
    /// # Errors
    ///
    /// Returns a dimension mismatch error when the buffer length does not
    /// equal `batch * channels * height * width`.
    pub fn new(
        data: Vec<f32>,
        batch: usize,
        channels: usize,
        height: usize,
        width: usize,
    ) -> Result<Self, Box<dyn Error>> {
        let expected = batch * channels * height * width;
        if data.len() != expected {
            return Err(Box::new(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "feature tensor buffer mismatch: expected {} values for ({}, {}, {}, {}), got {}",
                    expected,
                    batch,
                    channels,
                    height,
                    width,
                    data.len()
                ),
            )));
        }
        Ok(Self {
            data,
            batch,
            channels,
            height,
            width,
        })
    }

    /// Create a zero-filled tensor.
    pub fn zeros(batch: usize, channels: usize, height: usize, width: usize) -> Self {
        Self {
            data: vec![0.0f32; batch * channels * height * width],
            batch,
            channels,
            height,
            width,
        }
    }

    /// Create a 4D tensor from a (batch, tokens, channels) token sequence.
    ///
    /// Tokens must form a perfect square; the sequence is laid out on a
    /// height = width = sqrt(tokens) grid in row-major token order.
    ///
    /// # Errors
    ///
    /// Returns an error when the buffer length is wrong or `tokens` is not a
    /// perfect square.
    pub fn from_tokens(
        data: Vec<f32>,
        batch: usize,
        tokens: usize,
        channels: usize,
    ) -> Result<Self, Box<dyn Error>> {
        let expected = batch * tokens * channels;
        if data.len() != expected {
            return Err(Box::new(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "token tensor buffer mismatch: expected {} values for ({}, {}, {}), got {}",
                    expected,
                    batch,
                    tokens,
                    channels,
                    data.len()
                ),
            )));
        }
        let side = (tokens as f64).sqrt().round() as usize;
        if side * side != tokens {
            return Err(Box::new(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("token count {} is not a perfect square", tokens),
            )));
        }

        // (B, L, C) -> (B, C, side, side)
        let mut out = vec![0.0f32; expected];
        for b in 0..batch {
            for t in 0..tokens {
                for c in 0..channels {
                    let src = (b * tokens + t) * channels + c;
                    let dst = ((b * channels + c) * side + t / side) * side + t % side;
                    out[dst] = data[src];
                }
            }
        }
        Ok(Self {
            data: out,
            batch,
            channels,
            height: side,
            width: side,
        })
    }

    /// Number of images in the batch.
    pub fn batch(&self) -> usize {
        self.batch
    }

    /// Number of channels.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Spatial height.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Spatial width.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Flat row-major buffer.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Value at (batch, channel, y, x).
    pub fn at(&self, b: usize, c: usize, y: usize, x: usize) -> f32 {
        self.data[((b * self.channels + c) * self.height + y) * self.width + x]
    }
}
