//! Feature embedding pipeline: multi-scale patch alignment, channel
//! projection, and scale aggregation.

pub mod aligner;
pub mod pooling;

pub use aligner::ScaleAligner;
pub use pooling::{adaptive_avg_pool1d, ChannelProjector, PatchEmbeddings, ScaleAggregator};
