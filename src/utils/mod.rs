//! Shared utilities: random number generation, activation kernels,
//! learning rate scheduling, GEMM, and plane resampling.

pub mod activations;
pub mod gemm;
pub mod interp;
pub mod lr_scheduler;
pub mod rng;

pub use activations::{leaky_relu_backward, leaky_relu_inplace};
pub use gemm::{add_bias, sgemm_wrapper};
pub use interp::resample_bilinear;
pub use lr_scheduler::{CosineAnnealing, LRScheduler};
pub use rng::SimpleRng;
