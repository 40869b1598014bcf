//! Trainable layer implementations used by the discriminator and the
//! pre-projection stacks.

pub mod batchnorm;
pub mod dense;

pub use batchnorm::BatchNormLayer;
pub use dense::DenseLayer;
