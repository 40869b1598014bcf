//! Optimizer abstractions for parameter updates.
//!
//! Optimizers define how gradients update model parameters. The discriminator
//! and the optional pre-projection are trained with Adam; each parameter
//! tensor gets its own optimizer instance so moment estimates never mix
//! between tensors.

pub mod adam;

pub use adam::Adam;

/// Core trait for optimizers.
///
/// All optimizer types implement this trait to provide a uniform interface
/// for parameter updates during training.
pub trait Optimizer {
    /// Update parameters in-place using gradients.
    ///
    /// # Arguments
    ///
    /// * `parameters` - Mutable slice of parameters to update
    /// * `gradients` - Gradient of loss with respect to each parameter
    ///
    /// # Panics
    ///
    /// Implementations may panic if parameters and gradients have different
    /// lengths.
    fn update(&mut self, parameters: &mut [f32], gradients: &[f32]);

    /// Reset optimizer state (moments, counters).
    fn reset(&mut self);

    /// Get the base learning rate.
    fn learning_rate(&self) -> f32;

    /// Set the base learning rate (for schedulers).
    fn set_learning_rate(&mut self, lr: f32);
}
