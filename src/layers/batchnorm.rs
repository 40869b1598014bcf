//! Batch normalization layer implementation.
//!
//! Normalizes activations per feature across the batch, then applies
//! learnable scale (gamma) and shift (beta). During training the layer uses
//! batch statistics and maintains running statistics via exponential moving
//! average; during inference it uses the running statistics. The
//! discriminator scores real and synthetic embeddings in one concatenated
//! pass precisely so that both populations share these batch statistics.
//!
//! # Reference
//!
//! Ioffe, S., & Szegedy, C. (2015). Batch Normalization: Accelerating Deep
//! Network Training by Reducing Internal Covariate Shift. ICML.

use std::cell::RefCell;

use crate::optimizers::Optimizer;

/// Batch normalization with learnable scale and shift parameters.
///
/// # Example
///
/// ```
/// use patchnet::layers::BatchNormLayer;
///
/// let layer = BatchNormLayer::new(512, 1e-5, 0.9);
/// assert_eq!(layer.size(), 512);
/// assert_eq!(layer.parameter_count(), 1024);  // 512 gamma + 512 beta
/// assert!(layer.is_training());
/// ```
pub struct BatchNormLayer {
    size: usize,
    epsilon: f32,
    momentum: f32,
    training: bool,

    // Learnable parameters
    gamma: Vec<f32>,
    beta: Vec<f32>,

    // Gradient accumulators (interior mutability: backward takes &self)
    grad_gamma: RefCell<Vec<f32>>,
    grad_beta: RefCell<Vec<f32>>,

    // Running statistics (updated during training, used during inference)
    running_mean: RefCell<Vec<f32>>,
    running_var: RefCell<Vec<f32>>,

    // Cached values from forward pass (needed for backward pass)
    cached_normalized: RefCell<Vec<f32>>,
    cached_std: RefCell<Vec<f32>>,
}

impl BatchNormLayer {
    /// Creates a new batch normalization layer.
    ///
    /// Gamma starts at 1.0, beta at 0.0, running statistics at zero; the
    /// layer starts in training mode.
    ///
    /// # Panics
    ///
    /// Panics when `epsilon` is not positive or `momentum` is outside
    /// [0.0, 1.0].
    pub fn new(size: usize, epsilon: f32, momentum: f32) -> Self {
        assert!(epsilon > 0.0, "epsilon must be positive");
        assert!(
            (0.0..=1.0).contains(&momentum),
            "momentum must be in range [0.0, 1.0]"
        );

        Self {
            size,
            epsilon,
            momentum,
            training: true,
            gamma: vec![1.0f32; size],
            beta: vec![0.0f32; size],
            grad_gamma: RefCell::new(vec![0.0f32; size]),
            grad_beta: RefCell::new(vec![0.0f32; size]),
            running_mean: RefCell::new(vec![0.0f32; size]),
            running_var: RefCell::new(vec![0.0f32; size]),
            cached_normalized: RefCell::new(Vec::new()),
            cached_std: RefCell::new(Vec::new()),
        }
    }

    /// Switch between training mode (batch statistics) and inference mode
    /// (running statistics).
    pub fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Trainable parameter count (gamma + beta).
    pub fn parameter_count(&self) -> usize {
        2 * self.size
    }

    pub fn gamma(&self) -> &[f32] {
        &self.gamma
    }

    pub fn beta(&self) -> &[f32] {
        &self.beta
    }

    pub fn running_mean(&self) -> Vec<f32> {
        self.running_mean.borrow().clone()
    }

    pub fn running_var(&self) -> Vec<f32> {
        self.running_var.borrow().clone()
    }

    /// Restore parameters and running statistics (checkpoint restore).
    ///
    /// # Panics
    ///
    /// Panics on any length mismatch.
    pub fn set_state(
        &mut self,
        gamma: &[f32],
        beta: &[f32],
        running_mean: &[f32],
        running_var: &[f32],
    ) {
        assert_eq!(gamma.len(), self.size, "gamma buffer mismatch");
        assert_eq!(beta.len(), self.size, "beta buffer mismatch");
        assert_eq!(running_mean.len(), self.size, "running_mean buffer mismatch");
        assert_eq!(running_var.len(), self.size, "running_var buffer mismatch");
        self.gamma.copy_from_slice(gamma);
        self.beta.copy_from_slice(beta);
        self.running_mean.borrow_mut().copy_from_slice(running_mean);
        self.running_var.borrow_mut().copy_from_slice(running_var);
    }

    /// Forward pass.
    ///
    /// # Panics
    ///
    /// Panics if a buffer does not match `batch_size * size`.
    pub fn forward(&self, input: &[f32], output: &mut [f32], batch_size: usize) {
        let total_size = batch_size * self.size;
        assert_eq!(
            input.len(),
            total_size,
            "input len mismatch: expected {}, got {}",
            total_size,
            input.len()
        );
        assert_eq!(
            output.len(),
            total_size,
            "output len mismatch: expected {}, got {}",
            total_size,
            output.len()
        );

        if self.training {
            let mut batch_mean = vec![0.0f32; self.size];
            let mut batch_var = vec![0.0f32; self.size];

            for i in 0..batch_size {
                for j in 0..self.size {
                    batch_mean[j] += input[i * self.size + j];
                }
            }
            for mean in &mut batch_mean {
                *mean /= batch_size as f32;
            }

            for i in 0..batch_size {
                for j in 0..self.size {
                    let diff = input[i * self.size + j] - batch_mean[j];
                    batch_var[j] += diff * diff;
                }
            }
            for var in &mut batch_var {
                *var /= batch_size as f32;
            }

            let std: Vec<f32> = batch_var
                .iter()
                .map(|&v| (v + self.epsilon).sqrt())
                .collect();

            let mut normalized = vec![0.0f32; total_size];
            for i in 0..batch_size {
                for j in 0..self.size {
                    let idx = i * self.size + j;
                    normalized[idx] = (input[idx] - batch_mean[j]) / std[j];
                    output[idx] = self.gamma[j] * normalized[idx] + self.beta[j];
                }
            }

            // running = momentum * running + (1 - momentum) * batch
            let mut running_mean = self.running_mean.borrow_mut();
            let mut running_var = self.running_var.borrow_mut();
            for j in 0..self.size {
                running_mean[j] =
                    self.momentum * running_mean[j] + (1.0 - self.momentum) * batch_mean[j];
                running_var[j] =
                    self.momentum * running_var[j] + (1.0 - self.momentum) * batch_var[j];
            }

            *self.cached_normalized.borrow_mut() = normalized;
            *self.cached_std.borrow_mut() = std;
        } else {
            let running_mean = self.running_mean.borrow();
            let running_var = self.running_var.borrow();
            for i in 0..batch_size {
                for j in 0..self.size {
                    let idx = i * self.size + j;
                    let normalized =
                        (input[idx] - running_mean[j]) / (running_var[j] + self.epsilon).sqrt();
                    output[idx] = self.gamma[j] * normalized + self.beta[j];
                }
            }
        }
    }

    /// Backward pass using cached values from the forward pass.
    ///
    /// Writes the gradient with respect to the input and accumulates gamma
    /// and beta gradients internally.
    pub fn backward(
        &self,
        grad_output: &[f32],
        grad_input: &mut [f32],
        batch_size: usize,
    ) {
        let total_size = batch_size * self.size;
        assert_eq!(
            grad_output.len(),
            total_size,
            "grad_output len mismatch: expected {}, got {}",
            total_size,
            grad_output.len()
        );
        assert_eq!(
            grad_input.len(),
            total_size,
            "grad_input len mismatch: expected {}, got {}",
            total_size,
            grad_input.len()
        );

        if !self.training {
            // Inference mode: gradient pass-through with gamma scaling
            let running_var = self.running_var.borrow();
            for i in 0..batch_size {
                for j in 0..self.size {
                    let idx = i * self.size + j;
                    grad_input[idx] =
                        grad_output[idx] * self.gamma[j] / (running_var[j] + self.epsilon).sqrt();
                }
            }
            return;
        }

        let normalized = self.cached_normalized.borrow();
        let std = self.cached_std.borrow();
        assert_eq!(
            normalized.len(),
            total_size,
            "backward without a matching forward pass"
        );

        let mut grad_gamma = self.grad_gamma.borrow_mut();
        let mut grad_beta = self.grad_beta.borrow_mut();

        for i in 0..batch_size {
            for j in 0..self.size {
                let idx = i * self.size + j;
                grad_gamma[j] += grad_output[idx] * normalized[idx];
                grad_beta[j] += grad_output[idx];
            }
        }

        // Per-feature sums over the batch drive the mean/variance terms.
        let mut sum_grad = vec![0.0f32; self.size];
        let mut sum_grad_norm = vec![0.0f32; self.size];
        for i in 0..batch_size {
            for j in 0..self.size {
                let idx = i * self.size + j;
                let g = grad_output[idx] * self.gamma[j];
                sum_grad[j] += g;
                sum_grad_norm[j] += g * normalized[idx];
            }
        }

        let n = batch_size as f32;
        for i in 0..batch_size {
            for j in 0..self.size {
                let idx = i * self.size + j;
                let g = grad_output[idx] * self.gamma[j];
                grad_input[idx] =
                    (g - sum_grad[j] / n - normalized[idx] * sum_grad_norm[j] / n) / std[j];
            }
        }
    }

    /// Apply accumulated gradients and clear them.
    pub fn update(&mut self, gamma_opt: &mut dyn Optimizer, beta_opt: &mut dyn Optimizer) {
        {
            let grad_gamma = self.grad_gamma.borrow();
            gamma_opt.update(&mut self.gamma, &grad_gamma);
        }
        {
            let grad_beta = self.grad_beta.borrow();
            beta_opt.update(&mut self.beta, &grad_beta);
        }
        self.grad_gamma
            .borrow_mut()
            .iter_mut()
            .for_each(|g| *g = 0.0);
        self.grad_beta
            .borrow_mut()
            .iter_mut()
            .for_each(|g| *g = 0.0);
    }
}
