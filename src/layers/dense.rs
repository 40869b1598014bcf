//! Dense (fully connected) layer implementation.
//!
//! Performs `output = input × weights (+ biases)` with GEMM, and accumulates
//! weight/bias gradients on the backward pass.

use std::cell::RefCell;

use crate::optimizers::Optimizer;
use crate::utils::gemm::{add_bias, sgemm_wrapper};
use crate::utils::rng::SimpleRng;

/// Dense layer with weights and optional biases.
///
/// Weights are stored row-major as (input_size × output_size) and initialized
/// with Xavier-normal samples (std = sqrt(2 / (fan_in + fan_out))); biases
/// start at zero. The score head's final layer runs without a bias.
///
/// # Example
///
/// ```
/// use patchnet::layers::DenseLayer;
/// use patchnet::utils::SimpleRng;
///
/// let mut rng = SimpleRng::new(42);
/// let layer = DenseLayer::new(128, 64, true, &mut rng);
/// assert_eq!(layer.input_size(), 128);
/// assert_eq!(layer.output_size(), 64);
/// assert_eq!(layer.parameter_count(), 128 * 64 + 64);
/// ```
pub struct DenseLayer {
    input_size: usize,
    output_size: usize,
    weights: Vec<f32>,
    biases: Option<Vec<f32>>,
    grad_weights: RefCell<Vec<f32>>,
    grad_biases: RefCell<Vec<f32>>,
}

impl DenseLayer {
    /// Create a new DenseLayer with Xavier-normal initialization.
    pub fn new(input_size: usize, output_size: usize, use_bias: bool, rng: &mut SimpleRng) -> Self {
        let std = (2.0f32 / (input_size + output_size) as f32).sqrt();
        let mut weights = vec![0.0f32; input_size * output_size];
        for value in &mut weights {
            *value = rng.gen_gaussian(0.0, std);
        }

        Self {
            input_size,
            output_size,
            weights,
            biases: use_bias.then(|| vec![0.0f32; output_size]),
            grad_weights: RefCell::new(vec![0.0f32; input_size * output_size]),
            grad_biases: RefCell::new(vec![0.0f32; if use_bias { output_size } else { 0 }]),
        }
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn output_size(&self) -> usize {
        self.output_size
    }

    /// Number of trainable parameters.
    pub fn parameter_count(&self) -> usize {
        self.weights.len() + self.biases.as_ref().map_or(0, Vec::len)
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn biases(&self) -> Option<&[f32]> {
        self.biases.as_deref()
    }

    /// Overwrite the weight matrix (checkpoint restore).
    ///
    /// # Panics
    ///
    /// Panics on a length mismatch.
    pub fn set_weights(&mut self, weights: &[f32]) {
        assert_eq!(
            weights.len(),
            self.weights.len(),
            "weight buffer mismatch: expected {}, got {}",
            self.weights.len(),
            weights.len()
        );
        self.weights.copy_from_slice(weights);
    }

    /// Overwrite the bias vector (checkpoint restore).
    ///
    /// # Panics
    ///
    /// Panics when the layer has no bias or on a length mismatch.
    pub fn set_biases(&mut self, biases: &[f32]) {
        let own = self
            .biases
            .as_mut()
            .expect("layer has no bias to restore");
        assert_eq!(
            biases.len(),
            own.len(),
            "bias buffer mismatch: expected {}, got {}",
            own.len(),
            biases.len()
        );
        own.copy_from_slice(biases);
    }

    /// Forward pass: `output = input × weights (+ biases)`.
    ///
    /// # Panics
    ///
    /// Panics if a buffer does not match `batch_size` and the layer sizes.
    pub fn forward(&self, input: &[f32], output: &mut [f32], batch_size: usize) {
        assert_eq!(
            input.len(),
            batch_size * self.input_size,
            "input len mismatch: expected {}, got {}",
            batch_size * self.input_size,
            input.len()
        );
        assert_eq!(
            output.len(),
            batch_size * self.output_size,
            "output len mismatch: expected {}, got {}",
            batch_size * self.output_size,
            output.len()
        );

        sgemm_wrapper(
            batch_size,
            self.output_size,
            self.input_size,
            input,
            self.input_size,
            &self.weights,
            self.output_size,
            output,
            self.output_size,
            false,
            false,
            1.0,
            0.0,
        );
        if let Some(biases) = &self.biases {
            add_bias(output, batch_size, self.output_size, biases);
        }
    }

    /// Backward pass.
    ///
    /// Writes the gradient with respect to the input and accumulates weight
    /// and bias gradients internally (averaged over the batch at update
    /// time by the caller's loss scaling).
    pub fn backward(
        &self,
        input: &[f32],
        grad_output: &[f32],
        grad_input: &mut [f32],
        batch_size: usize,
    ) {
        assert_eq!(input.len(), batch_size * self.input_size, "input len mismatch");
        assert_eq!(
            grad_output.len(),
            batch_size * self.output_size,
            "grad_output len mismatch"
        );
        assert_eq!(
            grad_input.len(),
            batch_size * self.input_size,
            "grad_input len mismatch"
        );

        // grad_input = grad_output × weightsᵀ
        sgemm_wrapper(
            batch_size,
            self.input_size,
            self.output_size,
            grad_output,
            self.output_size,
            &self.weights,
            self.output_size,
            grad_input,
            self.input_size,
            false,
            true,
            1.0,
            0.0,
        );

        // grad_weights += inputᵀ × grad_output
        let mut grad_weights = self.grad_weights.borrow_mut();
        sgemm_wrapper(
            self.input_size,
            self.output_size,
            batch_size,
            input,
            self.input_size,
            grad_output,
            self.output_size,
            &mut grad_weights,
            self.output_size,
            true,
            false,
            1.0,
            1.0,
        );

        if self.biases.is_some() {
            let mut grad_biases = self.grad_biases.borrow_mut();
            for row in grad_output.chunks_exact(self.output_size).take(batch_size) {
                for (g, &v) in grad_biases.iter_mut().zip(row) {
                    *g += v;
                }
            }
        }
    }

    /// Apply accumulated gradients and clear them.
    ///
    /// Each parameter tensor takes its own optimizer so moment estimates stay
    /// tensor-local.
    pub fn update(
        &mut self,
        weight_opt: &mut dyn Optimizer,
        bias_opt: Option<&mut dyn Optimizer>,
    ) {
        {
            let grad_weights = self.grad_weights.borrow();
            weight_opt.update(&mut self.weights, &grad_weights);
        }
        self.grad_weights
            .borrow_mut()
            .iter_mut()
            .for_each(|g| *g = 0.0);

        if let (Some(biases), Some(opt)) = (self.biases.as_mut(), bias_opt) {
            {
                let grad_biases = self.grad_biases.borrow();
                opt.update(biases, &grad_biases);
            }
            self.grad_biases
                .borrow_mut()
                .iter_mut()
                .for_each(|g| *g = 0.0);
        }
    }
}
