//! Adam (Adaptive Moment Estimation) optimizer implementation.

use crate::optimizers::Optimizer;

/// Adam optimizer with optional L2 weight decay.
///
/// Maintains first and second moment estimates per parameter with bias
/// correction:
///
/// ```text
/// g_t = gradient + weight_decay * parameter
/// m_t = β1 * m_{t-1} + (1 - β1) * g_t
/// v_t = β2 * v_{t-1} + (1 - β2) * g_t²
/// parameter -= α * (m_t / (1 - β1^t)) / (√(v_t / (1 - β2^t)) + ε)
/// ```
///
/// One instance owns the moments for exactly one parameter tensor.
///
/// # Example
///
/// ```
/// use patchnet::optimizers::{Adam, Optimizer};
///
/// let mut optimizer = Adam::new(0.001, 0.9, 0.999, 1e-8);
/// let mut params = vec![1.0, 2.0, 3.0];
/// let grads = vec![0.1, 0.2, 0.3];
/// optimizer.update(&mut params, &grads);
/// assert!(params[0] < 1.0);
/// ```
///
/// # Reference
///
/// Kingma, D. P., & Ba, J. (2014). Adam: A method for stochastic
/// optimization. arXiv preprint arXiv:1412.6980.
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    weight_decay: f32,
    /// First moment estimates (momentum)
    m: Vec<f32>,
    /// Second moment estimates (adaptive learning rate)
    v: Vec<f32>,
    /// Time step counter for bias correction
    t: usize,
}

impl Adam {
    /// Creates a new Adam optimizer without weight decay.
    ///
    /// The paper's defaults work well: lr 0.001, beta1 0.9, beta2 0.999,
    /// epsilon 1e-8.
    pub fn new(learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self::with_weight_decay(learning_rate, beta1, beta2, epsilon, 0.0)
    }

    /// Creates a new Adam optimizer with L2 weight decay added to gradients.
    pub fn with_weight_decay(
        learning_rate: f32,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
        weight_decay: f32,
    ) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            weight_decay,
            m: Vec::new(),
            v: Vec::new(),
            t: 0,
        }
    }

    pub fn weight_decay(&self) -> f32 {
        self.weight_decay
    }
}

impl Optimizer for Adam {
    fn update(&mut self, parameters: &mut [f32], gradients: &[f32]) {
        assert_eq!(
            parameters.len(),
            gradients.len(),
            "Parameters and gradients must have the same length"
        );

        // Initialize moment vectors on first use
        if self.m.is_empty() {
            self.m = vec![0.0; parameters.len()];
            self.v = vec![0.0; parameters.len()];
        }
        assert_eq!(
            self.m.len(),
            parameters.len(),
            "optimizer bound to a tensor of different size"
        );

        self.t += 1;
        let bias_correction1 = 1.0 - self.beta1.powi(self.t as i32);
        let bias_correction2 = 1.0 - self.beta2.powi(self.t as i32);

        for i in 0..parameters.len() {
            let g = gradients[i] + self.weight_decay * parameters[i];

            self.m[i] = self.beta1 * self.m[i] + (1.0 - self.beta1) * g;
            self.v[i] = self.beta2 * self.v[i] + (1.0 - self.beta2) * g * g;

            let m_hat = self.m[i] / bias_correction1;
            let v_hat = self.v[i] / bias_correction2;

            parameters[i] -= self.learning_rate * m_hat / (v_hat.sqrt() + self.epsilon);
        }
    }

    fn reset(&mut self) {
        self.m.clear();
        self.v.clear();
        self.t = 0;
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f32) {
        self.learning_rate = lr;
    }
}
