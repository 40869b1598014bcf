//! Activation functions shared by the discriminator and projection stacks.

/// Leaky ReLU applied in-place: negative values are scaled by `slope`.
pub fn leaky_relu_inplace(data: &mut [f32], slope: f32) {
    for value in data.iter_mut() {
        if *value < 0.0 {
            *value *= slope;
        }
    }
}

/// Backward pass of leaky ReLU.
///
/// Scales each gradient entry by 1 where the pre-activation was positive and
/// by `slope` where it was negative.
///
/// # Arguments
/// * `pre_activation` - Values seen by the forward pass before the activation
/// * `grad` - Gradient buffer updated in-place
pub fn leaky_relu_backward(pre_activation: &[f32], grad: &mut [f32], slope: f32) {
    assert_eq!(
        pre_activation.len(),
        grad.len(),
        "length mismatch in leaky_relu_backward"
    );
    for (g, &x) in grad.iter_mut().zip(pre_activation) {
        if x < 0.0 {
            *g *= slope;
        }
    }
}
