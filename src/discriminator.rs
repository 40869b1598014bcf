//! Feature-space discriminator and optional pre-projection.
//!
//! The discriminator maps a patch embedding to one real-valued score; higher
//! means the embedding looks like a genuine "normal" feature. It is a stack
//! of hidden blocks (linear → batch normalization → leaky ReLU) followed by a
//! bias-free linear tail. The pre-projection is a full-width linear stack
//! applied to embeddings before scoring when enabled.

use std::cell::RefCell;
use std::error::Error;
use std::io;

use crate::checkpoint::{ParamArray, StateDict};
use crate::layers::{BatchNormLayer, DenseLayer};
use crate::optimizers::{Adam, Optimizer};
use crate::utils::activations::{leaky_relu_backward, leaky_relu_inplace};
use crate::utils::rng::SimpleRng;

const LEAKY_SLOPE: f32 = 0.2;
const BN_EPSILON: f32 = 1e-5;
const BN_MOMENTUM: f32 = 0.9;

struct Block {
    linear: DenseLayer,
    norm: BatchNormLayer,
}

#[derive(Default)]
struct ForwardCache {
    rows: usize,
    /// Input to each block's linear layer.
    block_inputs: Vec<Vec<f32>>,
    /// Normalized outputs before the leaky ReLU (activation mask source).
    pre_activations: Vec<Vec<f32>>,
    /// Input to the tail layer.
    tail_input: Vec<f32>,
}

/// Scalar score head over patch embeddings.
///
/// With `hidden` unspecified, each hidden block shrinks its width by ~1.5×;
/// with `hidden` given, every block uses that width. `n_layers` counts the
/// tail, so `n_layers = 1` is a bare linear scorer.
pub struct Discriminator {
    blocks: Vec<Block>,
    tail: DenseLayer,
    input_size: usize,
    cache: RefCell<ForwardCache>,
}

impl Discriminator {
    /// Build a discriminator head.
    ///
    /// # Errors
    ///
    /// Rejects `n_layers == 0` and a zero input width.
    pub fn new(
        in_planes: usize,
        n_layers: usize,
        hidden: Option<usize>,
        rng: &mut SimpleRng,
    ) -> Result<Self, Box<dyn Error>> {
        if in_planes == 0 {
            return Err(Box::new(io::Error::new(
                io::ErrorKind::InvalidData,
                "discriminator input width must be greater than 0",
            )));
        }
        if n_layers == 0 {
            return Err(Box::new(io::Error::new(
                io::ErrorKind::InvalidData,
                "discriminator needs at least one layer",
            )));
        }
        if let Some(h) = hidden {
            if h == 0 {
                return Err(Box::new(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "discriminator hidden width must be greater than 0",
                )));
            }
        }

        let mut blocks = Vec::with_capacity(n_layers - 1);
        let mut width = in_planes;
        for _ in 0..n_layers - 1 {
            let out_width = match hidden {
                Some(h) => h,
                None => ((width as f32 / 1.5) as usize).max(1),
            };
            blocks.push(Block {
                linear: DenseLayer::new(width, out_width, true, rng),
                norm: BatchNormLayer::new(out_width, BN_EPSILON, BN_MOMENTUM),
            });
            width = out_width;
        }
        let tail = DenseLayer::new(width, 1, false, rng);

        Ok(Self {
            blocks,
            tail,
            input_size: in_planes,
            cache: RefCell::new(ForwardCache::default()),
        })
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    /// Hidden block count (layers excluding the tail).
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Switch batch normalization between batch and running statistics.
    pub fn set_training(&mut self, training: bool) {
        for block in &mut self.blocks {
            block.norm.set_training(training);
        }
    }

    /// Score a batch of embeddings; one value per row.
    ///
    /// # Panics
    ///
    /// Panics when the buffer does not match `rows * input_size`.
    pub fn forward(&self, input: &[f32], rows: usize) -> Vec<f32> {
        assert_eq!(
            input.len(),
            rows * self.input_size,
            "embedding buffer mismatch: expected {}, got {}",
            rows * self.input_size,
            input.len()
        );

        let mut cache = self.cache.borrow_mut();
        cache.rows = rows;
        cache.block_inputs.clear();
        cache.pre_activations.clear();

        let mut x = input.to_vec();
        for block in &self.blocks {
            cache.block_inputs.push(x.clone());
            let mut linear_out = vec![0.0f32; rows * block.linear.output_size()];
            block.linear.forward(&x, &mut linear_out, rows);
            let mut normalized = vec![0.0f32; linear_out.len()];
            block.norm.forward(&linear_out, &mut normalized, rows);
            cache.pre_activations.push(normalized.clone());
            leaky_relu_inplace(&mut normalized, LEAKY_SLOPE);
            x = normalized;
        }
        cache.tail_input = x.clone();

        let mut scores = vec![0.0f32; rows];
        self.tail.forward(&x, &mut scores, rows);
        scores
    }

    /// Backward pass from per-row score gradients.
    ///
    /// Accumulates parameter gradients internally and returns the gradient
    /// with respect to the input embeddings (consumed by the pre-projection
    /// when enabled).
    ///
    /// # Panics
    ///
    /// Panics when no matching forward pass was run.
    pub fn backward(&self, grad_scores: &[f32]) -> Vec<f32> {
        let cache = self.cache.borrow();
        let rows = cache.rows;
        assert_eq!(
            grad_scores.len(),
            rows,
            "score gradient mismatch: expected {}, got {}",
            rows,
            grad_scores.len()
        );

        let mut grad = vec![0.0f32; rows * self.tail.input_size()];
        self.tail
            .backward(&cache.tail_input, grad_scores, &mut grad, rows);

        for (i, block) in self.blocks.iter().enumerate().rev() {
            let pre_activation = &cache.pre_activations[i];
            leaky_relu_backward(pre_activation, &mut grad, LEAKY_SLOPE);

            let mut grad_norm_in = vec![0.0f32; grad.len()];
            block.norm.backward(&grad, &mut grad_norm_in, rows);

            let mut grad_block_in = vec![0.0f32; rows * block.linear.input_size()];
            block
                .linear
                .backward(&cache.block_inputs[i], &grad_norm_in, &mut grad_block_in, rows);
            grad = grad_block_in;
        }
        grad
    }

    /// Number of parameter tensors, for sizing the optimizer bank.
    pub fn num_parameter_tensors(&self) -> usize {
        self.blocks.len() * 4 + 1
    }

    /// Apply accumulated gradients with one optimizer per parameter tensor.
    ///
    /// # Panics
    ///
    /// Panics when the bank size does not match `num_parameter_tensors()`.
    pub fn apply_gradients(&mut self, optimizers: &mut [Adam]) {
        assert_eq!(
            optimizers.len(),
            self.num_parameter_tensors(),
            "optimizer bank mismatch: expected {}, got {}",
            self.num_parameter_tensors(),
            optimizers.len()
        );
        let mut it = optimizers.iter_mut();
        for block in &mut self.blocks {
            let w = it.next().unwrap();
            let b = it.next().unwrap();
            block.linear.update(w, Some(b as &mut dyn Optimizer));
            let gamma = it.next().unwrap();
            let beta = it.next().unwrap();
            block.norm.update(gamma, beta);
        }
        let tail_opt = it.next().unwrap();
        self.tail.update(tail_opt, None);
    }

    /// Export all parameters as a named state dict.
    pub fn state_dict(&self) -> StateDict {
        let mut state = StateDict::new();
        for (i, block) in self.blocks.iter().enumerate() {
            state.insert(
                format!("blocks.{}.linear.weight", i),
                ParamArray::new(
                    vec![block.linear.input_size(), block.linear.output_size()],
                    block.linear.weights().to_vec(),
                ),
            );
            state.insert(
                format!("blocks.{}.linear.bias", i),
                ParamArray::new(
                    vec![block.linear.output_size()],
                    block.linear.biases().unwrap().to_vec(),
                ),
            );
            state.insert(
                format!("blocks.{}.norm.gamma", i),
                ParamArray::new(vec![block.norm.size()], block.norm.gamma().to_vec()),
            );
            state.insert(
                format!("blocks.{}.norm.beta", i),
                ParamArray::new(vec![block.norm.size()], block.norm.beta().to_vec()),
            );
            state.insert(
                format!("blocks.{}.norm.running_mean", i),
                ParamArray::new(vec![block.norm.size()], block.norm.running_mean()),
            );
            state.insert(
                format!("blocks.{}.norm.running_var", i),
                ParamArray::new(vec![block.norm.size()], block.norm.running_var()),
            );
        }
        state.insert(
            "tail.weight".to_string(),
            ParamArray::new(
                vec![self.tail.input_size(), 1],
                self.tail.weights().to_vec(),
            ),
        );
        state
    }

    /// Restore parameters from a state dict.
    ///
    /// # Errors
    ///
    /// Fails on missing keys or size mismatches.
    pub fn load_state_dict(&mut self, state: &StateDict) -> Result<(), Box<dyn Error>> {
        for i in 0..self.blocks.len() {
            let weight = fetch(state, &format!("blocks.{}.linear.weight", i))?;
            let bias = fetch(state, &format!("blocks.{}.linear.bias", i))?;
            let gamma = fetch(state, &format!("blocks.{}.norm.gamma", i))?;
            let beta = fetch(state, &format!("blocks.{}.norm.beta", i))?;
            let mean = fetch(state, &format!("blocks.{}.norm.running_mean", i))?;
            let var = fetch(state, &format!("blocks.{}.norm.running_var", i))?;

            let block = &mut self.blocks[i];
            check_len(&weight.data, block.linear.weights().len(), "linear.weight")?;
            check_len(&bias.data, block.linear.output_size(), "linear.bias")?;
            check_len(&gamma.data, block.norm.size(), "norm.gamma")?;
            check_len(&beta.data, block.norm.size(), "norm.beta")?;
            check_len(&mean.data, block.norm.size(), "norm.running_mean")?;
            check_len(&var.data, block.norm.size(), "norm.running_var")?;
            block.linear.set_weights(&weight.data);
            block.linear.set_biases(&bias.data);
            block
                .norm
                .set_state(&gamma.data, &beta.data, &mean.data, &var.data);
        }
        let tail = fetch(state, "tail.weight")?;
        check_len(&tail.data, self.tail.weights().len(), "tail.weight")?;
        self.tail.set_weights(&tail.data);
        Ok(())
    }
}

/// Learned pre-projection applied to embeddings before scoring.
///
/// `n_layers` full-width linear layers; a leaky ReLU separates them when
/// `layer_type > 1`.
pub struct Projection {
    layers: Vec<DenseLayer>,
    layer_type: usize,
    cache: RefCell<ProjectionCache>,
}

#[derive(Default)]
struct ProjectionCache {
    rows: usize,
    layer_inputs: Vec<Vec<f32>>,
    pre_activations: Vec<Vec<f32>>,
}

impl Projection {
    /// Build a projection stack.
    ///
    /// # Errors
    ///
    /// Rejects a zero layer count or zero widths.
    pub fn new(
        in_planes: usize,
        out_planes: usize,
        n_layers: usize,
        layer_type: usize,
        rng: &mut SimpleRng,
    ) -> Result<Self, Box<dyn Error>> {
        if in_planes == 0 || out_planes == 0 || n_layers == 0 {
            return Err(Box::new(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "invalid projection geometry: in {}, out {}, layers {}",
                    in_planes, out_planes, n_layers
                ),
            )));
        }

        let mut layers = Vec::with_capacity(n_layers);
        let mut width = in_planes;
        for _ in 0..n_layers {
            layers.push(DenseLayer::new(width, out_planes, true, rng));
            width = out_planes;
        }
        Ok(Self {
            layers,
            layer_type,
            cache: RefCell::new(ProjectionCache::default()),
        })
    }

    pub fn input_size(&self) -> usize {
        self.layers[0].input_size()
    }

    pub fn output_size(&self) -> usize {
        self.layers.last().unwrap().output_size()
    }

    fn activated(&self, layer_index: usize) -> bool {
        self.layer_type > 1 && layer_index + 1 < self.layers.len()
    }

    /// Project a batch of embeddings.
    pub fn forward(&self, input: &[f32], rows: usize) -> Vec<f32> {
        assert_eq!(
            input.len(),
            rows * self.input_size(),
            "projection input mismatch: expected {}, got {}",
            rows * self.input_size(),
            input.len()
        );

        let mut cache = self.cache.borrow_mut();
        cache.rows = rows;
        cache.layer_inputs.clear();
        cache.pre_activations.clear();

        let mut x = input.to_vec();
        for (i, layer) in self.layers.iter().enumerate() {
            cache.layer_inputs.push(x.clone());
            let mut out = vec![0.0f32; rows * layer.output_size()];
            layer.forward(&x, &mut out, rows);
            if self.activated(i) {
                cache.pre_activations.push(out.clone());
                leaky_relu_inplace(&mut out, LEAKY_SLOPE);
            } else {
                cache.pre_activations.push(Vec::new());
            }
            x = out;
        }
        x
    }

    /// Backward pass; accumulates parameter gradients and returns the
    /// gradient with respect to the input.
    pub fn backward(&self, grad_output: &[f32]) -> Vec<f32> {
        let cache = self.cache.borrow();
        let rows = cache.rows;
        assert_eq!(
            grad_output.len(),
            rows * self.output_size(),
            "projection gradient mismatch"
        );

        let mut grad = grad_output.to_vec();
        for (i, layer) in self.layers.iter().enumerate().rev() {
            if self.activated(i) {
                leaky_relu_backward(&cache.pre_activations[i], &mut grad, LEAKY_SLOPE);
            }
            let mut grad_in = vec![0.0f32; rows * layer.input_size()];
            layer.backward(&cache.layer_inputs[i], &grad, &mut grad_in, rows);
            grad = grad_in;
        }
        grad
    }

    /// Number of parameter tensors, for sizing the optimizer bank.
    pub fn num_parameter_tensors(&self) -> usize {
        self.layers.len() * 2
    }

    /// Apply accumulated gradients with one optimizer per parameter tensor.
    pub fn apply_gradients(&mut self, optimizers: &mut [Adam]) {
        assert_eq!(
            optimizers.len(),
            self.num_parameter_tensors(),
            "optimizer bank mismatch: expected {}, got {}",
            self.num_parameter_tensors(),
            optimizers.len()
        );
        let mut it = optimizers.iter_mut();
        for layer in &mut self.layers {
            let w = it.next().unwrap();
            let b = it.next().unwrap();
            layer.update(w, Some(b as &mut dyn Optimizer));
        }
    }

    /// Export all parameters as a named state dict.
    pub fn state_dict(&self) -> StateDict {
        let mut state = StateDict::new();
        for (i, layer) in self.layers.iter().enumerate() {
            state.insert(
                format!("layers.{}.weight", i),
                ParamArray::new(
                    vec![layer.input_size(), layer.output_size()],
                    layer.weights().to_vec(),
                ),
            );
            state.insert(
                format!("layers.{}.bias", i),
                ParamArray::new(vec![layer.output_size()], layer.biases().unwrap().to_vec()),
            );
        }
        state
    }

    /// Restore parameters from a state dict.
    pub fn load_state_dict(&mut self, state: &StateDict) -> Result<(), Box<dyn Error>> {
        for i in 0..self.layers.len() {
            let weight = fetch(state, &format!("layers.{}.weight", i))?;
            let bias = fetch(state, &format!("layers.{}.bias", i))?;
            let layer = &mut self.layers[i];
            check_len(&weight.data, layer.weights().len(), "projection weight")?;
            check_len(&bias.data, layer.output_size(), "projection bias")?;
            layer.set_weights(&weight.data);
            layer.set_biases(&bias.data);
        }
        Ok(())
    }
}

fn fetch<'a>(state: &'a StateDict, key: &str) -> Result<&'a ParamArray, Box<dyn Error>> {
    state.get(key).ok_or_else(|| {
        Box::new(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("checkpoint is missing parameter {:?}", key),
        )) as Box<dyn Error>
    })
}

fn check_len(data: &[f32], expected: usize, what: &str) -> Result<(), Box<dyn Error>> {
    if data.len() != expected {
        return Err(Box::new(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "checkpoint {} holds {} values, expected {}",
                what,
                data.len(),
                expected
            ),
        )));
    }
    Ok(())
}
