//! Restricted Boltzmann machine.
//!
//! ## Energy
//!
//! Only visible-hidden couplings exist (`W` is V×H in this crate):
//! ```text
//! E(x, h) = -(xᵗWh + cᵗx + bᵗh)
//! F(x)    = -cᵗx - Σ_j log(1 + exp((xW + b)_j))
//! ```
//!
//! `F` is the free energy: the energy of a visible configuration with the
//! hidden units summed out.
//!
//! ## Block Gibbs Sampling
//!
//! Without visible-visible or hidden-hidden terms every hidden unit is
//! conditionally independent given the visible layer and vice versa:
//! ```text
//! P(h = 1 | x) = σ(xW + b)
//! P(x = 1 | h) = σ(hWᵗ + c)
//! ```
//! so a whole layer (and a whole batch of rows) is resampled with two matrix
//! products per step.
//!
//! ## Training
//!
//! Mini-batch CD-k: positive statistics from each data batch, negative
//! statistics from a k-step chain restarted from that batch, gradient
//! `(positive - negative) / batch_size`, applied through the configured
//! optimizer (momentum by default).

use crate::core::{model_rng, EbmError, EbmResult, EnergyModel, ModelRng};
use crate::optim::{Optimizer, ParamSet};
use crate::training::{
    extract_batch, full_batches, shuffle_indices, validate_data, EpochMetrics, TrainingReport,
};
use crate::utils::{
    bernoulli_sample, gaussian_array, mean_squared_error, random_binary, sigmoid, sigmoid_inplace,
    softplus,
};
use crate::{GaussianInit, RbmConfig};
use ndarray::{Array1, Array2, ArrayBase, ArrayView1, Axis, Data, Ix2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// The learnable tensors of an RBM.
///
/// The same shapes hold parameters, gradients and optimizer velocity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RbmTensors {
    /// W: visible-hidden weights, V×H
    pub weights: Array2<f64>,
    /// c: visible biases, V
    pub visible_bias: Array1<f64>,
    /// b: hidden biases, H
    pub hidden_bias: Array1<f64>,
}

impl ParamSet for RbmTensors {
    fn zeros_like(&self) -> Self {
        Self {
            weights: Array2::zeros(self.weights.dim()),
            visible_bias: Array1::zeros(self.visible_bias.len()),
            hidden_bias: Array1::zeros(self.hidden_bias.len()),
        }
    }

    fn apply(&mut self, velocity: &mut Self, grads: &Self, optimizer: &Optimizer) {
        optimizer.update(&mut self.weights, &mut velocity.weights, &grads.weights);
        optimizer.update(
            &mut self.visible_bias,
            &mut velocity.visible_bias,
            &grads.visible_bias,
        );
        optimizer.update(
            &mut self.hidden_bias,
            &mut velocity.hidden_bias,
            &grads.hidden_bias,
        );
    }
}

/// Persisted form of an RBM: declared sizes plus tensors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RbmParams {
    pub visible: usize,
    pub hidden: usize,
    /// V×H
    pub weights: Array2<f64>,
    pub visible_bias: Array1<f64>,
    pub hidden_bias: Array1<f64>,
}

/// A binary-binary restricted Boltzmann machine.
#[derive(Debug, Clone)]
pub struct RestrictedBoltzmannMachine {
    visible: usize,
    hidden: usize,
    params: RbmTensors,
    /// Last batch gradient
    grads: RbmTensors,
    /// Optimizer velocity, zeroed at the start of every `train` call
    velocity: RbmTensors,
    /// Visible state, values in {0, 1}
    x: Array1<f64>,
    /// Hidden state, values in {0, 1}
    h: Array1<f64>,
    rng: ModelRng,
}

impl RestrictedBoltzmannMachine {
    /// Create an RBM with parameters drawn from the default [`GaussianInit`].
    ///
    /// # Errors
    /// `InvalidConfig` if either layer is empty.
    pub fn new(visible: usize, hidden: usize) -> EbmResult<Self> {
        Self::init(visible, hidden, model_rng(None))
    }

    pub fn new_seeded(visible: usize, hidden: usize, seed: u64) -> EbmResult<Self> {
        Self::init(visible, hidden, model_rng(Some(seed)))
    }

    fn init(visible: usize, hidden: usize, mut rng: ModelRng) -> EbmResult<Self> {
        check_sizes(visible, hidden)?;
        let init = GaussianInit::default();
        let params = RbmTensors {
            weights: gaussian_array((visible, hidden), &init, &mut rng)?,
            visible_bias: gaussian_array(visible, &init, &mut rng)?,
            hidden_bias: gaussian_array(hidden, &init, &mut rng)?,
        };
        Ok(Self::with_params(visible, hidden, params, rng))
    }

    /// Rebuild an RBM from persisted parameters. The state starts randomized.
    ///
    /// # Errors
    /// `ShapeMismatch` if a tensor disagrees with the declared sizes.
    pub fn from_params(params: RbmParams) -> EbmResult<Self> {
        Self::restore(params, model_rng(None))
    }

    pub fn from_params_seeded(params: RbmParams, seed: u64) -> EbmResult<Self> {
        Self::restore(params, model_rng(Some(seed)))
    }

    fn restore(params: RbmParams, rng: ModelRng) -> EbmResult<Self> {
        let RbmParams {
            visible,
            hidden,
            weights,
            visible_bias,
            hidden_bias,
        } = params;
        check_sizes(visible, hidden)?;
        if weights.dim() != (visible, hidden) {
            return Err(EbmError::ShapeMismatch(format!(
                "RBM weights: expected ({visible}, {hidden}), got {:?}",
                weights.dim()
            )));
        }
        if visible_bias.len() != visible || hidden_bias.len() != hidden {
            return Err(EbmError::ShapeMismatch(format!(
                "RBM biases: expected ({visible}, {hidden}), got ({}, {})",
                visible_bias.len(),
                hidden_bias.len()
            )));
        }
        let tensors = RbmTensors {
            weights,
            visible_bias,
            hidden_bias,
        };
        Ok(Self::with_params(visible, hidden, tensors, rng))
    }

    fn with_params(visible: usize, hidden: usize, params: RbmTensors, mut rng: ModelRng) -> Self {
        let x = random_binary(visible, &mut rng);
        let h = random_binary(hidden, &mut rng);
        Self {
            visible,
            hidden,
            grads: params.zeros_like(),
            velocity: params.zeros_like(),
            params,
            x,
            h,
            rng,
        }
    }

    /// Export all tensors for persistence.
    pub fn params(&self) -> RbmParams {
        RbmParams {
            visible: self.visible,
            hidden: self.hidden,
            weights: self.params.weights.clone(),
            visible_bias: self.params.visible_bias.clone(),
            hidden_bias: self.params.hidden_bias.clone(),
        }
    }

    pub fn reseed(&mut self, seed: u64) {
        self.rng = model_rng(Some(seed));
    }

    pub fn num_visible(&self) -> usize {
        self.visible
    }

    pub fn num_hidden(&self) -> usize {
        self.hidden
    }

    pub fn tensors(&self) -> &RbmTensors {
        &self.params
    }

    pub fn weights(&self) -> &Array2<f64> {
        &self.params.weights
    }

    /// Gradient of the most recent batch.
    pub fn gradients(&self) -> &RbmTensors {
        &self.grads
    }

    /// Optimizer velocity after the most recent batch.
    pub fn velocity(&self) -> &RbmTensors {
        &self.velocity
    }

    pub fn visible(&self) -> &Array1<f64> {
        &self.x
    }

    pub fn hidden(&self) -> &Array1<f64> {
        &self.h
    }

    /// Clamp the visible layer, e.g. to start a chain from a data row.
    ///
    /// # Errors
    /// `ShapeMismatch` on a length mismatch.
    pub fn set_visible(&mut self, x: &Array1<f64>) -> EbmResult<()> {
        if x.len() != self.visible {
            return Err(EbmError::ShapeMismatch(format!(
                "Visible state: expected {}, got {}",
                self.visible,
                x.len()
            )));
        }
        self.x.assign(x);
        Ok(())
    }

    /// P(h = 1 | x) for a batch of visible rows, shape (batch, H).
    pub fn probability_h_given_x<S>(&self, x: &ArrayBase<S, Ix2>) -> Array2<f64>
    where
        S: Data<Elem = f64>,
    {
        let mut activation = x.dot(&self.params.weights) + &self.params.hidden_bias;
        sigmoid_inplace(&mut activation);
        activation
    }

    /// P(x = 1 | h) for a batch of hidden rows, shape (batch, V).
    pub fn probability_x_given_h<S>(&self, h: &ArrayBase<S, Ix2>) -> Array2<f64>
    where
        S: Data<Elem = f64>,
    {
        let mut activation = h.dot(&self.params.weights.t()) + &self.params.visible_bias;
        sigmoid_inplace(&mut activation);
        activation
    }

    /// P(h = 1 | x) for a single visible vector.
    pub fn hidden_probabilities(&self, x: ArrayView1<'_, f64>) -> Array1<f64> {
        (x.dot(&self.params.weights) + &self.params.hidden_bias).mapv(sigmoid)
    }

    /// P(x = 1 | h) for a single hidden vector.
    pub fn visible_probabilities(&self, h: ArrayView1<'_, f64>) -> Array1<f64> {
        (self.params.weights.dot(&h) + &self.params.visible_bias).mapv(sigmoid)
    }

    /// Free energy of an arbitrary visible vector.
    pub fn free_energy_of(&self, x: ArrayView1<'_, f64>) -> f64 {
        let hidden_term: f64 = (x.dot(&self.params.weights) + &self.params.hidden_bias)
            .iter()
            .map(|&a| softplus(a))
            .sum();
        -self.params.visible_bias.dot(&x) - hidden_term
    }

    /// Free energy of the current visible state.
    pub fn free_energy(&self) -> f64 {
        self.free_energy_of(self.x.view())
    }

    /// Mean free energy over the rows of `data`, evaluated in parallel.
    ///
    /// # Errors
    /// `ShapeMismatch` if the column count differs from the visible size.
    pub fn mean_free_energy(&self, data: &Array2<f64>) -> EbmResult<f64> {
        validate_data(data, self.visible)?;
        let per_row: Vec<f64> = data
            .axis_iter(Axis(0))
            .into_par_iter()
            .map(|row| self.free_energy_of(row))
            .collect();
        Ok(per_row.iter().sum::<f64>() / per_row.len() as f64)
    }

    /// Train with mini-batch CD-k.
    ///
    /// Weights and biases are re-initialized from the configured Gaussians at
    /// the start of every call, discarding any loaded parameters. Velocity is
    /// zeroed here and then carried across all batches and epochs.
    ///
    /// # Errors
    /// `ShapeMismatch` if the column count differs from the visible size,
    /// `InvalidConfig` for empty data or an invalid configuration.
    pub fn train(&mut self, data: &Array2<f64>, config: &RbmConfig) -> EbmResult<TrainingReport> {
        config.validate()?;
        validate_data(data, self.visible)?;
        self.reinitialize(config)?;

        let batch_size = config.batch_size;
        let (num_batches, remainder) = full_batches(data.nrows(), batch_size);
        if num_batches == 0 {
            warn!(
                rows = data.nrows(),
                batch_size, "Data does not fill a single batch; no updates will run"
            );
        } else if remainder > 0 {
            warn!(remainder, "Dropping trailing rows that do not fill a batch");
        }

        let mut indices: Vec<usize> = (0..data.nrows()).collect();
        let mut report = TrainingReport::default();

        for epoch in 0..config.epochs {
            if config.shuffle {
                shuffle_indices(&mut indices, &mut self.rng);
            }

            let mut batch_losses = Vec::with_capacity(num_batches);
            for (batch_idx, chunk) in indices.chunks_exact(batch_size).enumerate() {
                let batch = extract_batch(data, chunk);
                let loss = self.train_batch(&batch, config.cd_steps);
                self.params
                    .apply(&mut self.velocity, &self.grads, &config.optimizer);

                debug!(
                    epoch = epoch + 1,
                    batch = batch_idx + 1,
                    batches = num_batches,
                    loss,
                    "RBM batch"
                );
                batch_losses.push(loss);
            }

            let avg_loss = if batch_losses.is_empty() {
                0.0
            } else {
                batch_losses.iter().sum::<f64>() / batch_losses.len() as f64
            };
            info!(
                epoch = epoch + 1,
                epochs = config.epochs,
                loss = avg_loss,
                "RBM epoch"
            );

            report.epochs.push(EpochMetrics {
                epoch,
                avg_loss,
                num_batches,
                num_samples: num_batches * batch_size,
                batch_losses,
            });
        }

        Ok(report)
    }

    /// Estimate the CD-k gradient of one batch into [`gradients`](Self::gradients).
    ///
    /// # Algorithm
    /// 1. Positive phase: `P(h|batch)`, one hidden sample seeds the chain
    /// 2. Negative phase: `k` alternations `x̂ ~ P(x|h)`, `P(h|x̂)`
    /// 3. `∇W = (batchᵗ P(h|batch) - x̂ᵗ P(h|x̂)) / n`, likewise for the biases
    ///
    /// Returns the mean squared error between the batch and `x̂`.
    pub fn train_batch(&mut self, batch: &Array2<f64>, cd_steps: usize) -> f64 {
        let n = batch.nrows() as f64;

        let positive_h = self.probability_h_given_x(batch);
        let h_sample = bernoulli_sample(&positive_h, &mut self.rng);

        let mut negative_x = self.sample_x_given_h(&h_sample);
        let mut negative_h = self.probability_h_given_x(&negative_x);
        for _ in 1..cd_steps {
            let h_sample = bernoulli_sample(&negative_h, &mut self.rng);
            negative_x = self.sample_x_given_h(&h_sample);
            negative_h = self.probability_h_given_x(&negative_x);
        }

        self.grads.weights = (batch.t().dot(&positive_h) - negative_x.t().dot(&negative_h)) / n;
        self.grads.hidden_bias =
            (positive_h.sum_axis(Axis(0)) - negative_h.sum_axis(Axis(0))) / n;
        self.grads.visible_bias = (batch.sum_axis(Axis(0)) - negative_x.sum_axis(Axis(0))) / n;

        mean_squared_error(batch, &negative_x)
    }

    fn sample_x_given_h(&mut self, h: &Array2<f64>) -> Array2<f64> {
        let probs = self.probability_x_given_h(h);
        bernoulli_sample(&probs, &mut self.rng)
    }

    fn reinitialize(&mut self, config: &RbmConfig) -> EbmResult<()> {
        let rng = &mut self.rng;
        let weights = gaussian_array((self.visible, self.hidden), &config.weight_init, rng)?;
        let visible_bias = gaussian_array(self.visible, &config.visible_bias_init, rng)?;
        let hidden_bias = gaussian_array(self.hidden, &config.hidden_bias_init, rng)?;
        self.params = RbmTensors {
            weights,
            visible_bias,
            hidden_bias,
        };
        self.grads = self.params.zeros_like();
        self.velocity = self.params.zeros_like();
        Ok(())
    }
}

fn check_sizes(visible: usize, hidden: usize) -> EbmResult<()> {
    if visible == 0 || hidden == 0 {
        return Err(EbmError::InvalidConfig(format!(
            "RBM needs non-empty layers, got visible={visible}, hidden={hidden}"
        )));
    }
    Ok(())
}

impl EnergyModel for RestrictedBoltzmannMachine {
    fn energy(&self) -> f64 {
        let p = &self.params;
        let coupling = self.x.dot(&p.weights.dot(&self.h));
        -(coupling + p.visible_bias.dot(&self.x) + p.hidden_bias.dot(&self.h))
    }

    fn randomize_state(&mut self) {
        self.x = random_binary(self.visible, &mut self.rng);
        self.h = random_binary(self.hidden, &mut self.rng);
    }

    fn update_state(&mut self, steps: usize) {
        for _ in 0..steps {
            let ph = self.hidden_probabilities(self.x.view());
            self.h = bernoulli_sample(&ph, &mut self.rng);
            let px = self.visible_probabilities(self.h.view());
            self.x = bernoulli_sample(&px, &mut self.rng);
        }
    }

    fn visible_state(&self) -> ArrayView1<'_, f64> {
        self.x.view()
    }

    fn name(&self) -> &'static str {
        "rbm"
    }
}
