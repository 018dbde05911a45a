//! # boltzmann
//!
//! Energy-based stochastic neural networks over binary units: Hopfield
//! associative memories, general Boltzmann machines and restricted Boltzmann
//! machines (RBMs).
//!
//! ## Overview
//!
//! All three models share one pattern: a state vector of binary units, weight
//! matrices defining pairwise interaction energy, an energy function, and a
//! stochastic unit-update rule. The two Boltzmann machines additionally learn
//! their weights by contrasting statistics gathered under the data
//! (positive phase) with statistics gathered from their own Gibbs chains
//! (negative phase).
//!
//! ## Structure
//!
//! - [`core`]: Error type, the [`EnergyModel`] contract, per-model RNG
//! - [`utils`]: Sigmoid, softplus, Bernoulli/Gaussian sampling, matrix helpers
//! - [`optim`]: Plain and momentum gradient ascent
//! - [`training`]: Epoch metrics, batching helpers, best-checkpoint tracking
//! - [`hopfield`]: Hebbian associative memory with asynchronous relaxation
//! - [`boltzmann`]: Fully connected visible/hidden Boltzmann machine
//! - [`rbm`]: Bipartite RBM trained with CD-k and momentum
//! - [`checkpoint`]: JSON checkpoints and the plain-text model format
//! - [`data`]: `.npy` / text matrix loading and rescaling
//! - [`render`]: PNG rendering of states, weights and RBM filters
//!
//! ## Reproducibility
//!
//! Every model owns its own seedable generator. Constructors ending in
//! `_seeded` make sampling, initialization, shuffling and training fully
//! deterministic.

pub mod boltzmann;
pub mod checkpoint;
pub mod core;
pub mod data;
pub mod hopfield;
pub mod optim;
pub mod rbm;
pub mod render;
pub mod training;
pub mod utils;

pub use crate::boltzmann::{BoltzmannMachine, BoltzmannParams};
pub use crate::core::{model_rng, EbmError, EbmResult, EnergyModel, ModelRng};
pub use checkpoint::{
    load_checkpoint, load_model, save_checkpoint, save_model, Checkpoint, ModelKind,
};
pub use hopfield::{HopfieldNetwork, HopfieldParams};
pub use optim::{Optimizer, ParamSet};
pub use rbm::{RbmParams, RbmTensors, RestrictedBoltzmannMachine};
pub use training::{BestCheckpoint, EpochMetrics, TrainingReport};

use serde::{Deserialize, Serialize};

/// Normal distribution used to initialize a parameter tensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaussianInit {
    /// Mean of the initial values. Default 0.0.
    pub mean: f64,
    /// Standard deviation of the initial values. Default 0.01.
    pub std: f64,
}

impl Default for GaussianInit {
    fn default() -> Self {
        Self {
            mean: 0.0,
            std: 0.01,
        }
    }
}

/// General Boltzmann machine training configuration.
///
/// Every epoch uses the full dataset as one batch for the positive phase and
/// one freshly randomized Gibbs chain for the negative phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoltzmannConfig {
    /// Number of training epochs. Default 100.
    pub epochs: usize,
    /// Negative-phase samples recorded per epoch. Default 1000.
    pub sample_steps: usize,
    /// Single-unit updates between recorded samples. Default 1.
    pub updates_per_sample: usize,
    /// Parameter update rule. Default plain SGD with learning rate 0.01.
    pub optimizer: Optimizer,
    /// Restore the lowest-energy parameters seen once training ends. Default true.
    pub keep_best: bool,
}

impl Default for BoltzmannConfig {
    fn default() -> Self {
        Self {
            epochs: 100,
            sample_steps: 1000,
            updates_per_sample: 1,
            optimizer: Optimizer::Sgd {
                learning_rate: 0.01,
            },
            keep_best: true,
        }
    }
}

impl BoltzmannConfig {
    /// # Errors
    /// `InvalidConfig` on zero sampling counts or an invalid optimizer.
    pub fn validate(&self) -> EbmResult<()> {
        if self.sample_steps == 0 {
            return Err(EbmError::InvalidConfig(
                "Negative phase needs at least one sample step".to_string(),
            ));
        }
        if self.updates_per_sample == 0 {
            return Err(EbmError::InvalidConfig(
                "Updates per sample must be > 0".to_string(),
            ));
        }
        self.optimizer.validate()
    }
}

/// RBM training configuration (mini-batch contrastive divergence).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RbmConfig {
    /// Number of training epochs. Default 10.
    pub epochs: usize,
    /// Rows per mini-batch; trailing rows that do not fill a batch are dropped. Default 64.
    pub batch_size: usize,
    /// Gibbs alternations per negative phase (the k of CD-k). Default 1.
    pub cd_steps: usize,
    /// Parameter update rule. Default momentum 0.5 with learning rate 0.05.
    pub optimizer: Optimizer,
    /// Shuffle rows at the start of every epoch. Default true.
    pub shuffle: bool,
    /// Initialization of the visible-hidden weights.
    pub weight_init: GaussianInit,
    /// Initialization of the visible biases.
    pub visible_bias_init: GaussianInit,
    /// Initialization of the hidden biases.
    pub hidden_bias_init: GaussianInit,
}

impl Default for RbmConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            batch_size: 64,
            cd_steps: 1,
            optimizer: Optimizer::Momentum {
                learning_rate: 0.05,
                momentum: 0.5,
            },
            shuffle: true,
            weight_init: GaussianInit::default(),
            visible_bias_init: GaussianInit::default(),
            hidden_bias_init: GaussianInit::default(),
        }
    }
}

impl RbmConfig {
    /// # Errors
    /// `InvalidConfig` on zero batch size, zero CD steps or an invalid optimizer.
    pub fn validate(&self) -> EbmResult<()> {
        if self.batch_size == 0 {
            return Err(EbmError::InvalidConfig("Batch size must be > 0".to_string()));
        }
        if self.cd_steps == 0 {
            return Err(EbmError::InvalidConfig(
                "Contrastive divergence needs at least one Gibbs step".to_string(),
            ));
        }
        self.optimizer.validate()
    }
}
