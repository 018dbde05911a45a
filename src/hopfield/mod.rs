//! Hopfield associative memory.
//!
//! ## Hebbian Encoding
//!
//! Given P bipolar patterns over N units (rows of a P×N matrix), the weights are
//! built in one shot:
//! ```text
//! W = (1/P) · ξᵗ ξ,   W_ii = 0
//! ```
//! Stored patterns become (approximate) local minima of
//! ```text
//! E(s) = -½ sᵗ W s
//! ```
//!
//! ## Asynchronous Relaxation
//!
//! Each update picks one unit uniformly at random and aligns it with the sign
//! of its net input (`net ≥ 0 → +1`, else `-1`). With symmetric, zero-diagonal
//! weights a single flip changes the energy by `-Δs_i · net_i ≤ 0`, so the
//! energy never increases and the state settles into an attractor.

use crate::core::{model_rng, EbmError, EbmResult, EnergyModel, ModelRng};
use crate::utils::{random_bipolar, zero_diagonal};
use ndarray::{Array1, Array2, ArrayView1};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Persisted form of a Hopfield network: declared size plus weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HopfieldParams {
    /// Number of units N
    pub units: usize,
    /// N×N coupling matrix
    pub weights: Array2<f64>,
}

/// A Hopfield network with bipolar (±1) units.
#[derive(Debug, Clone)]
pub struct HopfieldNetwork {
    /// Symmetric N×N weights with zero diagonal
    weights: Array2<f64>,
    /// Current unit values, each -1.0 or +1.0
    state: Array1<f64>,
    rng: ModelRng,
}

impl HopfieldNetwork {
    /// Encode the rows of `patterns` as memories.
    ///
    /// # Errors
    /// `InvalidConfig` if there are no patterns or no units.
    pub fn from_patterns(patterns: &Array2<f64>) -> EbmResult<Self> {
        Self::encode(patterns, model_rng(None))
    }

    /// [`from_patterns`](Self::from_patterns) with a deterministic generator.
    pub fn from_patterns_seeded(patterns: &Array2<f64>, seed: u64) -> EbmResult<Self> {
        Self::encode(patterns, model_rng(Some(seed)))
    }

    fn encode(patterns: &Array2<f64>, rng: ModelRng) -> EbmResult<Self> {
        let (num_patterns, units) = patterns.dim();
        if num_patterns == 0 || units == 0 {
            return Err(EbmError::InvalidConfig(format!(
                "Hopfield memory needs at least one pattern and one unit, got {num_patterns}x{units}"
            )));
        }

        info!(patterns = num_patterns, units, "Encoding Hopfield memory");
        let mut weights = patterns.t().dot(patterns) / num_patterns as f64;
        zero_diagonal(&mut weights);

        Ok(Self::with_weights(weights, rng))
    }

    /// Rebuild a network from persisted weights. The state starts randomized.
    ///
    /// # Errors
    /// `ShapeMismatch` if the weights are not `units × units`,
    /// `InvalidConfig` if `units` is zero.
    pub fn from_params(params: HopfieldParams) -> EbmResult<Self> {
        Self::restore(params, model_rng(None))
    }

    pub fn from_params_seeded(params: HopfieldParams, seed: u64) -> EbmResult<Self> {
        Self::restore(params, model_rng(Some(seed)))
    }

    fn restore(params: HopfieldParams, rng: ModelRng) -> EbmResult<Self> {
        if params.units == 0 {
            return Err(EbmError::InvalidConfig(
                "Hopfield network needs at least one unit".to_string(),
            ));
        }
        if params.weights.dim() != (params.units, params.units) {
            return Err(EbmError::ShapeMismatch(format!(
                "Hopfield weights: declared {0}x{0}, got {1:?}",
                params.units,
                params.weights.dim()
            )));
        }
        Ok(Self::with_weights(params.weights, rng))
    }

    fn with_weights(weights: Array2<f64>, mut rng: ModelRng) -> Self {
        let state = random_bipolar(weights.nrows(), &mut rng);
        Self {
            weights,
            state,
            rng,
        }
    }

    /// Export the learned weights for persistence.
    pub fn params(&self) -> HopfieldParams {
        HopfieldParams {
            units: self.units(),
            weights: self.weights.clone(),
        }
    }

    /// Replace the generator with a freshly seeded one.
    pub fn reseed(&mut self, seed: u64) {
        self.rng = model_rng(Some(seed));
    }

    pub fn units(&self) -> usize {
        self.state.len()
    }

    pub fn weights(&self) -> &Array2<f64> {
        &self.weights
    }

    pub fn state(&self) -> &Array1<f64> {
        &self.state
    }

    /// Clamp the state to a cue pattern, snapping each value by sign.
    ///
    /// # Errors
    /// `ShapeMismatch` if the cue length differs from the unit count.
    pub fn set_state(&mut self, cue: &Array1<f64>) -> EbmResult<()> {
        if cue.len() != self.units() {
            return Err(EbmError::ShapeMismatch(format!(
                "Probe length: expected {}, got {}",
                self.units(),
                cue.len()
            )));
        }
        self.state = cue.mapv(|x| if x >= 0.0 { 1.0 } else { -1.0 });
        Ok(())
    }

    /// Net input to unit `i`: `W[:, i] · s`.
    pub fn net_input(&self, i: usize) -> f64 {
        self.weights.column(i).dot(&self.state)
    }

    /// Align unit `i` with its net input. Returns true if it flipped.
    pub fn update_unit(&mut self, i: usize) -> bool {
        let next = if self.net_input(i) >= 0.0 { 1.0 } else { -1.0 };
        let flipped = self.state[i] != next;
        self.state[i] = next;
        flipped
    }

    /// True when no single-unit update would change the state.
    pub fn is_stable(&self) -> bool {
        (0..self.units()).all(|i| {
            let next = if self.net_input(i) >= 0.0 { 1.0 } else { -1.0 };
            self.state[i] == next
        })
    }
}

impl EnergyModel for HopfieldNetwork {
    fn energy(&self) -> f64 {
        -0.5 * self.state.dot(&self.weights.dot(&self.state))
    }

    fn randomize_state(&mut self) {
        self.state = random_bipolar(self.units(), &mut self.rng);
    }

    fn update_state(&mut self, steps: usize) {
        let n = self.units();
        for _ in 0..steps {
            let i = self.rng.gen_range(0..n);
            self.update_unit(i);
        }
        debug!(energy = self.energy(), steps, "Hopfield relaxation");
    }

    fn visible_state(&self) -> ArrayView1<'_, f64> {
        self.state.view()
    }

    fn name(&self) -> &'static str {
        "hopfield"
    }
}
