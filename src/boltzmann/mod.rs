//! General Boltzmann machine with visible and hidden units.
//!
//! ## Energy
//!
//! ```text
//! E(v, h) = -(½ vᵗAv + ½ hᵗBh + vᵗWh + aᵗv + bᵗh)
//! ```
//!
//! - `A` (V×V) couples visible units to each other, `B` (H×H) hidden units to
//!   each other; both are symmetric with zero diagonal
//! - `W` (V×H) couples the two populations
//! - `a`, `b` are the visible and hidden biases
//!
//! Units take values in {0, 1}. A unit's conditional probability of being on
//! is the sigmoid of its net input, which includes every other unit, so the
//! Gibbs sampler has to visit units one at a time.
//!
//! ## Learning
//!
//! Each epoch contrasts two sets of sufficient statistics
//! (`vvᵗ`, `hhᵗ`, `vhᵗ`, `v`, `h`):
//!
//! - **positive phase**: visible units clamped to each data row, one hidden
//!   sample driven by that row
//! - **negative phase**: a free-running chain from a random state
//!
//! and steps every tensor along `positive - negative`.

use crate::core::{model_rng, EbmError, EbmResult, EnergyModel, ModelRng};
use crate::optim::{Optimizer, ParamSet};
use crate::training::{validate_data, BestCheckpoint, EpochMetrics, TrainingReport};
use crate::utils::{gaussian_array, random_binary, sigmoid, symmetrize, zero_diagonal};
use crate::{BoltzmannConfig, GaussianInit};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Full parameter set of a general Boltzmann machine.
///
/// Also used for sufficient statistics, gradients, optimizer velocity and the
/// best-epoch snapshot, which all share these shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoltzmannParams {
    /// Number of visible units V
    pub visible: usize,
    /// Number of hidden units H
    pub hidden: usize,
    /// A: visible-visible couplings, V×V
    pub visible_couplings: Array2<f64>,
    /// B: hidden-hidden couplings, H×H
    pub hidden_couplings: Array2<f64>,
    /// W: visible-hidden couplings, V×H
    pub weights: Array2<f64>,
    /// a: visible biases, V
    pub visible_bias: Array1<f64>,
    /// b: hidden biases, H
    pub hidden_bias: Array1<f64>,
}

impl BoltzmannParams {
    /// Check that every tensor matches the declared sizes.
    ///
    /// # Errors
    /// `ShapeMismatch` naming the first tensor that disagrees.
    pub fn validate(&self) -> EbmResult<()> {
        let (v, h) = (self.visible, self.hidden);
        let checks = [
            ("A", self.visible_couplings.dim(), (v, v)),
            ("B", self.hidden_couplings.dim(), (h, h)),
            ("W", self.weights.dim(), (v, h)),
            ("a", (self.visible_bias.len(), 1), (v, 1)),
            ("b", (self.hidden_bias.len(), 1), (h, 1)),
        ];
        for (name, got, expected) in checks {
            if got != expected {
                return Err(EbmError::ShapeMismatch(format!(
                    "Boltzmann tensor {name}: expected {expected:?}, got {got:?}"
                )));
            }
        }
        Ok(())
    }

    /// Elementwise `self - other`.
    fn difference(&self, other: &Self) -> Self {
        Self {
            visible: self.visible,
            hidden: self.hidden,
            visible_couplings: &self.visible_couplings - &other.visible_couplings,
            hidden_couplings: &self.hidden_couplings - &other.hidden_couplings,
            weights: &self.weights - &other.weights,
            visible_bias: &self.visible_bias - &other.visible_bias,
            hidden_bias: &self.hidden_bias - &other.hidden_bias,
        }
    }

    fn zero_self_couplings(&mut self) {
        zero_diagonal(&mut self.visible_couplings);
        zero_diagonal(&mut self.hidden_couplings);
    }
}

impl ParamSet for BoltzmannParams {
    fn zeros_like(&self) -> Self {
        Self {
            visible: self.visible,
            hidden: self.hidden,
            visible_couplings: Array2::zeros(self.visible_couplings.dim()),
            hidden_couplings: Array2::zeros(self.hidden_couplings.dim()),
            weights: Array2::zeros(self.weights.dim()),
            visible_bias: Array1::zeros(self.visible_bias.len()),
            hidden_bias: Array1::zeros(self.hidden_bias.len()),
        }
    }

    fn apply(&mut self, velocity: &mut Self, grads: &Self, optimizer: &Optimizer) {
        optimizer.update(
            &mut self.visible_couplings,
            &mut velocity.visible_couplings,
            &grads.visible_couplings,
        );
        optimizer.update(
            &mut self.hidden_couplings,
            &mut velocity.hidden_couplings,
            &grads.hidden_couplings,
        );
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

/// A Boltzmann machine with full visible-visible, hidden-hidden and
/// visible-hidden connectivity.
#[derive(Debug, Clone)]
pub struct BoltzmannMachine {
    params: BoltzmannParams,
    /// Visible state, values in {0, 1}
    v: Array1<f64>,
    /// Hidden state, values in {0, 1}
    h: Array1<f64>,
    rng: ModelRng,
}

impl BoltzmannMachine {
    /// Create a machine with random parameters drawn from N(0, 1/√(V+H)).
    ///
    /// `A` and `B` are symmetrized and their diagonals zeroed.
    ///
    /// # Errors
    /// `InvalidConfig` if `visible` is zero.
    pub fn new(visible: usize, hidden: usize) -> EbmResult<Self> {
        Self::init(visible, hidden, model_rng(None))
    }

    pub fn new_seeded(visible: usize, hidden: usize, seed: u64) -> EbmResult<Self> {
        Self::init(visible, hidden, model_rng(Some(seed)))
    }

    fn init(visible: usize, hidden: usize, mut rng: ModelRng) -> EbmResult<Self> {
        if visible == 0 {
            return Err(EbmError::InvalidConfig(
                "Boltzmann machine needs at least one visible unit".to_string(),
            ));
        }

        let init = GaussianInit {
            mean: 0.0,
            std: 1.0 / ((visible + hidden) as f64).sqrt(),
        };
        let mut visible_couplings = gaussian_array((visible, visible), &init, &mut rng)?;
        let mut hidden_couplings = gaussian_array((hidden, hidden), &init, &mut rng)?;
        let weights = gaussian_array((visible, hidden), &init, &mut rng)?;
        let visible_bias = gaussian_array(visible, &init, &mut rng)?;
        let hidden_bias = gaussian_array(hidden, &init, &mut rng)?;

        symmetrize(&mut visible_couplings);
        symmetrize(&mut hidden_couplings);

        let mut params = BoltzmannParams {
            visible,
            hidden,
            visible_couplings,
            hidden_couplings,
            weights,
            visible_bias,
            hidden_bias,
        };
        params.zero_self_couplings();

        Ok(Self::with_params(params, rng))
    }

    /// Rebuild a machine from persisted parameters. The state starts randomized.
    ///
    /// # Errors
    /// `ShapeMismatch` if a tensor disagrees with the declared sizes,
    /// `InvalidConfig` if no visible units are declared.
    pub fn from_params(params: BoltzmannParams) -> EbmResult<Self> {
        Self::restore(params, model_rng(None))
    }

    pub fn from_params_seeded(params: BoltzmannParams, seed: u64) -> EbmResult<Self> {
        Self::restore(params, model_rng(Some(seed)))
    }

    fn restore(params: BoltzmannParams, rng: ModelRng) -> EbmResult<Self> {
        if params.visible == 0 {
            return Err(EbmError::InvalidConfig(
                "Boltzmann machine needs at least one visible unit".to_string(),
            ));
        }
        params.validate()?;
        Ok(Self::with_params(params, rng))
    }

    fn with_params(params: BoltzmannParams, mut rng: ModelRng) -> Self {
        let v = random_binary(params.visible, &mut rng);
        let h = random_binary(params.hidden, &mut rng);
        Self { params, v, h, rng }
    }

    /// Export all tensors for persistence.
    pub fn params(&self) -> BoltzmannParams {
        self.params.clone()
    }

    pub fn reseed(&mut self, seed: u64) {
        self.rng = model_rng(Some(seed));
    }

    pub fn num_visible(&self) -> usize {
        self.params.visible
    }

    pub fn num_hidden(&self) -> usize {
        self.params.hidden
    }

    pub fn visible(&self) -> &Array1<f64> {
        &self.v
    }

    pub fn hidden(&self) -> &Array1<f64> {
        &self.h
    }

    pub fn visible_couplings(&self) -> &Array2<f64> {
        &self.params.visible_couplings
    }

    pub fn hidden_couplings(&self) -> &Array2<f64> {
        &self.params.hidden_couplings
    }

    pub fn weights(&self) -> &Array2<f64> {
        &self.params.weights
    }

    /// Overwrite both populations.
    ///
    /// # Errors
    /// `ShapeMismatch` if either vector has the wrong length.
    pub fn set_state(&mut self, v: &Array1<f64>, h: &Array1<f64>) -> EbmResult<()> {
        if v.len() != self.num_visible() || h.len() != self.num_hidden() {
            return Err(EbmError::ShapeMismatch(format!(
                "State: expected ({}, {}), got ({}, {})",
                self.num_visible(),
                self.num_hidden(),
                v.len(),
                h.len()
            )));
        }
        self.v.assign(v);
        self.h.assign(h);
        Ok(())
    }

    /// P(v_i = 1 | everything else) = σ(A[i,:]·v + W[i,:]·h + a_i)
    pub fn probability_of_visible_on(&self, i: usize) -> f64 {
        let p = &self.params;
        sigmoid(
            p.visible_couplings.row(i).dot(&self.v)
                + p.weights.row(i).dot(&self.h)
                + p.visible_bias[i],
        )
    }

    /// P(h_j = 1 | everything else) = σ(B[j,:]·h + W[:,j]·v + b_j)
    pub fn probability_of_hidden_on(&self, j: usize) -> f64 {
        let p = &self.params;
        sigmoid(
            p.hidden_couplings.row(j).dot(&self.h)
                + p.weights.column(j).dot(&self.v)
                + p.hidden_bias[j],
        )
    }

    /// Resample unit `k` of the combined index space (visible first).
    fn resample_unit(&mut self, k: usize) {
        let visible = self.num_visible();
        if k < visible {
            let p = self.probability_of_visible_on(k);
            self.v[k] = if self.rng.gen::<f64>() < p { 1.0 } else { 0.0 };
        } else {
            let j = k - visible;
            let p = self.probability_of_hidden_on(j);
            self.h[j] = if self.rng.gen::<f64>() < p { 1.0 } else { 0.0 };
        }
    }

    /// One in-order Bernoulli sweep over the hidden units, visible units fixed.
    fn sample_hidden_sweep(&mut self) {
        let visible = self.num_visible();
        for j in 0..self.num_hidden() {
            self.resample_unit(visible + j);
        }
    }

    /// Train on `data` (rows = samples, columns = visible units).
    ///
    /// # Algorithm
    /// Per epoch:
    /// 1. Positive phase over every row (hidden sampled once per row)
    /// 2. Negative phase: randomize, then record `sample_steps` states, each
    ///    `updates_per_sample` single-unit updates apart
    /// 3. Step every tensor along `positive - negative`, re-zero the diagonals
    ///    of `A` and `B`
    /// 4. Score the epoch by the energy of the current state
    ///
    /// With `keep_best`, the lowest-energy parameters are restored at the end.
    ///
    /// # Errors
    /// `ShapeMismatch` if the column count differs from the visible size,
    /// `InvalidConfig` for empty data or an invalid configuration.
    pub fn train(
        &mut self,
        data: &Array2<f64>,
        config: &BoltzmannConfig,
    ) -> EbmResult<TrainingReport> {
        config.validate()?;
        validate_data(data, self.num_visible())?;

        let num_samples = data.nrows();
        let mut velocity = self.params.zeros_like();
        let mut best = BestCheckpoint::new();
        let mut report = TrainingReport::default();

        for epoch in 0..config.epochs {
            let positive = self.positive_phase(data);
            let negative = self.negative_phase(config.sample_steps, config.updates_per_sample);

            let mut grads = positive.difference(&negative);
            grads.zero_self_couplings();
            self.params.apply(&mut velocity, &grads, &config.optimizer);
            self.params.zero_self_couplings();

            let energy = self.energy();
            if config.keep_best {
                best.observe(epoch, energy, &self.params);
            }

            info!(
                epoch = epoch + 1,
                epochs = config.epochs,
                energy,
                "Boltzmann machine epoch"
            );

            report.epochs.push(EpochMetrics {
                epoch,
                avg_loss: energy,
                num_batches: 1,
                num_samples,
                batch_losses: vec![energy],
            });
        }

        if let Some((epoch, energy, params)) = best.into_best() {
            self.params = params;
            report.best_epoch = Some(epoch);
            info!(
                best_epoch = epoch + 1,
                energy, "Training finished, restored lowest-energy parameters"
            );
        }

        Ok(report)
    }

    /// Average statistics with visible units clamped to each data row.
    fn positive_phase(&mut self, data: &Array2<f64>) -> BoltzmannParams {
        let mut hidden_samples = Array2::zeros((data.nrows(), self.num_hidden()));
        for (row, mut h_row) in data.outer_iter().zip(hidden_samples.outer_iter_mut()) {
            self.v.assign(&row);
            self.sample_hidden_sweep();
            h_row.assign(&self.h);
        }
        self.sufficient_statistics(data, &hidden_samples)
    }

    /// Average statistics along a free-running chain from a random state.
    fn negative_phase(
        &mut self,
        sample_steps: usize,
        updates_per_sample: usize,
    ) -> BoltzmannParams {
        self.randomize_state();
        let mut visible_samples = Array2::zeros((sample_steps, self.num_visible()));
        let mut hidden_samples = Array2::zeros((sample_steps, self.num_hidden()));
        for (mut v_row, mut h_row) in visible_samples
            .outer_iter_mut()
            .zip(hidden_samples.outer_iter_mut())
        {
            self.update_state(updates_per_sample);
            v_row.assign(&self.v);
            h_row.assign(&self.h);
        }
        self.sufficient_statistics(&visible_samples, &hidden_samples)
    }

    /// Mean `vvᵗ`, `hhᵗ`, `vhᵗ`, `v`, `h` over stacked sample rows.
    fn sufficient_statistics(&self, vs: &Array2<f64>, hs: &Array2<f64>) -> BoltzmannParams {
        let n = vs.nrows() as f64;
        BoltzmannParams {
            visible: self.num_visible(),
            hidden: self.num_hidden(),
            visible_couplings: vs.t().dot(vs) / n,
            hidden_couplings: hs.t().dot(hs) / n,
            weights: vs.t().dot(hs) / n,
            visible_bias: vs.sum_axis(Axis(0)) / n,
            hidden_bias: hs.sum_axis(Axis(0)) / n,
        }
    }
}

impl EnergyModel for BoltzmannMachine {
    fn energy(&self) -> f64 {
        let p = &self.params;
        let vv = 0.5 * self.v.dot(&p.visible_couplings.dot(&self.v));
        let hh = 0.5 * self.h.dot(&p.hidden_couplings.dot(&self.h));
        let vh = self.v.dot(&p.weights.dot(&self.h));
        let bias = p.visible_bias.dot(&self.v) + p.hidden_bias.dot(&self.h);
        -(vv + hh + vh + bias)
    }

    fn randomize_state(&mut self) {
        self.v = random_binary(self.num_visible(), &mut self.rng);
        self.h = random_binary(self.num_hidden(), &mut self.rng);
    }

    fn update_state(&mut self, steps: usize) {
        let total = self.num_visible() + self.num_hidden();
        for _ in 0..steps {
            let k = self.rng.gen_range(0..total);
            self.resample_unit(k);
        }
    }

    fn visible_state(&self) -> ArrayView1<'_, f64> {
        self.v.view()
    }

    fn name(&self) -> &'static str {
        "boltzmann"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::is_symmetric;
    use ndarray::{arr1, arr2};

    fn binary_data(rows: usize, cols: usize, seed: u64) -> Array2<f64> {
        let mut rng = model_rng(Some(seed));
        Array2::from_shape_fn((rows, cols), |_| if rng.gen_bool(0.5) { 1.0 } else { 0.0 })
    }

    fn small_config() -> BoltzmannConfig {
        BoltzmannConfig {
            epochs: 5,
            sample_steps: 50,
            updates_per_sample: 1,
            optimizer: Optimizer::Sgd { learning_rate: 0.1 },
            keep_best: true,
        }
    }

    fn assert_well_formed(bm: &BoltzmannMachine) {
        assert!(bm.visible_couplings().diag().iter().all(|&x| x == 0.0));
        assert!(bm.hidden_couplings().diag().iter().all(|&x| x == 0.0));
        assert!(is_symmetric(bm.visible_couplings(), 1e-12));
        assert!(is_symmetric(bm.hidden_couplings(), 1e-12));
    }

    #[test]
    fn test_new_shapes_and_invariants() {
        let bm = BoltzmannMachine::new_seeded(6, 3, 1).expect("create machine");
        assert_eq!(bm.visible_couplings().dim(), (6, 6));
        assert_eq!(bm.hidden_couplings().dim(), (3, 3));
        assert_eq!(bm.weights().dim(), (6, 3));
        assert_eq!(bm.visible().len(), 6);
        assert_eq!(bm.hidden().len(), 3);
        assert_well_formed(&bm);
    }

    #[test]
    fn test_zero_visible_rejected() {
        assert!(BoltzmannMachine::new(0, 3).is_err());
    }

    #[test]
    fn test_energy_matches_hand_computation() {
        let params = BoltzmannParams {
            visible: 2,
            hidden: 1,
            visible_couplings: arr2(&[[0.0, 1.0], [1.0, 0.0]]),
            hidden_couplings: arr2(&[[0.0]]),
            weights: arr2(&[[2.0], [-1.0]]),
            visible_bias: arr1(&[0.5, 0.25]),
            hidden_bias: arr1(&[-1.0]),
        };
        let mut bm = BoltzmannMachine::from_params_seeded(params, 0).expect("restore");
        bm.set_state(&arr1(&[1.0, 1.0]), &arr1(&[1.0])).expect("set state");
        // ½vᵗAv = 1, vᵗWh = 1, aᵗv = 0.75, bᵗh = -1
        assert!((bm.energy() - (-(1.0 + 1.0 + 0.75 - 1.0))).abs() < 1e-12);
    }

    #[test]
    fn test_probabilities_in_unit_interval() {
        let mut params = BoltzmannMachine::new_seeded(4, 2, 2).expect("create").params();
        params.weights.fill(1e4);
        params.visible_bias.fill(-1e5);
        let mut bm = BoltzmannMachine::from_params_seeded(params, 3).expect("restore");
        for _ in 0..10 {
            bm.randomize_state();
            for i in 0..4 {
                let p = bm.probability_of_visible_on(i);
                assert!((0.0..=1.0).contains(&p));
            }
            for j in 0..2 {
                let p = bm.probability_of_hidden_on(j);
                assert!((0.0..=1.0).contains(&p));
            }
        }
    }

    #[test]
    fn test_update_state_stays_binary() {
        let mut bm = BoltzmannMachine::new_seeded(5, 4, 4).expect("create");
        bm.update_state(200);
        assert!(bm.visible().iter().all(|&x| x == 0.0 || x == 1.0));
        assert!(bm.hidden().iter().all(|&x| x == 0.0 || x == 1.0));
    }

    #[test]
    fn test_train_preserves_coupling_invariants() {
        let mut bm = BoltzmannMachine::new_seeded(6, 3, 5).expect("create");
        let data = binary_data(10, 6, 6);
        let report = bm.train(&data, &small_config()).expect("train");
        assert_eq!(report.epochs.len(), 5);
        assert_well_formed(&bm);
    }

    #[test]
    fn test_train_restores_lowest_energy_epoch() {
        let mut bm = BoltzmannMachine::new_seeded(4, 2, 7).expect("create");
        let data = binary_data(6, 4, 8);
        let report = bm.train(&data, &small_config()).expect("train");

        let mut argmin = 0;
        for (i, e) in report.epochs.iter().enumerate() {
            if e.avg_loss < report.epochs[argmin].avg_loss {
                argmin = i;
            }
        }
        assert_eq!(report.best_epoch, Some(argmin));
    }

    #[test]
    fn test_train_without_best_selection() {
        let mut bm = BoltzmannMachine::new_seeded(4, 2, 9).expect("create");
        let data = binary_data(6, 4, 10);
        let config = BoltzmannConfig {
            keep_best: false,
            ..small_config()
        };
        let report = bm.train(&data, &config).expect("train");
        assert!(report.best_epoch.is_none());
        assert_well_formed(&bm);
    }

    #[test]
    fn test_every_update_keeps_couplings_well_formed() {
        let mut bm = BoltzmannMachine::new_seeded(5, 4, 11).expect("create");
        let data = binary_data(8, 5, 12);
        let config = BoltzmannConfig {
            epochs: 1,
            keep_best: false,
            optimizer: Optimizer::Momentum {
                learning_rate: 0.2,
                momentum: 0.5,
            },
            ..small_config()
        };
        for _ in 0..6 {
            let before = bm.params();
            bm.train(&data, &config).expect("train");
            assert_ne!(bm.params(), before);
            assert_well_formed(&bm);
        }
    }

    #[test]
    fn test_train_rejects_bad_input() {
        let mut bm = BoltzmannMachine::new_seeded(4, 2, 11).expect("create");
        let data = binary_data(6, 3, 12);
        assert!(matches!(
            bm.train(&data, &small_config()),
            Err(EbmError::ShapeMismatch(_))
        ));
        let config = BoltzmannConfig {
            sample_steps: 0,
            ..small_config()
        };
        assert!(matches!(
            bm.train(&binary_data(6, 4, 12), &config),
            Err(EbmError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_fully_visible_machine() {
        let mut bm = BoltzmannMachine::new_seeded(5, 0, 13).expect("create");
        let data = binary_data(8, 5, 14);
        bm.train(&data, &small_config()).expect("train");
        bm.update_state(50);
        assert_eq!(bm.hidden().len(), 0);
        assert!(bm.energy().is_finite());
    }

    #[test]
    fn test_seeded_training_is_reproducible() {
        let data = binary_data(8, 4, 15);
        let mut a = BoltzmannMachine::new_seeded(4, 2, 16).expect("create");
        let mut b = BoltzmannMachine::new_seeded(4, 2, 16).expect("create");
        a.train(&data, &small_config()).expect("train");
        b.train(&data, &small_config()).expect("train");
        assert_eq!(a.params(), b.params());
    }

    #[test]
    fn test_from_params_rejects_mismatch() {
        let mut params = BoltzmannMachine::new_seeded(3, 2, 17).expect("create").params();
        params.weights = Array2::zeros((2, 3));
        assert!(matches!(
            BoltzmannMachine::from_params(params),
            Err(EbmError::ShapeMismatch(_))
        ));
    }
}
