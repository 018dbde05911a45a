//! Integration tests for the energy-based models.
//!
//! These tests verify end-to-end behavior:
//! - Hopfield memories recall stored patterns as stable low-energy states
//! - Boltzmann training keeps the coupling invariants and selects the best epoch
//! - RBM training produces well-shaped parameters and finite losses
//! - Models survive a save/load round trip and can be rendered

use approx::{assert_abs_diff_eq, assert_relative_eq};
use boltzmann::checkpoint::{load_model, save_model, Checkpoint, ModelKind};
use boltzmann::data::{load_matrix, to_bipolar};
use boltzmann::render::{save_state_png, StateDomain};
use boltzmann::utils::is_symmetric;
use boltzmann::{
    model_rng, BoltzmannConfig, BoltzmannMachine, EnergyModel, HopfieldNetwork, Optimizer,
    RbmConfig, RestrictedBoltzmannMachine,
};
use ndarray::{arr1, arr2, Array2};
use rand::Rng;

/// Random {0, 1} matrix from a fixed seed.
fn binary_data(rows: usize, cols: usize, seed: u64) -> Array2<f64> {
    let mut rng = model_rng(Some(seed));
    Array2::from_shape_fn((rows, cols), |_| if rng.gen_bool(0.5) { 1.0 } else { 0.0 })
}

#[test]
fn test_hopfield_orthogonal_patterns() {
    let patterns = arr2(&[[1.0, 1.0, -1.0, -1.0], [1.0, -1.0, 1.0, -1.0]]);
    let mut net = HopfieldNetwork::from_patterns_seeded(&patterns, 1).expect("create network");

    let w = net.weights();
    assert!(is_symmetric(w, 0.0));
    assert!(w.diag().iter().all(|&x| x == 0.0));

    for pattern in patterns.rows() {
        let stored = pattern.to_owned();
        net.set_state(&stored).expect("set state");
        assert!(net.is_stable());
        assert_abs_diff_eq!(net.energy(), -2.0, epsilon = 1e-12);

        net.update_state(10);
        assert_eq!(net.state(), &stored);
        assert_abs_diff_eq!(net.energy(), -2.0, epsilon = 1e-12);
    }
}

#[test]
fn test_hopfield_recalls_corrupted_cue() {
    let patterns = to_bipolar(&binary_data(2, 100, 7));
    let mut net = HopfieldNetwork::from_patterns_seeded(&patterns, 8).expect("create network");

    let stored = patterns.row(0).to_owned();
    let mut cue = stored.clone();
    for i in (0..100).step_by(10) {
        cue[i] = -cue[i];
    }
    net.set_state(&cue).expect("set state");
    let start = net.energy();

    net.update_state(2000);
    assert_eq!(net.state(), &stored);
    assert!(net.energy() < start);
}

#[test]
fn test_boltzmann_training_keeps_invariants() {
    let data = arr2(&[
        [1.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 1.0],
        [1.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 1.0],
    ]);
    let mut bm = BoltzmannMachine::new_seeded(4, 3, 11).expect("create machine");
    let config = BoltzmannConfig {
        epochs: 8,
        sample_steps: 50,
        updates_per_sample: 2,
        optimizer: Optimizer::Momentum {
            learning_rate: 0.05,
            momentum: 0.5,
        },
        keep_best: true,
    };
    let report = bm.train(&data, &config).expect("train");

    assert_eq!(report.epochs.len(), 8);
    let argmin = report
        .epochs
        .iter()
        .enumerate()
        .fold((0, f64::INFINITY), |best, (i, e)| {
            if e.avg_loss < best.1 {
                (i, e.avg_loss)
            } else {
                best
            }
        })
        .0;
    assert_eq!(report.best_epoch, Some(argmin));

    for couplings in [bm.visible_couplings(), bm.hidden_couplings()] {
        assert!(is_symmetric(couplings, 1e-12));
        assert!(couplings.diag().iter().all(|&x| x == 0.0));
    }

    bm.randomize_state();
    bm.update_state(100);
    assert!(bm.visible().iter().all(|&x| x == 0.0 || x == 1.0));
    assert!(bm.energy().is_finite());
}

#[test]
fn test_rbm_single_epoch() {
    let data = binary_data(8, 4, 21);
    let mut rbm = RestrictedBoltzmannMachine::new_seeded(4, 2, 22).expect("create rbm");
    let config = RbmConfig {
        epochs: 1,
        batch_size: 4,
        cd_steps: 1,
        ..RbmConfig::default()
    };
    let report = rbm.train(&data, &config).expect("train");

    let params = rbm.params();
    assert_eq!(params.weights.dim(), (4, 2));
    assert_eq!(params.visible_bias.len(), 4);
    assert_eq!(params.hidden_bias.len(), 2);

    assert_eq!(report.epochs.len(), 1);
    assert_eq!(report.num_batches(), 2);
    let total = report.total_loss();
    assert!(total.is_finite());
    assert!(total >= 0.0);
}

#[test]
fn test_rbm_mean_free_energy_matches_rows() {
    let data = binary_data(17, 9, 31);
    let rbm = RestrictedBoltzmannMachine::new_seeded(9, 4, 32).expect("create rbm");
    let mean = rbm.mean_free_energy(&data).expect("free energy");
    let expected = data
        .rows()
        .into_iter()
        .map(|row| rbm.free_energy_of(row))
        .sum::<f64>()
        / 17.0;
    assert_relative_eq!(mean, expected, max_relative = 1e-12);
}

#[test]
fn test_persistence_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let data = binary_data(16, 6, 41);

    let mut rbm = RestrictedBoltzmannMachine::new_seeded(6, 3, 42).expect("create rbm");
    let config = RbmConfig {
        epochs: 3,
        batch_size: 4,
        ..RbmConfig::default()
    };
    rbm.train(&data, &config).expect("train");

    for name in ["rbm.txt", "rbm.json"] {
        let path = dir.path().join(name);
        save_model(&rbm.params().into(), &path).expect("save");
        let Checkpoint::Rbm(params) = load_model(&path, ModelKind::Rbm).expect("load") else {
            panic!("expected an RBM checkpoint from {name}");
        };
        assert_eq!(params, rbm.params());

        let restored = RestrictedBoltzmannMachine::from_params_seeded(params, 43).expect("rebuild");
        assert_eq!(
            restored.mean_free_energy(&data).expect("free energy"),
            rbm.mean_free_energy(&data).expect("free energy")
        );
    }

    let bm = BoltzmannMachine::new_seeded(4, 2, 44).expect("create machine");
    let path = dir.path().join("bm.txt");
    save_model(&bm.params().into(), &path).expect("save");
    assert_eq!(
        load_model(&path, ModelKind::Boltzmann).expect("load"),
        Checkpoint::Boltzmann(bm.params())
    );
}

#[test]
fn test_train_save_and_render_frames() {
    let dir = tempfile::tempdir().expect("tempdir");
    let data_path = dir.path().join("patterns.txt");
    std::fs::write(
        &data_path,
        "1 0 0 1\n0 1 1 0\n1 0 0 1\n0 1 1 0\n",
    )
    .expect("write data");

    let data = load_matrix(&data_path).expect("load data");
    let net = HopfieldNetwork::from_patterns_seeded(&to_bipolar(&data), 51).expect("encode");
    let model_path = dir.path().join("hopfield.txt");
    save_model(&net.params().into(), &model_path).expect("save");

    let Checkpoint::Hopfield(params) =
        load_model(&model_path, ModelKind::Hopfield).expect("load")
    else {
        panic!("expected a Hopfield checkpoint");
    };
    let mut restored = HopfieldNetwork::from_params_seeded(params, 52).expect("rebuild");
    restored.randomize_state();

    let mut previous = restored.energy();
    for frame in 0..5 {
        restored.update_state(3);
        let current = restored.energy();
        assert!(current <= previous + 1e-12);
        previous = current;

        let frame_path = dir.path().join(format!("output{frame}.png"));
        save_state_png(restored.visible_state(), StateDomain::Bipolar, &frame_path)
            .expect("render frame");
        assert!(frame_path.exists());
    }

    let cue = arr1(&[1.0, -1.0, -1.0, 1.0]);
    restored.set_state(&cue).expect("set state");
    assert!(restored.is_stable());
}
