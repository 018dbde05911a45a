//! Training metrics, batching helpers and model selection.
//!
//! Both Boltzmann machines train through their own `train` method; this module
//! holds what those loops share:
//!
//! 1. **Metrics** (`EpochMetrics`, `TrainingReport`): per-epoch loss and
//!    per-batch loss progression returned to the caller
//! 2. **Batching** (`validate_data`, `shuffle_indices`, `extract_batch`):
//!    dimension checks and index-mapped mini-batch extraction
//! 3. **Model selection** (`BestCheckpoint`): keep the lowest-energy parameter
//!    set seen across epochs and hand it back at the end

use crate::core::{EbmError, EbmResult};
use ndarray::{Array2, Axis};
use rand::seq::SliceRandom;
use rand::Rng;

/// Training statistics for one epoch.
#[derive(Debug, Clone)]
pub struct EpochMetrics {
    /// Zero-based epoch index
    pub epoch: usize,
    /// Average loss across batches (energy for the general Boltzmann machine,
    /// reconstruction error for the RBM)
    pub avg_loss: f64,
    /// Number of batches processed
    pub num_batches: usize,
    /// Total samples processed
    pub num_samples: usize,
    /// Per-batch loss progression
    pub batch_losses: Vec<f64>,
}

/// Everything a `train` call reports back.
#[derive(Debug, Clone, Default)]
pub struct TrainingReport {
    /// One entry per completed epoch, in order
    pub epochs: Vec<EpochMetrics>,
    /// Epoch whose parameters were kept, when best-checkpoint selection ran
    pub best_epoch: Option<usize>,
}

impl TrainingReport {
    /// Sum of every batch loss across all epochs.
    pub fn total_loss(&self) -> f64 {
        self.epochs
            .iter()
            .flat_map(|e| e.batch_losses.iter())
            .sum()
    }

    /// Average loss of the last epoch, if any epoch ran.
    pub fn final_loss(&self) -> Option<f64> {
        self.epochs.last().map(|e| e.avg_loss)
    }

    pub fn num_batches(&self) -> usize {
        self.epochs.iter().map(|e| e.num_batches).sum()
    }
}

/// Lowest-score parameter snapshot seen so far.
///
/// Scores are compared with `<`, so the earliest of equal scores wins.
#[derive(Debug, Clone)]
pub struct BestCheckpoint<T> {
    best: Option<(usize, f64, T)>,
}

impl<T: Clone> BestCheckpoint<T> {
    pub fn new() -> Self {
        Self { best: None }
    }

    /// Record `params` if `score` beats everything seen. Returns true when kept.
    pub fn observe(&mut self, epoch: usize, score: f64, params: &T) -> bool {
        let improves = match &self.best {
            None => !score.is_nan(),
            Some((_, best, _)) => score < *best,
        };
        if improves {
            self.best = Some((epoch, score, params.clone()));
        }
        improves
    }

    pub fn best_score(&self) -> Option<f64> {
        self.best.as_ref().map(|(_, score, _)| *score)
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best.as_ref().map(|(epoch, _, _)| *epoch)
    }

    /// Consume the tracker, yielding `(epoch, score, params)` of the best entry.
    pub fn into_best(self) -> Option<(usize, f64, T)> {
        self.best
    }
}

impl<T: Clone> Default for BestCheckpoint<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Shared Helpers
// ============================================================================

/// Validate that a training matrix is non-empty and has one column per visible unit.
pub fn validate_data(data: &Array2<f64>, visible: usize) -> EbmResult<()> {
    if data.ncols() != visible {
        return Err(EbmError::ShapeMismatch(format!(
            "Data columns: expected {}, got {}",
            visible,
            data.ncols()
        )));
    }
    if data.nrows() == 0 {
        return Err(EbmError::InvalidConfig(
            "Training data has no rows".to_string(),
        ));
    }
    Ok(())
}

/// Shuffle indices in place with the model's generator.
pub fn shuffle_indices<R: Rng + ?Sized>(indices: &mut [usize], rng: &mut R) {
    indices.shuffle(rng);
}

/// Extract a mini-batch from the full dataset using index mapping.
pub fn extract_batch(data: &Array2<f64>, indices: &[usize]) -> Array2<f64> {
    data.select(Axis(0), indices)
}

/// Number of full batches in `rows` rows; the remainder is dropped.
pub fn full_batches(rows: usize, batch_size: usize) -> (usize, usize) {
    (rows / batch_size, rows % batch_size)
}
