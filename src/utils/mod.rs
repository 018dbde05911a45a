//! Numeric primitives shared by all models.
//!
//! Sigmoid and softplus nonlinearities, Bernoulli and Gaussian sampling,
//! and the small matrix helpers used to keep coupling matrices well formed.

use crate::core::{EbmError, EbmResult};
use crate::GaussianInit;
use ndarray::{Array, Array1, Array2, ArrayBase, Axis, Data, DataMut, Dimension, Ix1, ShapeBuilder};
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand::Rng;

/// Logistic sigmoid: σ(x) = 1 / (1 + e^{-x}).
///
/// Saturates to exactly 0.0 or 1.0 for large |x|; never NaN for finite input.
#[inline]
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Apply the sigmoid elementwise, in parallel over the array.
pub fn sigmoid_inplace<S, D>(x: &mut ArrayBase<S, D>)
where
    S: DataMut<Elem = f64>,
    D: Dimension,
{
    x.par_mapv_inplace(sigmoid);
}

/// Numerically stable softplus: log(1 + e^x).
#[inline]
pub fn softplus(x: f64) -> f64 {
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}

/// Draw one Bernoulli sample per element: 1.0 with probability `p`, else 0.0.
pub fn bernoulli_sample<S, D, R>(probs: &ArrayBase<S, D>, rng: &mut R) -> Array<f64, D>
where
    S: Data<Elem = f64>,
    D: Dimension,
    R: Rng + ?Sized,
{
    probs.map(|&p| if rng.gen::<f64>() < p { 1.0 } else { 0.0 })
}

/// Fill an array of the given shape from N(mean, std).
///
/// # Errors
/// `InvalidConfig` if the mean or standard deviation is not finite, or the
/// standard deviation is negative.
pub fn gaussian_array<Sh, D, R>(
    shape: Sh,
    init: &GaussianInit,
    rng: &mut R,
) -> EbmResult<Array<f64, D>>
where
    Sh: ShapeBuilder<Dim = D>,
    D: Dimension,
    R: Rng + ?Sized,
{
    if !(init.mean.is_finite() && init.std.is_finite()) || init.std < 0.0 {
        return Err(EbmError::InvalidConfig(format!(
            "Gaussian init needs finite mean and std >= 0, got mean={}, std={}",
            init.mean, init.std
        )));
    }
    let dist = Normal::new(init.mean, init.std).map_err(|e| {
        EbmError::InvalidConfig(format!(
            "Gaussian init (mean={}, std={}): {e}",
            init.mean, init.std
        ))
    })?;
    Ok(Array::random_using(shape, dist, rng))
}

/// `n` independent fair {0, 1} units.
pub fn random_binary<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Array1<f64> {
    Array1::from_shape_fn(n, |_| if rng.gen_bool(0.5) { 1.0 } else { 0.0 })
}

/// `n` independent fair {-1, +1} units.
pub fn random_bipolar<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Array1<f64> {
    Array1::from_shape_fn(n, |_| if rng.gen_bool(0.5) { 1.0 } else { -1.0 })
}

/// Outer product `a ⊗ b`, shape `(a.len(), b.len())`.
pub fn outer<S1, S2>(a: &ArrayBase<S1, Ix1>, b: &ArrayBase<S2, Ix1>) -> Array2<f64>
where
    S1: Data<Elem = f64>,
    S2: Data<Elem = f64>,
{
    let col = a.view().insert_axis(Axis(1));
    let row = b.view().insert_axis(Axis(0));
    &col * &row
}

/// Force a square coupling matrix to have no self-interaction.
pub fn zero_diagonal(m: &mut Array2<f64>) {
    m.diag_mut().fill(0.0);
}

/// Replace `m` by `(m + mᵗ) / 2`.
pub fn symmetrize(m: &mut Array2<f64>) {
    let sym = (&*m + &m.t()) * 0.5;
    m.assign(&sym);
}

/// True when `m` is square and `|m[i,j] - m[j,i]| <= tol` everywhere.
pub fn is_symmetric(m: &Array2<f64>, tol: f64) -> bool {
    if !m.is_square() {
        return false;
    }
    let n = m.nrows();
    (0..n).all(|i| (i + 1..n).all(|j| (m[[i, j]] - m[[j, i]]).abs() <= tol))
}

/// Min-max scale into [0, 1]. A constant matrix maps to zeros.
pub fn normalize(m: &Array2<f64>) -> Array2<f64> {
    let min = m.iter().copied().fold(f64::INFINITY, f64::min);
    let max = m.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if range > 0.0 {
        m.mapv(|x| (x - min) / range)
    } else {
        Array2::zeros(m.dim())
    }
}

/// Mean of squared elementwise differences.
pub fn mean_squared_error(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
    (a - b).mapv(|d| d * d).mean().unwrap_or(0.0)
}
