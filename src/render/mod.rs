//! PNG rendering of unit states, weight matrices and RBM filters.
//!
//! States of N units are drawn as √N×√N images, so N must be a perfect square.
//! Unit values are first mapped onto [0, 1] according to their domain, then
//! blended per channel between the two palette colours.

use crate::core::{EbmError, EbmResult};
use crate::utils::normalize;
use image::{GrayImage, Luma, Rgb, RgbImage};
use ndarray::{s, Array2, ArrayView1};
use std::path::Path;
use tracing::debug;

/// Palette for rendered states
pub mod colors {
    use image::Rgb;

    /// Unit off (0 or -1)
    pub const OFF: Rgb<u8> = Rgb([240, 150, 50]);
    /// Unit on (+1)
    pub const ON: Rgb<u8> = Rgb([20, 40, 105]);
}

/// Value range of the units being drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateDomain {
    /// {0, 1}
    Binary,
    /// {-1, +1}
    Bipolar,
}

impl StateDomain {
    /// Map a unit value onto [0, 1].
    pub fn to_unit(self, x: f64) -> f64 {
        let v = match self {
            StateDomain::Binary => x,
            StateDomain::Bipolar => (x + 1.0) / 2.0,
        };
        v.clamp(0.0, 1.0)
    }
}

/// Blend between [`colors::OFF`] (v = 0) and [`colors::ON`] (v = 1).
pub fn palette(v: f64) -> Rgb<u8> {
    let v = v.clamp(0.0, 1.0);
    let channel = |i: usize| {
        let (c0, c1) = (f64::from(colors::OFF.0[i]), f64::from(colors::ON.0[i]));
        (c0 + (c1 - c0) * v).round() as u8
    };
    Rgb([channel(0), channel(1), channel(2)])
}

fn square_side(n: usize) -> Option<usize> {
    let side = (n as f64).sqrt().round() as usize;
    (side * side == n).then_some(side)
}

/// Reshape N values row-major into a √N×√N matrix.
///
/// # Errors
/// `ShapeMismatch` when N is not a perfect square.
pub fn reshape_square(state: ArrayView1<'_, f64>) -> EbmResult<Array2<f64>> {
    let n = state.len();
    let side = square_side(n).ok_or_else(|| {
        EbmError::ShapeMismatch(format!("Cannot draw {n} units as a square image"))
    })?;
    Array2::from_shape_vec((side, side), state.to_vec())
        .map_err(|e| EbmError::ShapeMismatch(e.to_string()))
}

pub fn state_image(state: ArrayView1<'_, f64>, domain: StateDomain) -> EbmResult<RgbImage> {
    let grid = reshape_square(state)?;
    let (rows, cols) = grid.dim();
    Ok(RgbImage::from_fn(cols as u32, rows as u32, |x, y| {
        palette(domain.to_unit(grid[[y as usize, x as usize]]))
    }))
}

/// Draw a unit state as a square PNG.
pub fn save_state_png<P: AsRef<Path>>(
    state: ArrayView1<'_, f64>,
    domain: StateDomain,
    path: P,
) -> EbmResult<()> {
    let path = path.as_ref();
    state_image(state, domain)?.save(path)?;
    debug!(path = %path.display(), "Saved state image");
    Ok(())
}

/// Grey levels for a matrix whose values already lie in [0, 1].
fn grey_image(values: &Array2<f64>) -> GrayImage {
    let (rows, cols) = values.dim();
    GrayImage::from_fn(cols as u32, rows as u32, |x, y| {
        let v = values[[y as usize, x as usize]].clamp(0.0, 1.0);
        Luma([(v * 255.0).round() as u8])
    })
}

/// Min-max normalized greyscale image of a matrix, one pixel per entry.
pub fn weights_image(matrix: &Array2<f64>) -> GrayImage {
    grey_image(&normalize(matrix))
}

pub fn save_weights_png<P: AsRef<Path>>(matrix: &Array2<f64>, path: P) -> EbmResult<()> {
    let path = path.as_ref();
    weights_image(matrix).save(path)?;
    debug!(
        path = %path.display(),
        rows = matrix.nrows(),
        cols = matrix.ncols(),
        "Saved weight image"
    );
    Ok(())
}

/// Tile the receptive field of every hidden unit into one mosaic.
///
/// `weights` is V×H. Column j is reshaped to √V×√V, normalized on its own,
/// and placed at tile `(j / g, j % g)` of a g×g grid with `g = ⌈√H⌉`.
/// Unused tiles stay 0.
///
/// # Errors
/// `ShapeMismatch` when V is not a perfect square.
pub fn tile_filters(weights: &Array2<f64>) -> EbmResult<Array2<f64>> {
    let (visible, hidden) = weights.dim();
    let side = square_side(visible).ok_or_else(|| {
        EbmError::ShapeMismatch(format!(
            "Cannot draw filters of {visible} visible units as square tiles"
        ))
    })?;
    let grid = (hidden as f64).sqrt().ceil() as usize;
    let mut mosaic = Array2::zeros((grid * side, grid * side));

    for (j, column) in weights.columns().into_iter().enumerate() {
        let filter = normalize(&reshape_square(column)?);
        let (row, col) = (j / grid * side, j % grid * side);
        mosaic
            .slice_mut(s![row..row + side, col..col + side])
            .assign(&filter);
    }
    Ok(mosaic)
}

pub fn save_filters_png<P: AsRef<Path>>(weights: &Array2<f64>, path: P) -> EbmResult<()> {
    let path = path.as_ref();
    grey_image(&tile_filters(weights)?).save(path)?;
    debug!(path = %path.display(), filters = weights.ncols(), "Saved filter mosaic");
    Ok(())
}
