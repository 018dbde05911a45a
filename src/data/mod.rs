//! Training data ingestion.
//!
//! Matrices come from `.npy` files (any of the common numpy dtypes) or from
//! plain text, one row per line. Every loader returns `Array2<f64>` with one
//! row per sample.

use crate::core::{EbmError, EbmResult};
use ndarray::Array2;
use ndarray_npy::{ReadNpyError, ReadNpyExt, ReadableElement};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::info;

/// Load a 2-D `.npy` array of `f64`, `f32`, `i16`, `i32`, `u8` or `bool`.
///
/// Each dtype is tried in turn until one matches the file header.
///
/// # Errors
/// `Npy` if the file is not 2-D or is malformed, `InvalidConfig` for any
/// other dtype.
pub fn load_npy<P: AsRef<Path>>(path: P) -> EbmResult<Array2<f64>> {
    let path = path.as_ref();
    let data = if let Some(data) = read_npy_as::<f64>(path, |x| x)? {
        data
    } else if let Some(data) = read_npy_as::<f32>(path, f64::from)? {
        data
    } else if let Some(data) = read_npy_as::<i16>(path, f64::from)? {
        data
    } else if let Some(data) = read_npy_as::<i32>(path, f64::from)? {
        data
    } else if let Some(data) = read_npy_as::<u8>(path, f64::from)? {
        data
    } else if let Some(data) = read_npy_as::<bool>(path, |b| if b { 1.0 } else { 0.0 })? {
        data
    } else {
        return Err(EbmError::InvalidConfig(format!(
            "{}: unsupported numpy dtype",
            path.display()
        )));
    };

    info!(path = %path.display(), rows = data.nrows(), cols = data.ncols(), "Loaded npy");
    Ok(data)
}

/// Read as `T`; `Ok(None)` when the file holds a different dtype.
fn read_npy_as<T>(path: &Path, convert: impl Fn(T) -> f64) -> EbmResult<Option<Array2<f64>>>
where
    T: ReadableElement + Copy,
{
    let reader = BufReader::new(File::open(path)?);
    match Array2::<T>::read_npy(reader) {
        Ok(arr) => Ok(Some(arr.mapv(convert))),
        Err(ReadNpyError::WrongDescriptor(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Parse a text matrix: one row per line, values separated by whitespace or
/// commas. Blank lines and `#` comments are skipped.
///
/// # Errors
/// `Parse` on a non-numeric value or an empty file, `ShapeMismatch` on ragged rows.
pub fn parse_text_matrix(text: &str) -> EbmResult<Array2<f64>> {
    let mut values = Vec::new();
    let mut cols = None;
    let mut rows = 0;

    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let before = values.len();
        for token in line.split(|c: char| c.is_whitespace() || c == ',') {
            if token.is_empty() {
                continue;
            }
            let value: f64 = token.parse().map_err(|_| {
                EbmError::Parse(format!("Line {}: invalid value {token:?}", line_no + 1))
            })?;
            values.push(value);
        }
        let width = values.len() - before;
        match cols {
            None => cols = Some(width),
            Some(expected) if expected != width => {
                return Err(EbmError::ShapeMismatch(format!(
                    "Line {}: expected {expected} values, got {width}",
                    line_no + 1
                )));
            }
            Some(_) => {}
        }
        rows += 1;
    }

    let cols = cols.ok_or_else(|| EbmError::Parse("Matrix has no rows".to_string()))?;
    Array2::from_shape_vec((rows, cols), values)
        .map_err(|e| EbmError::ShapeMismatch(e.to_string()))
}

pub fn load_text_matrix<P: AsRef<Path>>(path: P) -> EbmResult<Array2<f64>> {
    let path = path.as_ref();
    let data = parse_text_matrix(&std::fs::read_to_string(path)?)?;
    info!(path = %path.display(), rows = data.nrows(), cols = data.ncols(), "Loaded text matrix");
    Ok(data)
}

/// `.npy` files through [`load_npy`], anything else as a text matrix.
pub fn load_matrix<P: AsRef<Path>>(path: P) -> EbmResult<Array2<f64>> {
    let path = path.as_ref();
    let is_npy = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("npy"));
    if is_npy {
        load_npy(path)
    } else {
        load_text_matrix(path)
    }
}

/// Map {0, 1} data onto {-1, +1}: `2x - 1`.
pub fn to_bipolar(data: &Array2<f64>) -> Array2<f64> {
    data.mapv(|x| 2.0 * x - 1.0)
}

/// 1.0 where a value exceeds `threshold`, else 0.0.
pub fn binarize(data: &Array2<f64>, threshold: f64) -> Array2<f64> {
    data.mapv(|x| if x > threshold { 1.0 } else { 0.0 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;
    use ndarray_npy::write_npy;

    #[test]
    fn test_load_npy_int16() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("patterns.npy");
        let raw: Array2<i16> = arr2(&[[0, 1, 1], [1, 0, 0]]);
        write_npy(&path, &raw).expect("write npy");
        let data = load_npy(&path).expect("load");
        assert_eq!(data, arr2(&[[0.0, 1.0, 1.0], [1.0, 0.0, 0.0]]));
    }

    #[test]
    fn test_load_npy_float_and_bool() {
        let dir = tempfile::tempdir().expect("tempdir");

        let f32_path = dir.path().join("f32.npy");
        write_npy(&f32_path, &arr2(&[[0.5f32, 0.25]])).expect("write npy");
        assert_eq!(load_npy(&f32_path).expect("load"), arr2(&[[0.5, 0.25]]));

        let bool_path = dir.path().join("bool.npy");
        write_npy(&bool_path, &arr2(&[[true, false], [false, true]])).expect("write npy");
        assert_eq!(
            load_matrix(&bool_path).expect("load"),
            arr2(&[[1.0, 0.0], [0.0, 1.0]])
        );
    }

    #[test]
    fn test_load_npy_rejects_one_dimensional() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("vector.npy");
        write_npy(&path, &ndarray::arr1(&[1.0f64, 2.0])).expect("write npy");
        assert!(load_npy(&path).is_err());
    }

    #[test]
    fn test_parse_text_matrix() {
        let text = "# two samples\n1 0 1\n\n0,1, 0\n";
        assert_eq!(
            parse_text_matrix(text).expect("parse"),
            arr2(&[[1.0, 0.0, 1.0], [0.0, 1.0, 0.0]])
        );
    }

    #[test]
    fn test_parse_text_matrix_errors() {
        assert!(matches!(
            parse_text_matrix("1 0\n1\n"),
            Err(EbmError::ShapeMismatch(_))
        ));
        assert!(matches!(
            parse_text_matrix("1 a\n"),
            Err(EbmError::Parse(_))
        ));
        assert!(matches!(parse_text_matrix("\n# nothing\n"), Err(EbmError::Parse(_))));
    }

    #[test]
    fn test_load_text_matrix_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("data.txt");
        std::fs::write(&path, "1 -1\n-1 1\n").expect("write");
        assert_eq!(
            load_matrix(&path).expect("load"),
            arr2(&[[1.0, -1.0], [-1.0, 1.0]])
        );
    }

    #[test]
    fn test_rescaling() {
        let data = arr2(&[[0.0, 1.0], [0.2, 0.8]]);
        assert_eq!(to_bipolar(&binarize(&data, 0.5)), arr2(&[[-1.0, 1.0], [-1.0, 1.0]]));
    }
}
