//! Model persistence.
//!
//! Two on-disk forms:
//!
//! - **JSON checkpoints**: a [`Checkpoint`] tagged by `"model"`, written with
//!   `serde_json`. Floats round-trip bit for bit.
//! - **Plain text**: whitespace-separated numbers with a size header, one
//!   layout per model:
//!   ```text
//!   Hopfield:   N           then W (N rows of N)
//!   Boltzmann:  V H         then A (V×V), B (H×H), W (V×H), a (V), b (H)
//!   RBM:        H V         then W (V×H), c (V), b (H)
//!   ```
//!
//! Loading returns parameters only; unit state is re-randomized when the
//! parameters are turned back into a model.

use crate::boltzmann::BoltzmannParams;
use crate::core::{EbmError, EbmResult};
use crate::hopfield::HopfieldParams;
use crate::rbm::RbmParams;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tracing::info;

/// Which model a file holds. Needed to read the untagged text format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Hopfield,
    Boltzmann,
    Rbm,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Hopfield => "hopfield",
            ModelKind::Boltzmann => "boltzmann",
            ModelKind::Rbm => "rbm",
        }
    }
}

impl Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted parameters of any model in the crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum Checkpoint {
    Hopfield(HopfieldParams),
    Boltzmann(BoltzmannParams),
    Rbm(RbmParams),
}

impl Checkpoint {
    pub fn kind(&self) -> ModelKind {
        match self {
            Checkpoint::Hopfield(_) => ModelKind::Hopfield,
            Checkpoint::Boltzmann(_) => ModelKind::Boltzmann,
            Checkpoint::Rbm(_) => ModelKind::Rbm,
        }
    }
}

impl From<HopfieldParams> for Checkpoint {
    fn from(params: HopfieldParams) -> Self {
        Checkpoint::Hopfield(params)
    }
}

impl From<BoltzmannParams> for Checkpoint {
    fn from(params: BoltzmannParams) -> Self {
        Checkpoint::Boltzmann(params)
    }
}

impl From<RbmParams> for Checkpoint {
    fn from(params: RbmParams) -> Self {
        Checkpoint::Rbm(params)
    }
}

// ============================================================================
// JSON
// ============================================================================

/// Write a JSON checkpoint.
pub fn save_checkpoint<P: AsRef<Path>>(checkpoint: &Checkpoint, path: P) -> EbmResult<()> {
    let path = path.as_ref();
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, checkpoint)?;
    writer.flush()?;
    info!(model = %checkpoint.kind(), path = %path.display(), "Saved checkpoint");
    Ok(())
}

/// Read a JSON checkpoint.
pub fn load_checkpoint<P: AsRef<Path>>(path: P) -> EbmResult<Checkpoint> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let checkpoint: Checkpoint = serde_json::from_reader(reader)?;
    info!(model = %checkpoint.kind(), path = %path.display(), "Loaded checkpoint");
    Ok(checkpoint)
}

// ============================================================================
// Plain text
// ============================================================================

/// Render a checkpoint in the plain-text model format.
pub fn to_text(checkpoint: &Checkpoint) -> String {
    let mut out = String::new();
    match checkpoint {
        Checkpoint::Hopfield(p) => {
            out.push_str(&format!("{}\n", p.units));
            push_matrix(&mut out, &p.weights);
        }
        Checkpoint::Boltzmann(p) => {
            out.push_str(&format!("{} {}\n", p.visible, p.hidden));
            push_matrix(&mut out, &p.visible_couplings);
            push_matrix(&mut out, &p.hidden_couplings);
            push_matrix(&mut out, &p.weights);
            push_vector(&mut out, &p.visible_bias);
            push_vector(&mut out, &p.hidden_bias);
        }
        Checkpoint::Rbm(p) => {
            out.push_str(&format!("{} {}\n", p.hidden, p.visible));
            push_matrix(&mut out, &p.weights);
            push_vector(&mut out, &p.visible_bias);
            push_vector(&mut out, &p.hidden_bias);
        }
    }
    out
}

fn push_matrix(out: &mut String, m: &Array2<f64>) {
    for row in m.rows() {
        push_vector(out, row);
    }
}

fn push_vector<'a, I>(out: &mut String, values: I)
where
    I: IntoIterator<Item = &'a f64>,
{
    let line: Vec<String> = values.into_iter().map(|v| v.to_string()).collect();
    out.push_str(&line.join(" "));
    out.push('\n');
}

/// Parse the plain-text model format for the given kind.
///
/// Sizes come from the header, so any shortfall in values is a truncated file
/// and any value left over means the header disagrees with the body.
///
/// # Errors
/// `Parse` on a missing, surplus or non-numeric token.
pub fn from_text(text: &str, kind: ModelKind) -> EbmResult<Checkpoint> {
    let mut tokens = Tokens::new(text);
    let checkpoint = match kind {
        ModelKind::Hopfield => {
            let units = tokens.next_usize("unit count")?;
            let weights = tokens.matrix(units, units, "weights")?;
            Checkpoint::Hopfield(HopfieldParams { units, weights })
        }
        ModelKind::Boltzmann => {
            let visible = tokens.next_usize("visible count")?;
            let hidden = tokens.next_usize("hidden count")?;
            Checkpoint::Boltzmann(BoltzmannParams {
                visible,
                hidden,
                visible_couplings: tokens.matrix(visible, visible, "visible couplings")?,
                hidden_couplings: tokens.matrix(hidden, hidden, "hidden couplings")?,
                weights: tokens.matrix(visible, hidden, "weights")?,
                visible_bias: tokens.vector(visible, "visible bias")?,
                hidden_bias: tokens.vector(hidden, "hidden bias")?,
            })
        }
        ModelKind::Rbm => {
            let hidden = tokens.next_usize("hidden count")?;
            let visible = tokens.next_usize("visible count")?;
            Checkpoint::Rbm(RbmParams {
                visible,
                hidden,
                weights: tokens.matrix(visible, hidden, "weights")?,
                visible_bias: tokens.vector(visible, "visible bias")?,
                hidden_bias: tokens.vector(hidden, "hidden bias")?,
            })
        }
    };
    tokens.finish()?;
    Ok(checkpoint)
}

struct Tokens<'a> {
    inner: std::str::SplitWhitespace<'a>,
    consumed: usize,
}

impl<'a> Tokens<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            inner: text.split_whitespace(),
            consumed: 0,
        }
    }

    fn next_token(&mut self, field: &str) -> EbmResult<&'a str> {
        let token = self.inner.next().ok_or_else(|| {
            EbmError::Parse(format!(
                "Unexpected end of file reading {field} (after {} values)",
                self.consumed
            ))
        })?;
        self.consumed += 1;
        Ok(token)
    }

    fn finish(self) -> EbmResult<()> {
        let surplus = self.inner.count();
        if surplus > 0 {
            return Err(EbmError::Parse(format!(
                "{surplus} trailing values after the {} declared by the header",
                self.consumed
            )));
        }
        Ok(())
    }

    fn next_usize(&mut self, field: &str) -> EbmResult<usize> {
        let token = self.next_token(field)?;
        token
            .parse()
            .map_err(|_| EbmError::Parse(format!("Invalid {field}: {token:?}")))
    }

    fn next_f64(&mut self, field: &str) -> EbmResult<f64> {
        let token = self.next_token(field)?;
        token
            .parse()
            .map_err(|_| EbmError::Parse(format!("Invalid value in {field}: {token:?}")))
    }

    fn vector(&mut self, len: usize, field: &str) -> EbmResult<Array1<f64>> {
        let values = (0..len)
            .map(|_| self.next_f64(field))
            .collect::<EbmResult<Vec<_>>>()?;
        Ok(Array1::from(values))
    }

    fn matrix(&mut self, rows: usize, cols: usize, field: &str) -> EbmResult<Array2<f64>> {
        let len = rows
            .checked_mul(cols)
            .ok_or_else(|| EbmError::Parse(format!("{field}: size {rows}x{cols} overflows")))?;
        let values = (0..len)
            .map(|_| self.next_f64(field))
            .collect::<EbmResult<Vec<_>>>()?;
        Array2::from_shape_vec((rows, cols), values)
            .map_err(|e| EbmError::ShapeMismatch(format!("{field}: {e}")))
    }
}

// ============================================================================
// Format dispatch
// ============================================================================

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

/// Save in the format implied by the extension: `.json` as a JSON
/// checkpoint, anything else as plain text.
pub fn save_model<P: AsRef<Path>>(checkpoint: &Checkpoint, path: P) -> EbmResult<()> {
    let path = path.as_ref();
    if is_json(path) {
        return save_checkpoint(checkpoint, path);
    }
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(to_text(checkpoint).as_bytes())?;
    writer.flush()?;
    info!(model = %checkpoint.kind(), path = %path.display(), "Saved text model");
    Ok(())
}

/// Load from the format implied by the extension.
///
/// # Errors
/// `Parse` if a JSON checkpoint holds a different model than `kind`, or on a
/// malformed text file.
pub fn load_model<P: AsRef<Path>>(path: P, kind: ModelKind) -> EbmResult<Checkpoint> {
    let path = path.as_ref();
    if is_json(path) {
        let checkpoint = load_checkpoint(path)?;
        if checkpoint.kind() != kind {
            return Err(EbmError::Parse(format!(
                "{} holds a {} model, expected {kind}",
                path.display(),
                checkpoint.kind()
            )));
        }
        return Ok(checkpoint);
    }
    let text = std::fs::read_to_string(path)?;
    let checkpoint = from_text(&text, kind)?;
    info!(model = %kind, path = %path.display(), "Loaded text model");
    Ok(checkpoint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boltzmann::BoltzmannMachine;
    use crate::hopfield::HopfieldNetwork;
    use crate::rbm::RestrictedBoltzmannMachine;
    use ndarray::arr2;

    fn sample_checkpoints() -> Vec<Checkpoint> {
        let patterns = arr2(&[[1.0, -1.0, 1.0, -1.0], [1.0, 1.0, -1.0, -1.0]]);
        let hopfield = HopfieldNetwork::from_patterns_seeded(&patterns, 1).expect("hopfield");
        let bm = BoltzmannMachine::new_seeded(3, 2, 2).expect("boltzmann");
        let rbm = RestrictedBoltzmannMachine::new_seeded(5, 3, 3).expect("rbm");
        vec![
            hopfield.params().into(),
            bm.params().into(),
            rbm.params().into(),
        ]
    }

    #[test]
    fn test_json_round_trip_is_exact() {
        let dir = tempfile::tempdir().expect("tempdir");
        for checkpoint in sample_checkpoints() {
            let path = dir.path().join(format!("{}.json", checkpoint.kind()));
            save_checkpoint(&checkpoint, &path).expect("save");
            let loaded = load_checkpoint(&path).expect("load");
            assert_eq!(loaded, checkpoint);
        }
    }

    #[test]
    fn test_text_round_trip_is_exact() {
        let dir = tempfile::tempdir().expect("tempdir");
        for checkpoint in sample_checkpoints() {
            let path = dir.path().join(format!("{}.txt", checkpoint.kind()));
            save_model(&checkpoint, &path).expect("save");
            let loaded = load_model(&path, checkpoint.kind()).expect("load");
            assert_eq!(loaded, checkpoint);
        }
    }

    #[test]
    fn test_rbm_text_header_is_hidden_then_visible() {
        let rbm = RestrictedBoltzmannMachine::new_seeded(5, 3, 4).expect("rbm");
        let text = to_text(&rbm.params().into());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "3 5");
        // header, 5 weight rows, c, b
        assert_eq!(lines.len(), 1 + 5 + 2);
        assert_eq!(lines[1].split_whitespace().count(), 3);
    }

    #[test]
    fn test_hopfield_text_layout() {
        let text = "2\n0 0.5\n0.5 0\n";
        let checkpoint = from_text(text, ModelKind::Hopfield).expect("parse");
        match checkpoint {
            Checkpoint::Hopfield(p) => {
                assert_eq!(p.units, 2);
                assert_eq!(p.weights, arr2(&[[0.0, 0.5], [0.5, 0.0]]));
            }
            other => panic!("unexpected checkpoint {other:?}"),
        }
    }

    #[test]
    fn test_truncated_text_is_parse_error() {
        let checkpoint = &sample_checkpoints()[1];
        let text = to_text(checkpoint);
        let truncated = &text[..text.len() / 2];
        let cut_at_token = truncated.rsplit_once(char::is_whitespace).map_or("", |(head, _)| head);
        assert!(matches!(
            from_text(cut_at_token, ModelKind::Boltzmann),
            Err(EbmError::Parse(_))
        ));
        assert!(matches!(
            from_text("", ModelKind::Rbm),
            Err(EbmError::Parse(_))
        ));
    }

    #[test]
    fn test_non_numeric_token_is_parse_error() {
        assert!(matches!(
            from_text("2\n0 x\n1 0\n", ModelKind::Hopfield),
            Err(EbmError::Parse(_))
        ));
        assert!(matches!(
            from_text("two\n", ModelKind::Hopfield),
            Err(EbmError::Parse(_))
        ));
    }

    #[test]
    fn test_header_smaller_than_body_is_parse_error() {
        // 2-unit header over a 3x3 body
        assert!(matches!(
            from_text("2\n0 1 2\n1 0 3\n2 3 0\n", ModelKind::Hopfield),
            Err(EbmError::Parse(_))
        ));

        // header `1 2` over tensors written for H=2, V=3
        let rbm = RestrictedBoltzmannMachine::new_seeded(3, 2, 5).expect("rbm");
        let text = to_text(&rbm.params().into());
        let body = text.split_once('\n').map_or("", |(_, body)| body);
        assert!(matches!(
            from_text(&format!("1 2\n{body}"), ModelKind::Rbm),
            Err(EbmError::Parse(_))
        ));

        let bm = &sample_checkpoints()[1];
        let extra = format!("{}0\n", to_text(bm));
        assert!(matches!(
            from_text(&extra, ModelKind::Boltzmann),
            Err(EbmError::Parse(_))
        ));
    }

    #[test]
    fn test_json_kind_mismatch_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("model.json");
        save_model(&sample_checkpoints()[0], &path).expect("save");
        assert!(matches!(
            load_model(&path, ModelKind::Rbm),
            Err(EbmError::Parse(_))
        ));
    }

    #[test]
    fn test_loaded_params_rebuild_models() {
        for checkpoint in sample_checkpoints() {
            let text = to_text(&checkpoint);
            match from_text(&text, checkpoint.kind()).expect("parse") {
                Checkpoint::Hopfield(p) => {
                    HopfieldNetwork::from_params(p).expect("rebuild");
                }
                Checkpoint::Boltzmann(p) => {
                    BoltzmannMachine::from_params(p).expect("rebuild");
                }
                Checkpoint::Rbm(p) => {
                    RestrictedBoltzmannMachine::from_params(p).expect("rebuild");
                }
            }
        }
    }
}
