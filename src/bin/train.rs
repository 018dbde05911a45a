//! Boltzmann training and inference binary.
//!
//! Trains a Hopfield network, general Boltzmann machine or RBM on a binary
//! data matrix (`.npy` or text), saves the model and weight images, and can
//! replay a saved model as a sequence of PNG frames.
//! Optionally writes JSONL training metrics, one event per epoch.

use anyhow::{bail, Context, Result};
use boltzmann::checkpoint::{load_model, save_model, Checkpoint, ModelKind};
use boltzmann::data::{load_matrix, to_bipolar};
use boltzmann::render::{save_filters_png, save_state_png, save_weights_png, StateDomain};
use boltzmann::{
    BoltzmannConfig, BoltzmannMachine, EnergyModel, GaussianInit, HopfieldNetwork, Optimizer,
    RbmConfig, RestrictedBoltzmannMachine, TrainingReport,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "boltzmann-train",
    about = "Train energy-based models on binary data and render their samples"
)]
struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    model: ModelCommand,
}

#[derive(Subcommand, Debug)]
enum ModelCommand {
    /// Hebbian associative memory over bipolar units
    Hopfield {
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Fully connected Boltzmann machine with hidden units
    Boltzmann {
        #[command(flatten)]
        common: CommonArgs,

        /// Number of hidden units
        #[arg(long, default_value_t = 16)]
        hidden: usize,

        /// Number of training epochs
        #[arg(long, default_value_t = 100)]
        epochs: usize,

        /// Negative-phase samples per epoch
        #[arg(long, default_value_t = 1000)]
        sample_steps: usize,

        /// Single-unit updates between negative-phase samples
        #[arg(long, default_value_t = 1)]
        updates_per_sample: usize,

        /// Learning rate
        #[arg(long, default_value_t = 0.01)]
        learning_rate: f64,

        /// Momentum (0 = plain gradient ascent)
        #[arg(long, default_value_t = 0.0)]
        momentum: f64,

        /// Keep the final parameters instead of the lowest-energy epoch
        #[arg(long, default_value_t = false)]
        keep_last: bool,
    },
    /// Restricted Boltzmann machine trained with CD-k
    Rbm {
        #[command(flatten)]
        common: CommonArgs,

        /// Number of hidden units
        #[arg(long, default_value_t = 64)]
        hidden: usize,

        /// Number of training epochs
        #[arg(long, default_value_t = 10)]
        epochs: usize,

        /// Mini-batch size
        #[arg(long, default_value_t = 64)]
        batch_size: usize,

        /// Gibbs steps per negative phase (k)
        #[arg(long, default_value_t = 1)]
        cd_steps: usize,

        /// Learning rate
        #[arg(long, default_value_t = 0.05)]
        learning_rate: f64,

        /// Momentum (0 = plain gradient ascent)
        #[arg(long, default_value_t = 0.5)]
        momentum: f64,

        /// Standard deviation of the Gaussian initialization
        #[arg(long, default_value_t = 0.01)]
        init_std: f64,

        /// Keep row order fixed across epochs
        #[arg(long, default_value_t = false)]
        no_shuffle: bool,
    },
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Train a new model or replay a saved one
    #[arg(long, value_enum, default_value_t = Mode::Train)]
    mode: Mode,

    /// Training data (.npy or whitespace-separated text)
    #[arg(long)]
    data: Option<PathBuf>,

    /// Output name; writes NAME.txt (or NAME.json) and NAME.png
    #[arg(long, default_value = "model")]
    output: String,

    /// Save the model as a JSON checkpoint instead of plain text
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Model file to load (.json or text)
    #[arg(long)]
    load: Option<PathBuf>,

    /// Seed for a reproducible run
    #[arg(long)]
    seed: Option<u64>,

    /// Frames to render in inference mode
    #[arg(long, default_value_t = 150)]
    frames: usize,

    /// Sampling steps between rendered frames
    #[arg(long, default_value_t = 30)]
    steps_per_frame: usize,

    /// Directory for rendered frames
    #[arg(long, default_value = "inference")]
    inference_dir: PathBuf,

    /// Output metrics file (JSONL)
    #[arg(long)]
    metrics_file: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Train,
    Infer,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let (kind, common) = match &cli.model {
        ModelCommand::Hopfield { common } => (ModelKind::Hopfield, common),
        ModelCommand::Boltzmann { common, .. } => (ModelKind::Boltzmann, common),
        ModelCommand::Rbm { common, .. } => (ModelKind::Rbm, common),
    };

    match common.mode {
        Mode::Train => train(&cli.model, common),
        Mode::Infer => infer(kind, common),
    }
}

// ============================================================================
// Training
// ============================================================================

fn train(command: &ModelCommand, common: &CommonArgs) -> Result<()> {
    let data_path = common
        .data
        .as_ref()
        .context("--data is required in train mode")?;
    let data = load_matrix(data_path)
        .with_context(|| format!("Failed to load data from {}", data_path.display()))?;
    info!(rows = data.nrows(), cols = data.ncols(), "Training data");

    let mut metrics = MetricsLog::open(common.metrics_file.as_deref())?;
    let started = Instant::now();

    let checkpoint: Checkpoint = match command {
        ModelCommand::Hopfield { .. } => {
            let patterns = if data.iter().all(|&x| x >= 0.0) {
                to_bipolar(&data)
            } else {
                data
            };
            let net = match common.seed {
                Some(seed) => HopfieldNetwork::from_patterns_seeded(&patterns, seed)?,
                None => HopfieldNetwork::from_patterns(&patterns)?,
            };
            metrics.write(serde_json::json!({
                "type": "encoded",
                "model": "hopfield",
                "patterns": patterns.nrows(),
                "units": net.units(),
            }))?;
            net.params().into()
        }
        ModelCommand::Boltzmann {
            hidden,
            epochs,
            sample_steps,
            updates_per_sample,
            learning_rate,
            momentum,
            keep_last,
            ..
        } => {
            let mut bm = match load_for_training(common, ModelKind::Boltzmann)? {
                Some(Checkpoint::Boltzmann(params)) => match common.seed {
                    Some(seed) => BoltzmannMachine::from_params_seeded(params, seed)?,
                    None => BoltzmannMachine::from_params(params)?,
                },
                _ => match common.seed {
                    Some(seed) => BoltzmannMachine::new_seeded(data.ncols(), *hidden, seed)?,
                    None => BoltzmannMachine::new(data.ncols(), *hidden)?,
                },
            };
            let config = BoltzmannConfig {
                epochs: *epochs,
                sample_steps: *sample_steps,
                updates_per_sample: *updates_per_sample,
                optimizer: Optimizer::with_momentum(*learning_rate, *momentum),
                keep_best: !*keep_last,
            };
            let report = bm.train(&data, &config)?;
            metrics.write_report("boltzmann", &report)?;
            bm.params().into()
        }
        ModelCommand::Rbm {
            hidden,
            epochs,
            batch_size,
            cd_steps,
            learning_rate,
            momentum,
            init_std,
            no_shuffle,
            ..
        } => {
            let mut rbm = match load_for_training(common, ModelKind::Rbm)? {
                Some(Checkpoint::Rbm(params)) => match common.seed {
                    Some(seed) => RestrictedBoltzmannMachine::from_params_seeded(params, seed)?,
                    None => RestrictedBoltzmannMachine::from_params(params)?,
                },
                _ => match common.seed {
                    Some(seed) => {
                        RestrictedBoltzmannMachine::new_seeded(data.ncols(), *hidden, seed)?
                    }
                    None => RestrictedBoltzmannMachine::new(data.ncols(), *hidden)?,
                },
            };
            let init = GaussianInit {
                mean: 0.0,
                std: *init_std,
            };
            let config = RbmConfig {
                epochs: *epochs,
                batch_size: *batch_size,
                cd_steps: *cd_steps,
                optimizer: Optimizer::with_momentum(*learning_rate, *momentum),
                shuffle: !*no_shuffle,
                weight_init: init,
                visible_bias_init: init,
                hidden_bias_init: init,
            };
            let report = rbm.train(&data, &config)?;
            metrics.write_report("rbm", &report)?;
            rbm.params().into()
        }
    };

    let extension = if common.json { "json" } else { "txt" };
    let model_path = PathBuf::from(format!("{}.{extension}", common.output));
    save_model(&checkpoint, &model_path)
        .with_context(|| format!("Failed to save model to {}", model_path.display()))?;
    save_images(&checkpoint, &common.output)?;

    metrics.write(serde_json::json!({
        "type": "saved",
        "path": model_path.to_string_lossy(),
        "elapsed_secs": started.elapsed().as_secs_f32(),
    }))?;
    info!(path = %model_path.display(), "Training complete");
    Ok(())
}

fn load_for_training(common: &CommonArgs, kind: ModelKind) -> Result<Option<Checkpoint>> {
    match &common.load {
        Some(path) => {
            let checkpoint = load_model(path, kind)
                .with_context(|| format!("Failed to load model from {}", path.display()))?;
            Ok(Some(checkpoint))
        }
        None => Ok(None),
    }
}

fn save_images(checkpoint: &Checkpoint, output: &str) -> Result<()> {
    let weights_path = PathBuf::from(format!("{output}.png"));
    match checkpoint {
        Checkpoint::Hopfield(p) => save_weights_png(&p.weights, &weights_path)?,
        Checkpoint::Boltzmann(p) => {
            save_weights_png(&p.weights, &weights_path)?;
            save_weights_png(&p.visible_couplings, format!("{output}_visible.png"))?;
            if p.hidden > 0 {
                save_weights_png(&p.hidden_couplings, format!("{output}_hidden.png"))?;
            }
        }
        Checkpoint::Rbm(p) => {
            save_weights_png(&p.weights, &weights_path)?;
            let filters_path = format!("{output}_filters.png");
            if let Err(e) = save_filters_png(&p.weights, &filters_path) {
                warn!(error = %e, "Skipping filter mosaic");
            }
        }
    }
    info!(path = %weights_path.display(), "Saved weight image");
    Ok(())
}

// ============================================================================
// Inference
// ============================================================================

fn infer(kind: ModelKind, common: &CommonArgs) -> Result<()> {
    let Some(path) = &common.load else {
        bail!("--load is required in infer mode");
    };
    let checkpoint = load_model(path, kind)
        .with_context(|| format!("Failed to load model from {}", path.display()))?;
    let (mut model, domain) = restore(checkpoint, common.seed)?;

    fs::create_dir_all(&common.inference_dir).with_context(|| {
        format!(
            "Failed to create frame directory {}",
            common.inference_dir.display()
        )
    })?;

    let mut metrics = MetricsLog::open(common.metrics_file.as_deref())?;
    model.randomize_state();
    info!(
        model = model.name(),
        frames = common.frames,
        steps_per_frame = common.steps_per_frame,
        "Rendering frames"
    );

    for frame in 0..common.frames {
        model.update_state(common.steps_per_frame);
        let frame_path = common.inference_dir.join(format!("output{frame}.png"));
        save_state_png(model.visible_state(), domain, &frame_path)?;
        metrics.write(serde_json::json!({
            "type": "frame",
            "frame": frame,
            "energy": model.energy(),
        }))?;
    }

    info!(dir = %common.inference_dir.display(), "Inference complete");
    Ok(())
}

fn restore(
    checkpoint: Checkpoint,
    seed: Option<u64>,
) -> Result<(Box<dyn EnergyModel>, StateDomain)> {
    let domain = match checkpoint.kind() {
        ModelKind::Hopfield => StateDomain::Bipolar,
        ModelKind::Boltzmann | ModelKind::Rbm => StateDomain::Binary,
    };
    let model: Box<dyn EnergyModel> = match checkpoint {
        Checkpoint::Hopfield(params) => Box::new(match seed {
            Some(seed) => HopfieldNetwork::from_params_seeded(params, seed)?,
            None => HopfieldNetwork::from_params(params)?,
        }),
        Checkpoint::Boltzmann(params) => Box::new(match seed {
            Some(seed) => BoltzmannMachine::from_params_seeded(params, seed)?,
            None => BoltzmannMachine::from_params(params)?,
        }),
        Checkpoint::Rbm(params) => Box::new(match seed {
            Some(seed) => RestrictedBoltzmannMachine::from_params_seeded(params, seed)?,
            None => RestrictedBoltzmannMachine::from_params(params)?,
        }),
    };
    Ok((model, domain))
}

// ============================================================================
// Metrics
// ============================================================================

/// Append-mode JSONL sink; a no-op without `--metrics-file`.
struct MetricsLog {
    file: Option<File>,
}

impl MetricsLog {
    fn open(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self { file: None });
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).context("Failed to create metrics output directory")?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open metrics file {}", path.display()))?;
        Ok(Self { file: Some(file) })
    }

    fn write(&mut self, event: serde_json::Value) -> Result<()> {
        if let Some(file) = &mut self.file {
            writeln!(file, "{event}").context("Failed to write metrics")?;
            file.flush().context("Failed to flush metrics")?;
        }
        Ok(())
    }

    fn write_report(&mut self, model: &str, report: &TrainingReport) -> Result<()> {
        for epoch in &report.epochs {
            self.write(serde_json::json!({
                "type": "epoch",
                "model": model,
                "epoch": epoch.epoch + 1,
                "avg_loss": epoch.avg_loss,
                "num_batches": epoch.num_batches,
                "num_samples": epoch.num_samples,
            }))?;
        }
        if let Some(best) = report.best_epoch {
            self.write(serde_json::json!({
                "type": "best",
                "model": model,
                "epoch": best + 1,
            }))?;
        }
        Ok(())
    }
}
