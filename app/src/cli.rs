use crate::collector::run_session;
use crate::detector::ReplayDetector;
use crate::live::classify_frames;
use crate::operator::{LineInput, OperatorInput};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use handsign::{
    CaptureSession, CollectorConfig, Dataset, InferenceGraph, OnnxRuntime, TrainingOptions, run,
};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "handsign",
    version,
    about = "Collect hand-landmark samples for static sign letters, train a classifier and export it to ONNX."
)]
pub struct Cli {
    /// TOML file overriding labels, sample counts and paths
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a capture session and save the dataset
    Collect(CaptureArgs),
    /// Train on the saved dataset and export the model
    Train,
    /// Collect, then train on the freshly saved dataset
    Both(CaptureArgs),
    /// Classify recorded frames with the exported model
    Predict(FramesArgs),
}

#[derive(Args, Debug)]
pub struct FramesArgs {
    /// JSON Lines recording, one `null` or 21-landmark array per frame
    #[arg(long)]
    pub frames: PathBuf,
}

#[derive(Args, Debug)]
pub struct CaptureArgs {
    #[command(flatten)]
    pub frames: FramesArgs,

    /// Read operator commands from this file instead of stdin
    #[arg(long)]
    pub commands: Option<PathBuf>,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        let config = CollectorConfig::load_or_default(self.config.as_deref())?;
        match self.command {
            Commands::Collect(args) => collect(&config, &args).map(|_| ()),
            Commands::Train => train(&config),
            Commands::Both(args) => {
                collect(&config, &args)?;
                train(&config)
            }
            Commands::Predict(args) => predict(&config, &args),
        }
    }
}

fn collect(config: &CollectorConfig, args: &CaptureArgs) -> Result<Dataset> {
    let session = CaptureSession::new(config.label_set()?, config.samples_per_label)?;
    let mut camera = ReplayDetector::open(&args.frames.frames)?;
    let mut input: Box<dyn OperatorInput> = match &args.commands {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("Failed to open command file {}", path.display()))?;
            Box::new(LineInput::new(BufReader::new(file)))
        }
        None => {
            println!("Commands: c/space = capture, n = next letter, q = finish");
            Box::new(LineInput::new(io::stdin().lock()))
        }
    };

    let session = run_session(session, &mut camera, input.as_mut(), config.frame_interval_ms)?;
    let dataset = session.into_dataset()?;
    dataset.persist(&config.dataset_path)?;
    println!(
        "Saved {} samples to {}",
        dataset.len(),
        config.dataset_path.display()
    );
    Ok(dataset)
}

fn train(config: &CollectorConfig) -> Result<()> {
    let dataset = Dataset::load(&config.dataset_path)?;
    let summary = run(&dataset, &TrainingOptions::default(), &config.model_path)?;
    println!("Test accuracy: {:.4}", summary.report.accuracy);
    println!("{}", summary.report);
    println!(
        "Model saved to {} ({} bytes, export agreement {:.1}%)",
        config.model_path.display(),
        summary.model_bytes,
        summary.export_agreement * 100.0
    );
    Ok(())
}

fn predict(config: &CollectorConfig, args: &FramesArgs) -> Result<()> {
    let graph = InferenceGraph::load(&config.model_path)?;
    let mut runtime = OnnxRuntime::load(&config.model_path)?;
    let labels = config.label_set()?;
    let mut camera = ReplayDetector::open(&args.frames)?;
    let predictions = classify_frames(
        &mut runtime,
        &graph,
        labels.names(),
        &mut camera,
        config.frame_interval_ms,
    )?;
    for prediction in predictions.into_iter().flatten() {
        println!(
            "frame {:>5}: {} ({:.2})",
            prediction.frame, prediction.letter, prediction.confidence
        );
    }
    Ok(())
}
