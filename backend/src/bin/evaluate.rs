use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use grainpalette::evaluation::{self, EvaluationMode};
use grainpalette::model::ModelAdapter;
use grainpalette::pipeline::{PipelineConfig, PredictionOrchestrator};

#[derive(Parser)]
#[command(
    name = "grainpalette-evaluate",
    about = "Measure rice classification accuracy over a labelled image directory."
)]
struct Cli {
    /// Directory with one sub-directory per variety (Arborio, Basmati, ...)
    #[arg(long, default_value = "test_data")]
    data_dir: PathBuf,

    /// Maximum images read from each variety directory
    #[arg(long, default_value_t = 50)]
    max_per_class: usize,

    /// Pipeline config YAML (defaults to GRAINPALETTE_CONFIG or config/pipeline.yaml)
    #[arg(long, env = "GRAINPALETTE_CONFIG")]
    config: Option<PathBuf>,

    /// Score the model tier alone instead of the full fallback chain
    #[arg(long)]
    model_only: bool,

    /// Write a per-class summary CSV to this path
    #[arg(long)]
    csv: Option<PathBuf>,
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &cli.config {
        Some(path) => PipelineConfig::load_from(path)?,
        None => PipelineConfig::load()?,
    };
    let model = Arc::new(ModelAdapter::new(config.model.clone()));
    let orchestrator = PredictionOrchestrator::new(model, &config);

    log::info!("Loading test data from {}", cli.data_dir.display());
    let samples = evaluation::load_dataset(&cli.data_dir, cli.max_per_class)?;
    log::info!("Loaded {} test images", samples.len());

    let mode = if cli.model_only {
        EvaluationMode::ModelOnly
    } else {
        EvaluationMode::Pipeline
    };
    let report = evaluation::evaluate(&orchestrator, &samples, mode, &mut rand::rng())?;
    println!("{}", report.render());

    if let Some(path) = &cli.csv {
        report.write_csv(path)?;
        println!("Results saved to '{}'", path.display());
    }
    Ok(())
}

fn main() -> ExitCode {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("Evaluation failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
