mod cli;
mod error;
mod pipeline;
mod raster;
mod run_artifacts;
mod run_context;
mod vector;

use anyhow::Result;
use cli::{Args, Command};
use pipeline::orchestrator::{run_autodraw, run_classification, run_detection, run_segmentation};

fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    let args = Args::parse_args();

    let summary = match args.command {
        Command::Detect(args) => run_detection(&args.into_config()?)?,
        Command::Classify(args) => run_classification(&args.into_config()?)?,
        Command::Segment(args) => run_segmentation(&args.into_config()?)?,
        Command::Autodraw(args) => run_autodraw(&args.into_config()?)?,
    };

    tracing::info!(
        "Run complete: {} written, {} skipped",
        summary.written,
        summary.skipped
    );
    Ok(())
}
