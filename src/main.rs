use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use conversion_funnel::{init_logging, run, PipelineConfig, PipelineSummary, RunMode, VERSION};

/// Build client conversion events and lead conversion tables from CSV extracts
#[derive(Parser, Debug)]
#[command(name = "conversion-funnel", version)]
struct Cli {
    /// JSON config with input/output paths (defaults under data/ and outputs/)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Only merge the part-2 fallback file into the previous output
    #[arg(long, alias = "part2-only")]
    fallback_only: bool,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = PipelineConfig::load(cli.config.as_deref())?;
    init_logging(cli.verbose, config.log_file.as_deref())?;

    let mode = if cli.fallback_only {
        RunMode::FallbackOnly
    } else {
        RunMode::Full
    };
    info!(version = VERSION, ?mode, "Starting conversion funnel");

    match run(&config, mode) {
        Ok(summary) => {
            print_summary(&summary);
            Ok(())
        }
        Err(err) => {
            error!("Pipeline failed: {:#}", err);
            Err(err)
        }
    }
}

fn print_summary(summary: &PipelineSummary) {
    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✅ {}", summary.summary());
    if let Some(resolution) = &summary.resolution {
        println!("   {}", resolution.summary());
    }
    if let Some(merge) = &summary.merge {
        println!("   {}", merge.summary());
    }
    println!("   {}", summary.pivot.summary());
}
