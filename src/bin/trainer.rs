use anyhow::{Context, Result};
use clap::Parser;
use homeprice::training::{self, TrainCli};
use homeprice::logging;

fn main() -> Result<()> {
    logging::init();
    let cli = TrainCli::parse();
    let config = cli.build_config();
    let summary = training::run(&config)
        .with_context(|| format!("training on {} failed", config.csv_path.display()))?;
    summary.report();
    println!(
        "best model {} saved to {}",
        summary.best_model,
        config.output_dir.join("pipeline.json").display()
    );
    Ok(())
}
