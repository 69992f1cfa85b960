use anyhow::{Context, Result};
use clap::Parser;
use homeprice::controls::Cli;
use homeprice::{logging, runtime};

fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();
    let report = match &cli.from_json {
        Some(dir) => runtime::import_payloads(dir, &cli.out)
            .with_context(|| format!("failed to import payloads from {}", dir.display()))?,
        None => {
            let controls = cli.build_controls();
            runtime::run(&controls, &cli.out).context("collection failed")?
        }
    };
    println!(
        "wrote {} listings to {} ({} duplicates skipped, {} failures)",
        report.rows_written,
        cli.out.display(),
        report.duplicates,
        report.failures
    );
    Ok(())
}
