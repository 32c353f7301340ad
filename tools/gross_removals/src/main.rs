//! Cumulative gross CO2 removals 2001–2015 for all forest types, per carbon
//! pool and summed.

use anyhow::{bail, Context, Result};
use carbon_core::transforms::GrossRemovals;
use carbon_core::{Driver, DriverOptions, ModelType};
use clap::Parser;
use env_logger::{Builder, Env};
use log::info;

/// Transform pool limit; larger inputs for the biomass swap need more memory.
fn transform_cap(model: ModelType) -> usize {
    match model {
        ModelType::BiomassSwap => 18,
        _ => 22,
    }
}

#[derive(Parser, Debug)]
#[command(name = "gross_removals", about = "Cumulative gross removals (AGCO2, BGCO2 and total) for all forest types")]
struct Args {
    #[command(flatten)]
    driver: DriverOptions,
}

fn main() -> Result<()> {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();
    builder.init();

    let args = Args::parse();
    let driver = Driver::new(args.driver, transform_cap).context("invalid arguments")?;

    let (transform, plan) = GrossRemovals::plan(&driver.layout, &driver.config);
    let report = driver.run(&transform, &plan)?;
    let manifest = &report.manifest;
    if manifest.has_failures() {
        bail!(
            "{}: {} of {} tile(s) failed (see {})",
            manifest.pipeline,
            manifest.failed.len(),
            manifest.tiles.len(),
            manifest.file_name()
        );
    }
    info!("{}: {} tile(s) written", manifest.pipeline, manifest.succeeded.len());
    Ok(())
}
