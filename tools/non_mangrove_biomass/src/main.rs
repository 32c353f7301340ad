//! Year-2000 biomass with mangrove and planted-forest pixels removed.

use anyhow::{bail, Context, Result};
use carbon_core::transforms::NonMangroveBiomassMask;
use carbon_core::{Driver, DriverOptions, ModelType};
use clap::Parser;
use env_logger::{Builder, Env};
use log::info;

fn transform_cap(_: ModelType) -> usize {
    26
}

#[derive(Parser, Debug)]
#[command(name = "non_mangrove_biomass", about = "Non-mangrove, non-planted aboveground biomass for 2000")]
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

    let (transform, plan) = NonMangroveBiomassMask::plan(&driver.layout, &driver.config);
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
