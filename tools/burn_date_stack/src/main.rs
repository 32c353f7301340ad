//! Annual burn-date rasters from the MODIS burned-area periods.

use anyhow::{bail, Context, Result};
use carbon_core::transforms::BurnDateStack;
use carbon_core::{Driver, DriverOptions, ModelType};
use clap::Parser;
use env_logger::{Builder, Env};
use log::info;

fn transform_cap(_: ModelType) -> usize {
    12
}

#[derive(Parser, Debug)]
#[command(name = "burn_date_stack", about = "Stack one year of MODIS burned-area periods into an annual burn-date raster per cell")]
struct Args {
    #[command(flatten)]
    driver: DriverOptions,

    /// Year to stack
    #[arg(short = 'y', long)]
    year: u16,
}

fn main() -> Result<()> {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();
    builder.init();

    let args = Args::parse();
    let driver = Driver::new(args.driver, transform_cap).context("invalid arguments")?;

    let (transform, plan) = BurnDateStack::plan(&driver.layout, &driver.config, args.year);
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
    info!("{}: {} cell(s) written", manifest.pipeline, manifest.succeeded.len());
    Ok(())
}
