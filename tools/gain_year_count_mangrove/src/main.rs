//! Years of carbon removal for mangrove pixels.

use anyhow::{bail, Context, Result};
use carbon_core::transforms::GainYearCountMangrove;
use carbon_core::{Driver, DriverOptions, ModelType};
use clap::Parser;
use env_logger::{Builder, Env};
use log::info;

fn transform_cap(_: ModelType) -> usize {
    20
}

#[derive(Parser, Debug)]
#[command(name = "gain_year_count_mangrove", about = "Gain year count for mangroves, by loss/gain category and merged")]
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

    let (transform, plan) = GainYearCountMangrove::plan(&driver.layout, &driver.config);
    info!("loss years {}, gain years {}", transform.loss_years, transform.gain_years);
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
    info!(
        "{}: {} tile(s) written, {} already complete",
        manifest.pipeline,
        manifest.succeeded.len(),
        manifest.skipped.len()
    );
    Ok(())
}
