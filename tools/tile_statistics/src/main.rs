//! Per-tile summary statistics of one raster product, collected into a
//! single text file.

use anyhow::{bail, Context, Result};
use carbon_core::transforms::statistics::{write_and_publish, StatsRecord};
use carbon_core::transforms::TileStatistics;
use carbon_core::{Driver, DriverOptions, ModelType};
use clap::Parser;
use env_logger::{Builder, Env};
use log::info;

fn transform_cap(_: ModelType) -> usize {
    30
}

#[derive(Parser, Debug)]
#[command(name = "tile_statistics", about = "Per-tile summary statistics of one raster product")]
struct Args {
    #[command(flatten)]
    driver: DriverOptions,

    /// Layout entry to summarize, e.g. cumul_removals_agco2_bgco2_all_types
    #[arg(long)]
    dataset: String,
}

fn main() -> Result<()> {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();
    builder.init();

    let args = Args::parse();
    let driver = Driver::new(args.driver, transform_cap).context("invalid arguments")?;
    let dataset = driver.layout.dataset(&args.dataset)?;

    let (transform, plan) = TileStatistics::plan(&driver.layout, dataset);
    let report = driver.run(&transform, &plan)?;

    // one writer, after every worker finished
    let records: Vec<StatsRecord> = report.outputs.into_iter().map(|(_, r)| r).collect();
    let date = match &driver.config.run_date {
        Some(d) => d.as_str().to_owned(),
        None => chrono::Local::now().format("%Y%m%d").to_string(),
    };
    let publisher = driver.pipeline().publisher();
    write_and_publish(&records, &date, &driver.config.work_dir, &publisher, &driver.layout.tile_stats_dir)
        .context("cannot write tile statistics")?;

    let manifest = &report.manifest;
    if manifest.has_failures() {
        bail!(
            "{}: {} of {} tile(s) have no statistics (see {})",
            manifest.pipeline,
            manifest.failed.len(),
            manifest.tiles.len(),
            manifest.file_name()
        );
    }
    info!("{}: {} tile(s) summarized", manifest.pipeline, manifest.succeeded.len());
    Ok(())
}
