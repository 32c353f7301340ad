//! Shared setup for the command-line drivers: parse and validate every
//! argument before tile work, pick the object store and calc backend, run a
//! plan, and record the run manifest.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use log::{info, warn};

use crate::calc::{CalcBackend, RasterCalc};
use crate::config::{Layout, ModelType, ProcessConfig, WorkerLimits, DEFAULT_VALIDATE_CAP};
use crate::error::Result;
use crate::pipeline::{Pipeline, PipelinePlan, RunReport};
use crate::raster::Compression;
use crate::storage::{AwsCli, LocalStore, ObjectStore};
use crate::transforms::TileTransform;

/// Raw driver arguments, as given on the command line. Every tool flattens
/// these into its own argument struct.
#[derive(Args, Debug, Clone)]
pub struct DriverOptions {
    /// Model type: std or a sensitivity-analysis variant
    #[arg(short = 't', long)]
    pub model_type: String,

    /// Comma-separated tile ids, or `all`
    #[arg(short = 'l', long)]
    pub tile_id_list: String,

    /// Run date (YYYYMMDD), substituted into output directories
    #[arg(short = 'd', long)]
    pub run_date: Option<String>,

    /// Keep outputs in the working directory instead of uploading them
    #[arg(long)]
    pub no_upload: bool,

    /// Transform worker count (default: CPUs, capped per pipeline)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Validation worker count
    #[arg(long)]
    pub validate_workers: Option<usize>,

    #[arg(long, default_value = ".")]
    pub work_dir: PathBuf,

    /// JSON file overriding dataset directories and patterns
    #[arg(long)]
    pub layout: Option<PathBuf>,

    /// Use this directory as the object store instead of S3
    #[arg(long)]
    pub store_root: Option<PathBuf>,

    /// Raster calculator: gdal or native
    #[arg(long, default_value = "gdal")]
    pub calc: CalcBackend,

    /// Output raster compression: lzw or deflate
    #[arg(long, default_value = "lzw")]
    pub compress: Compression,

    /// Re-run tiles whose outputs already hold data
    #[arg(long)]
    pub overwrite: bool,
}

pub struct Driver {
    pub config: ProcessConfig,
    pub layout: Layout,
    store: Option<Box<dyn ObjectStore>>,
    calc: Arc<dyn RasterCalc>,
}

impl Driver {
    /// `transform_cap` gives the transform pool limit for a model type.
    pub fn new(opts: DriverOptions, transform_cap: impl Fn(ModelType) -> usize) -> Result<Self> {
        let model_type: ModelType = opts.model_type.parse()?;
        let workers = WorkerLimits::capped(transform_cap(model_type), DEFAULT_VALIDATE_CAP)
            .with_overrides(opts.workers, opts.validate_workers)?;
        let mut config = ProcessConfig::from_args(
            &opts.model_type,
            &opts.tile_id_list,
            opts.run_date.as_deref(),
            opts.no_upload,
            workers,
            opts.work_dir,
        )?;
        config.overwrite = opts.overwrite;
        let layout = Layout::load(opts.layout.as_deref())?;

        let store: Option<Box<dyn ObjectStore>> = match opts.store_root {
            Some(root) => Some(Box::new(LocalStore::new(root))),
            None => AwsCli::from_env().map(|s| Box::new(s) as Box<dyn ObjectStore>),
        };
        match &store {
            Some(s) => info!("object store: {}", s.name()),
            None => warn!("no storage credentials found; working from local files only"),
        }

        Ok(Self { config, layout, store, calc: opts.calc.build(opts.compress) })
    }

    pub fn store(&self) -> Option<&dyn ObjectStore> {
        self.store.as_deref()
    }

    pub fn pipeline(&self) -> Pipeline<'_> {
        Pipeline::new(&self.config, self.store(), self.calc.as_ref())
    }

    /// Runs `plan` and writes its manifest into the working directory.
    pub fn run<T: TileTransform>(&self, transform: &T, plan: &PipelinePlan) -> Result<RunReport<T::Output>> {
        let report = self.pipeline().run(transform, plan)?;
        let path = report.manifest.write(&self.config.work_dir)?;
        info!("run manifest written to {}", path.display());
        Ok(report)
    }
}
