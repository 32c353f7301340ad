//! Tile-batch raster pipelines for a forest carbon flux model.
//!
//! Every pipeline resolves a tile list, stages its inputs from object
//! storage, runs one per-tile transform on a bounded worker pool, deletes
//! outputs that hold no data, and publishes what remains.

pub mod calc;
pub mod config;
pub mod driver;
pub mod error;
pub mod pipeline;
pub mod pool;
pub mod publish;
pub mod raster;
pub mod resolve;
pub mod stage;
pub mod storage;
pub mod tile_id;
pub mod transforms;
pub mod validate;

pub use calc::{CalcBackend, RasterCalc};
pub use config::{Dataset, FilePattern, Layout, ModelType, ProcessConfig, RunDate, Source, WorkerLimits};
pub use driver::{Driver, DriverOptions};
pub use error::{Error, Phase, Result};
pub use pipeline::{Pipeline, PipelinePlan, RunManifest, RunReport};
pub use storage::{AwsCli, LocalStore, ObjectStore};
pub use tile_id::{TileId, TileSelection};
