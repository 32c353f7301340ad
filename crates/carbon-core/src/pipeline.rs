//! The tile-batch driver shared by every pipeline:
//! resolve → stage → transform → validate → publish.
//!
//! Transform, validation and publication are separated by hard barriers; a
//! phase starts only after the previous one finished for every tile.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Local, SecondsFormat};
use log::{info, warn};
use serde::Serialize;

use crate::calc::RasterCalc;
use crate::config::{Dataset, ModelType, ProcessConfig, Source, WorkerLimits};
use crate::error::{Phase, Result};
use crate::pool::{partition, FailedTile, WorkerPool};
use crate::publish::ResultPublisher;
use crate::resolve::TileResolver;
use crate::stage::{DownloadManifest, InputStager};
use crate::storage::ObjectStore;
use crate::tile_id::TileId;
use crate::transforms::{TileContext, TileTransform};
use crate::validate::{OutputValidator, ValidationSummary};

/// What a pipeline reads and writes, fixed before any tile work.
#[derive(Debug, Clone)]
pub struct PipelinePlan {
    pub name: String,
    /// Sources whose common tiles make up `all`.
    pub tile_sources: Vec<Source>,
    pub downloads: DownloadManifest,
    /// Raster outputs, validated and published in this order.
    pub outputs: Vec<Dataset>,
}

/// Record of one run, written next to the outputs.
#[derive(Debug, Clone, Serialize)]
pub struct RunManifest {
    pub pipeline: String,
    pub model_type: ModelType,
    pub run_date: Option<String>,
    pub calc_backend: String,
    pub workers: WorkerLimits,
    pub started: String,
    pub finished: String,
    pub tiles: Vec<TileId>,
    pub succeeded: Vec<TileId>,
    pub skipped: Vec<TileId>,
    pub failed: Vec<FailedTile>,
    pub validation: Vec<ValidationSummary>,
    pub published: Vec<String>,
}

impl RunManifest {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn file_name(&self) -> String {
        format!("{}_run_manifest.json", self.pipeline)
    }

    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(self.file_name());
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }
}

/// Manifest plus what each successful tile returned.
#[derive(Debug)]
pub struct RunReport<T> {
    pub manifest: RunManifest,
    pub outputs: Vec<(TileId, T)>,
}

fn now() -> String {
    Local::now().to_rfc3339_opts(SecondsFormat::Secs, false)
}

pub struct Pipeline<'a> {
    config: &'a ProcessConfig,
    store: Option<&'a dyn ObjectStore>,
    calc: &'a dyn RasterCalc,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a ProcessConfig, store: Option<&'a dyn ObjectStore>, calc: &'a dyn RasterCalc) -> Self {
        Self { config, store, calc }
    }

    pub fn publisher(&self) -> ResultPublisher<'a> {
        ResultPublisher::new(self.store, self.config.upload, &self.config.work_dir)
    }

    pub fn context(&self) -> TileContext<'a> {
        TileContext {
            work_dir: &self.config.work_dir,
            calc: self.calc,
            model_type: self.config.model_type,
        }
    }

    /// Runs every phase. Per-tile failures land in the manifest; a failing
    /// resolve, stage or publish phase halts the run with that phase named.
    pub fn run<T: TileTransform>(&self, transform: &T, plan: &PipelinePlan) -> Result<RunReport<T::Output>> {
        let cfg = self.config;
        let started = now();
        let work_dir = cfg.work_dir.as_path();
        fs::create_dir_all(work_dir)?;
        info!(
            "{}: model type {}, calc backend {}, {} transform / {} validation worker(s)",
            plan.name,
            cfg.model_type,
            self.calc.name(),
            cfg.workers.transform,
            cfg.workers.validate
        );

        // ── resolve ──
        let resolver = TileResolver::new(self.store, work_dir, cfg.model_type);
        let tiles = resolver
            .resolve(&cfg.tiles, &plan.tile_sources)
            .map_err(|e| e.in_phase(Phase::Resolve))?;
        info!("{}: {} tile(s) selected", plan.name, tiles.len());

        // ── stage ──
        InputStager::new(self.store, &resolver, work_dir)
            .stage(&plan.downloads, &tiles)
            .map_err(|e| e.in_phase(Phase::Stage))?;

        // ── transform ──
        let ctx = self.context();
        let (skipped, pending): (Vec<TileId>, Vec<TileId>) = tiles
            .iter()
            .cloned()
            .partition(|t| !cfg.overwrite && transform.is_complete(t, &ctx));
        if !skipped.is_empty() {
            info!("{}: {} tile(s) already complete, skipping", plan.name, skipped.len());
        }
        let pool = WorkerPool::new(cfg.workers.transform).map_err(|e| e.in_phase(Phase::Transform))?;
        let outcomes = pool.run(&pending, |tile| {
            info!("{tile}: {}", transform.name());
            let out = transform.apply(tile, &ctx)?;
            info!("{tile}: done");
            Ok(out)
        });
        let (outputs, mut failed) = partition(outcomes);
        for f in &failed {
            self.discard_outputs(plan, &f.tile_id);
        }
        let mut succeeded: Vec<TileId> = outputs.iter().map(|(t, _)| t.clone()).collect();
        info!("{}: {} tile(s) transformed, {} failed", plan.name, succeeded.len(), failed.len());

        // ── validate ──
        let mut validation = Vec::with_capacity(plan.outputs.len());
        if !plan.outputs.is_empty() && !succeeded.is_empty() {
            let pool = WorkerPool::new(cfg.workers.validate).map_err(|e| e.in_phase(Phase::Validate))?;
            let validator = OutputValidator::new(&pool, work_dir);
            for ds in &plan.outputs {
                let (summary, bad) = validator.validate(&ds.pattern, &succeeded);
                validation.push(summary);
                for b in bad {
                    succeeded.retain(|t| *t != b.tile_id);
                    failed.push(b);
                }
            }
        }
        // outputs of tiles that failed validation never reach publication
        let rejected: Vec<TileId> = outputs
            .iter()
            .map(|(t, _)| t)
            .filter(|t| !succeeded.contains(t))
            .cloned()
            .collect();
        for tile_id in &rejected {
            self.discard_outputs(plan, tile_id);
        }
        let outputs: Vec<(TileId, T::Output)> =
            outputs.into_iter().filter(|(t, _)| !rejected.contains(t)).collect();

        // ── publish ──
        let publisher = self.publisher();
        let mut published = Vec::new();
        if publisher.is_enabled() {
            for ds in &plan.outputs {
                if publisher.publish(ds).map_err(|e| e.in_phase(Phase::Publish))? {
                    published.push(format!("{}{}", ds.dir, ds.pattern.glob()));
                }
            }
        } else {
            info!("{}: uploads disabled; outputs left in {}", plan.name, work_dir.display());
        }

        if !failed.is_empty() {
            warn!("{}: {} tile(s) failed", plan.name, failed.len());
        }
        let manifest = RunManifest {
            pipeline: plan.name.clone(),
            model_type: cfg.model_type,
            run_date: cfg.run_date.as_ref().map(|d| d.as_str().to_owned()),
            calc_backend: self.calc.name().to_owned(),
            workers: cfg.workers,
            started,
            finished: now(),
            tiles,
            succeeded,
            skipped,
            failed,
            validation,
            published,
        };
        Ok(RunReport { manifest, outputs })
    }

    /// A failed tile leaves none of its outputs behind.
    fn discard_outputs(&self, plan: &PipelinePlan, tile_id: &TileId) {
        for ds in &plan.outputs {
            let path = self.config.work_dir.join(ds.pattern.file_name(tile_id));
            if path.is_file() {
                if let Err(e) = fs::remove_file(&path) {
                    warn!("could not remove {}: {e}", path.display());
                }
            }
        }
    }
}
