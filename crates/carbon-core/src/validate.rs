//! Post-transform pass that drops all-NoData tiles.

use std::fs;
use std::path::Path;

use log::{debug, info, warn};
use serde::Serialize;

use crate::config::FilePattern;
use crate::error::Result;
use crate::pool::{partition, FailedTile, WorkerPool};
use crate::raster::Raster;
use crate::tile_id::TileId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Validation {
    Kept,
    Deleted,
    Missing,
}

/// Deletes `path` when every pixel is NoData.
pub fn check_and_delete_if_empty(path: &Path) -> Result<Validation> {
    if !path.is_file() {
        return Ok(Validation::Missing);
    }
    if Raster::read(path)?.has_data() {
        return Ok(Validation::Kept);
    }
    debug!("{} holds no data; deleting", path.display());
    fs::remove_file(path)?;
    Ok(Validation::Deleted)
}

/// An output counts as complete when it exists and holds data.
pub fn is_valid_output(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }
    match Raster::read(path) {
        Ok(r) => r.has_data(),
        Err(e) => {
            warn!("{} is unreadable ({e}); treating as incomplete", path.display());
            false
        }
    }
}

/// Per-pattern tally for the run manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationSummary {
    pub pattern: String,
    pub kept: usize,
    pub deleted: usize,
    pub missing: usize,
}

pub struct OutputValidator<'a> {
    pool: &'a WorkerPool,
    work_dir: &'a Path,
}

impl<'a> OutputValidator<'a> {
    pub fn new(pool: &'a WorkerPool, work_dir: &'a Path) -> Self {
        Self { pool, work_dir }
    }

    /// Checks one output pattern across `tiles`.
    pub fn validate(&self, pattern: &FilePattern, tiles: &[TileId]) -> (ValidationSummary, Vec<FailedTile>) {
        let outcomes = self.pool.run(tiles, |tile| {
            check_and_delete_if_empty(&self.work_dir.join(pattern.file_name(tile)))
        });
        let (checked, failed) = partition(outcomes);

        let mut summary = ValidationSummary { pattern: pattern.name.clone(), ..Default::default() };
        for (_, v) in checked {
            match v {
                Validation::Kept => summary.kept += 1,
                Validation::Deleted => summary.deleted += 1,
                Validation::Missing => summary.missing += 1,
            }
        }
        info!(
            "{}: {} kept, {} empty and deleted, {} missing",
            summary.pattern, summary.kept, summary.deleted, summary.missing
        );
        (summary, failed)
    }
}
