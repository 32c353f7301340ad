//! Per-tile transforms. Each reads named inputs for one tile from the working
//! directory and writes named outputs next to them, independent of every
//! other tile.

pub mod biomass_mask;
pub mod burn_date;
pub mod gain_year_count;
pub mod gross_removals;
pub mod statistics;

use std::path::{Path, PathBuf};

use crate::calc::RasterCalc;
use crate::config::{Dataset, FilePattern, ModelType};
use crate::error::{Error, Result};
use crate::tile_id::TileId;

pub use biomass_mask::NonMangroveBiomassMask;
pub use burn_date::BurnDateStack;
pub use gain_year_count::GainYearCountMangrove;
pub use gross_removals::GrossRemovals;
pub use statistics::TileStatistics;

/// Run-wide state every tile sees. Read-only.
pub struct TileContext<'a> {
    pub work_dir: &'a Path,
    pub calc: &'a dyn RasterCalc,
    pub model_type: ModelType,
}

impl TileContext<'_> {
    pub fn output_path(&self, pattern: &FilePattern, tile_id: &TileId) -> PathBuf {
        self.work_dir.join(pattern.file_name(tile_id))
    }

    /// Local file of `dataset` for `tile_id`, preferring the sensitivity
    /// variant's file when one was staged.
    pub fn input_path(&self, dataset: &Dataset, tile_id: &TileId) -> PathBuf {
        if let Some(variant) = dataset.variant(self.model_type) {
            let path = self.work_dir.join(variant.pattern.file_name(tile_id));
            if path.is_file() {
                return path;
            }
        }
        self.work_dir.join(dataset.pattern.file_name(tile_id))
    }

    pub fn require_input(&self, dataset: &Dataset, tile_id: &TileId) -> Result<PathBuf> {
        let path = self.input_path(dataset, tile_id);
        if path.is_file() {
            Ok(path)
        } else {
            Err(Error::MissingInput(path))
        }
    }

    pub fn optional_input(&self, dataset: &Dataset, tile_id: &TileId) -> Option<PathBuf> {
        Some(self.input_path(dataset, tile_id)).filter(|p| p.is_file())
    }
}

/// One pipeline's per-tile work.
pub trait TileTransform: Send + Sync {
    type Output: Send;

    fn name(&self) -> &'static str;

    fn apply(&self, tile_id: &TileId, ctx: &TileContext<'_>) -> Result<Self::Output>;

    /// True when a previous run already left valid outputs for this tile.
    fn is_complete(&self, _tile_id: &TileId, _ctx: &TileContext<'_>) -> bool {
        false
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::path::{Path, PathBuf};

    use crate::raster::{Compression, GeoTags, Raster};

    /// Writes a small georeferenced tile into `dir`.
    pub fn tile(dir: &Path, name: &str, width: usize, data: Vec<f32>) -> PathBuf {
        let height = data.len() / width;
        let path = dir.join(name);
        Raster::from_data(width, height, data)
            .unwrap()
            .with_geo(GeoTags::geographic(0.0, 0.0, 0.00025))
            .write(&path, Compression::Lzw)
            .unwrap();
        path
    }

    pub fn read(path: &Path) -> Vec<f32> {
        Raster::read(path).unwrap().data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calc::NativeCalc;
    use std::fs;

    #[test]
    fn input_path_prefers_local_variant_file() {
        let dir = tempfile::tempdir().unwrap();
        let ds = Dataset::new("s3://b/gyc/standard/20200101/", FilePattern::tile_first("gyc"));
        let tile = TileId::parse("00N_000E").unwrap();
        let ctx = TileContext { work_dir: dir.path(), calc: &NativeCalc::default(), model_type: ModelType::MaxGain };

        assert!(matches!(ctx.require_input(&ds, &tile), Err(Error::MissingInput(_))));
        fs::write(dir.path().join("00N_000E_gyc.tif"), b"x").unwrap();
        assert!(ctx.input_path(&ds, &tile).ends_with("00N_000E_gyc.tif"));
        fs::write(dir.path().join("00N_000E_gyc_maxgain.tif"), b"x").unwrap();
        assert!(ctx.require_input(&ds, &tile).unwrap().ends_with("00N_000E_gyc_maxgain.tif"));
    }
}
