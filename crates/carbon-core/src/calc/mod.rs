//! Raster algebra: one calc call per output raster, one merge call per
//! multi-part output.
//!
//! Jobs are plain descriptions built in the transforms; a [`RasterCalc`]
//! backend executes them. [`GdalCalc`] drives the GDAL command-line tools,
//! [`NativeCalc`] evaluates the same jobs in-process.

pub mod expr;
pub mod gdal;
pub mod native;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

pub use expr::{Band, Expr};
pub use gdal::GdalCalc;
pub use native::NativeCalc;

use crate::error::{Error, Result};
use crate::raster::{Compression, NODATA};

/// One output raster computed from single-letter bound inputs.
#[derive(Debug, Clone)]
pub struct CalcJob {
    pub expr: Expr,
    pub inputs: BTreeMap<Band, PathBuf>,
    pub output: PathBuf,
    pub nodata: f32,
}

impl CalcJob {
    pub fn new(expr: Expr, output: impl Into<PathBuf>) -> Self {
        Self {
            expr,
            inputs: BTreeMap::new(),
            output: output.into(),
            nodata: NODATA,
        }
    }

    pub fn input(mut self, band: Band, path: impl Into<PathBuf>) -> Self {
        self.inputs.insert(band, path.into());
        self
    }

    /// Every band the expression reads must be bound to a file.
    pub fn validate(&self) -> Result<()> {
        if self.inputs.is_empty() {
            return Err(Error::Config(format!(
                "calc for {} has no inputs",
                self.output.display()
            )));
        }
        let unbound: Vec<String> = self
            .expr
            .bands()
            .into_iter()
            .filter(|b| !self.inputs.contains_key(b))
            .map(|b| b.letter().to_string())
            .collect();
        if !unbound.is_empty() {
            return Err(Error::Config(format!(
                "expression `{}` reads unbound band(s) {}",
                self.expr,
                unbound.join(", ")
            )));
        }
        Ok(())
    }
}

/// N rasters on one grid merged into one; later inputs overwrite earlier
/// ones wherever they hold valid data.
#[derive(Debug, Clone)]
pub struct MergeJob {
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
    pub nodata: f32,
}

impl MergeJob {
    pub fn new(inputs: Vec<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self { inputs, output: output.into(), nodata: NODATA }
    }

    pub fn validate(&self) -> Result<()> {
        if self.inputs.is_empty() {
            return Err(Error::Config(format!(
                "merge into {} has no inputs",
                self.output.display()
            )));
        }
        Ok(())
    }
}

/// Executes raster-algebra jobs. Failing jobs leave no output behind; every
/// output is written with the backend's compression.
pub trait RasterCalc: Send + Sync {
    fn name(&self) -> &'static str;

    fn calc(&self, job: &CalcJob) -> Result<()>;

    fn merge(&self, job: &MergeJob) -> Result<()>;
}

/// Which [`RasterCalc`] a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CalcBackend {
    #[default]
    Gdal,
    Native,
}

impl CalcBackend {
    pub fn build(self, compression: Compression) -> Arc<dyn RasterCalc> {
        match self {
            CalcBackend::Gdal => Arc::new(GdalCalc { compression, ..GdalCalc::default() }),
            CalcBackend::Native => Arc::new(NativeCalc { compression }),
        }
    }
}

impl FromStr for CalcBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gdal" => Ok(CalcBackend::Gdal),
            "native" => Ok(CalcBackend::Native),
            other => Err(Error::Config(format!(
                "unknown calc backend `{other}` (expected gdal or native)"
            ))),
        }
    }
}

/// Removes a partially written output; absence is fine.
pub(crate) fn discard_partial(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            log::warn!("could not remove partial output {}: {e}", path.display());
        }
    }
}
