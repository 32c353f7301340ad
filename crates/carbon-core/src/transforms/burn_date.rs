//! Annual burn-date raster for one MODIS cell.
//!
//! The burned-area product ships one raster per period; a year's raster is
//! the element-wise maximum of that year's periods. Fill values are
//! negative and count as no burn.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use super::{TileContext, TileTransform};
use crate::calc::{Band, CalcJob, Expr};
use crate::config::{FilePattern, Layout, ProcessConfig, Source};
use crate::error::{Error, Result};
use crate::pipeline::PipelinePlan;
use crate::stage::{local_matches, DownloadManifest};
use crate::tile_id::TileId;
use crate::validate::is_valid_output;

/// Inputs one calc job can bind.
pub const MAX_BANDS: usize = 26;

/// Maximum over the positive parts of the first `n` bands.
pub fn max_expr(n: usize) -> Result<Expr> {
    let mut bands = (0..n.max(1)).map(Band::nth);
    let first = bands.next().unwrap_or(Ok(Band::A))?.expr().positive_part();
    bands.try_fold(first, |acc, band| -> Result<Expr> { Ok(acc.max(band?.expr().positive_part())) })
}

fn stack_job(inputs: &[PathBuf], output: &Path) -> Result<CalcJob> {
    let expr = max_expr(inputs.len())?;
    inputs
        .iter()
        .enumerate()
        .try_fold(CalcJob::new(expr, output), |job, (i, path)| -> Result<CalcJob> {
            Ok(job.input(Band::nth(i)?, path))
        })
}

pub struct BurnDateStack {
    pub year: u16,
    periods: Source,
    output: FilePattern,
}

impl BurnDateStack {
    pub fn plan(layout: &Layout, config: &ProcessConfig, year: u16) -> (Self, PipelinePlan) {
        let periods = Source::Matching {
            dir: layout.burn_date_raw_dir.clone(),
            template: format!("MCD64A1.A{year}*{{tile_id}}*.tif"),
        };
        let mut yearly = layout.burn_year.clone();
        yearly.pattern.name = format!("{}_{year}", yearly.pattern.name);
        let output = yearly.for_output(config.model_type, config.run_date.as_ref());
        let plan = PipelinePlan {
            name: format!("burn_date_stack_{year}"),
            tile_sources: vec![periods.clone()],
            downloads: DownloadManifest::new([periods.clone()]),
            outputs: vec![output.clone()],
        };
        (Self { year, periods, output: output.pattern }, plan)
    }

    /// Reduces through intermediate rasters until one job can bind every
    /// remaining input.
    fn reduce(
        &self,
        inputs: Vec<PathBuf>,
        output: &Path,
        ctx: &TileContext<'_>,
        scratch: &mut Vec<PathBuf>,
    ) -> Result<()> {
        let stem = output.file_stem().unwrap_or_default().to_string_lossy().into_owned();
        let mut layer = inputs;
        let mut round = 0;
        while layer.len() > MAX_BANDS {
            let mut next = Vec::with_capacity(layer.len().div_ceil(MAX_BANDS));
            for (i, chunk) in layer.chunks(MAX_BANDS).enumerate() {
                let part = ctx.work_dir.join(format!("{stem}_part{round}_{i}.tif"));
                scratch.push(part.clone());
                ctx.calc.calc(&stack_job(chunk, &part)?)?;
                next.push(part);
            }
            debug!("{stem}: {} rasters reduced to {}", layer.len(), next.len());
            layer = next;
            round += 1;
        }
        ctx.calc.calc(&stack_job(&layer, output)?)
    }
}

impl TileTransform for BurnDateStack {
    type Output = ();

    fn name(&self) -> &'static str {
        "burn date stack"
    }

    fn apply(&self, tile_id: &TileId, ctx: &TileContext<'_>) -> Result<()> {
        let include = self.periods.include_for(tile_id);
        let periods = local_matches(ctx.work_dir, &include);
        if periods.is_empty() {
            return Err(Error::MissingInput(ctx.work_dir.join(include)));
        }
        debug!("{tile_id}: {} period raster(s) for {}", periods.len(), self.year);

        let mut scratch = Vec::new();
        let result = self.reduce(periods, &ctx.output_path(&self.output, tile_id), ctx, &mut scratch);
        for part in scratch {
            if part.is_file() {
                if let Err(e) = fs::remove_file(&part) {
                    warn!("could not remove {}: {e}", part.display());
                }
            }
        }
        result
    }

    fn is_complete(&self, tile_id: &TileId, ctx: &TileContext<'_>) -> bool {
        is_valid_output(&ctx.output_path(&self.output, tile_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calc::NativeCalc;
    use crate::config::{ModelType, WorkerLimits};
    use crate::transforms::testing;
    use proptest::prelude::*;

    fn setup(dir: &Path) -> (BurnDateStack, PipelinePlan) {
        let config =
            ProcessConfig::from_args("std", "h29v08", None, true, WorkerLimits { transform: 1, validate: 1 }, dir)
                .unwrap();
        BurnDateStack::plan(&Layout::default(), &config, 2006)
    }

    fn period(dir: &Path, day: u32, data: Vec<f32>) {
        testing::tile(dir, &format!("MCD64A1.A2006{day:03}.h29v08.006.tif"), 2, data);
    }

    #[test]
    fn expression_text() {
        assert_eq!(max_expr(1).unwrap().to_string(), "(A>0)*A");
        assert_eq!(max_expr(2).unwrap().to_string(), "maximum((A>0)*A,(B>0)*B)");
        assert!(max_expr(27).is_err());
    }

    proptest! {
        #[test]
        fn stack_is_the_maximum(values in prop::collection::vec(0.0f64..366.0, 1..=26)) {
            let got = max_expr(values.len()).unwrap().eval(&values);
            let want = values.iter().copied().fold(0.0, f64::max);
            prop_assert_eq!(got, want);
            prop_assert!(values.iter().all(|&v| got >= v));
        }
    }

    #[test]
    fn plan_names_year_output() {
        let dir = tempfile::tempdir().unwrap();
        let (_, plan) = setup(dir.path());
        let tile = TileId::parse("h29v08").unwrap();
        assert_eq!(plan.outputs[0].pattern.file_name(&tile), "h29v08_burnyear_2006.tif");
        assert_eq!(plan.tile_sources[0].include_all(), "MCD64A1.A2006*.tif");
        assert_eq!(
            plan.tile_sources[0].tile_of("MCD64A1.A2006032.h29v08.006.tif"),
            Some(tile)
        );
    }

    #[test]
    fn single_period_is_returned_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let (transform, plan) = setup(dir.path());
        let tile = TileId::parse("h29v08").unwrap();
        period(dir.path(), 32, vec![0.0, 45.0, 0.0, 60.0]);

        let ctx = TileContext { work_dir: dir.path(), calc: &NativeCalc::default(), model_type: ModelType::Standard };
        transform.apply(&tile, &ctx).unwrap();
        let out = testing::read(&dir.path().join(plan.outputs[0].pattern.file_name(&tile)));
        assert_eq!(out, [0.0, 45.0, 0.0, 60.0]);
    }

    #[test]
    fn more_periods_than_bands_reduce_in_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let (transform, plan) = setup(dir.path());
        let tile = TileId::parse("h29v08").unwrap();
        for day in 1..=30u32 {
            let v = day as f32;
            period(dir.path(), day, vec![v, if day == 7 { 200.0 } else { 0.0 }, -1.0, 31.0 - v]);
        }
        // another year's periods stay out
        testing::tile(dir.path(), "MCD64A1.A2007001.h29v08.006.tif", 2, vec![999.0; 4]);

        let ctx = TileContext { work_dir: dir.path(), calc: &NativeCalc::default(), model_type: ModelType::Standard };
        transform.apply(&tile, &ctx).unwrap();
        let out = testing::read(&dir.path().join(plan.outputs[0].pattern.file_name(&tile)));
        assert_eq!(out, [30.0, 200.0, 0.0, 30.0]);

        let leftovers = local_matches(dir.path(), "*_part*.tif");
        assert!(leftovers.is_empty(), "{leftovers:?}");
    }

    #[test]
    fn no_periods_fails_the_tile() {
        let dir = tempfile::tempdir().unwrap();
        let (transform, _) = setup(dir.path());
        let ctx = TileContext { work_dir: dir.path(), calc: &NativeCalc::default(), model_type: ModelType::Standard };
        let err = transform.apply(&TileId::parse("h29v08").unwrap(), &ctx).unwrap_err();
        assert!(matches!(err, Error::MissingInput(_)));
    }
}
