//! Per-tile summary statistics of one raster product.
//!
//! Non-positive pixels are NoData. The area-weighted sum converts a
//! per-hectare raster to per-pixel values with the pixel-area tile:
//! `value_per_pixel = value_per_hectare * pixel_area_m2 / 10000`.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::Serialize;

use super::{TileContext, TileTransform};
use crate::calc::{Band, CalcJob, Expr};
use crate::config::{Dataset, Layout, Source};
use crate::error::Result;
use crate::pipeline::PipelinePlan;
use crate::publish::ResultPublisher;
use crate::raster::Raster;
use crate::stage::DownloadManifest;
use crate::tile_id::TileId;

pub const M2_PER_HA: f64 = 10_000.0;

const NOT_APPLICABLE: &str = "N/A";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub mean: f64,
    pub median: f64,
    pub p10: f64,
    pub p25: f64,
    pub p75: f64,
    pub p90: f64,
    pub min: f64,
    pub max: f64,
    pub pixel_weighted_sum: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Statistics {
    /// No valid pixel in the tile.
    NotApplicable,
    Summary(Summary),
}

/// One line of the statistics file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsRecord {
    pub tile_id: TileId,
    pub tile_path: String,
    pub valid_pixel_count: usize,
    pub statistics: Statistics,
}

impl StatsRecord {
    /// `tile_id, tile_path, valid_pixel_count, mean, median, p10, p25, p75,
    /// p90, min, max, pixel_weighted_sum`
    pub fn to_line(&self) -> String {
        let mut fields = vec![
            self.tile_id.to_string(),
            self.tile_path.clone(),
            self.valid_pixel_count.to_string(),
        ];
        match &self.statistics {
            Statistics::NotApplicable => fields.extend((0..9).map(|_| NOT_APPLICABLE.to_owned())),
            Statistics::Summary(s) => fields.extend(
                [s.mean, s.median, s.p10, s.p25, s.p75, s.p90, s.min, s.max, s.pixel_weighted_sum]
                    .iter()
                    .map(f64::to_string),
            ),
        }
        fields.join(", ")
    }
}

/// Linear-interpolated percentile of sorted, non-empty `sorted`.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let v = sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64);
    v.clamp(sorted[lo], sorted[hi])
}

/// Pixel values that count as data: finite and positive.
pub fn positive_values(raster: &Raster) -> Vec<f64> {
    raster
        .data
        .iter()
        .filter(|v| v.is_finite() && **v > 0.0)
        .map(|&v| f64::from(v))
        .collect()
}

pub fn summarize(mut values: Vec<f64>, pixel_weighted_sum: f64) -> Statistics {
    if values.is_empty() {
        return Statistics::NotApplicable;
    }
    values.sort_by(f64::total_cmp);
    let n = values.len();
    Statistics::Summary(Summary {
        mean: values.iter().sum::<f64>() / n as f64,
        median: percentile(&values, 50.0),
        p10: percentile(&values, 10.0),
        p25: percentile(&values, 25.0),
        p75: percentile(&values, 75.0),
        p90: percentile(&values, 90.0),
        min: values[0],
        max: values[n - 1],
        pixel_weighted_sum,
    })
}

/// `(A>0)*A*B/10000` with A the per-hectare raster and B the pixel area.
pub fn value_per_pixel_expr() -> Expr {
    Band::A.expr().positive_part() * Band::B.expr() / M2_PER_HA
}

/// Appends every record in order. The only writer of the statistics file.
pub fn append_records(path: &Path, records: &[StatsRecord]) -> Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut w = BufWriter::new(file);
    for r in records {
        writeln!(w, "{}", r.to_line())?;
    }
    w.flush()?;
    Ok(())
}

pub fn stats_file_name(date: &str) -> String {
    format!("tile_stats_{date}.txt")
}

/// Appends `records` to the dated statistics file in `work_dir` and hands the
/// file to `publisher`. Call once, after every tile finished.
pub fn write_and_publish(
    records: &[StatsRecord],
    date: &str,
    work_dir: &Path,
    publisher: &ResultPublisher<'_>,
    dir: &str,
) -> Result<PathBuf> {
    let name = stats_file_name(date);
    let path = work_dir.join(&name);
    append_records(&path, records)?;
    info!("{} record(s) appended to {}", records.len(), path.display());
    publisher.publish_file(&name, dir)?;
    Ok(path)
}

pub struct TileStatistics {
    pub dataset: Dataset,
    pub pixel_area: Dataset,
}

impl TileStatistics {
    pub fn plan(layout: &Layout, dataset: Dataset) -> (Self, PipelinePlan) {
        let pixel_area = layout.pixel_area.clone();
        let sources: [Source; 2] = [dataset.clone().into(), pixel_area.clone().into()];
        let plan = PipelinePlan {
            name: format!("tile_statistics_{}", dataset.pattern.name),
            tile_sources: sources.to_vec(),
            downloads: DownloadManifest::new(sources),
            outputs: Vec::new(),
        };
        (Self { dataset, pixel_area }, plan)
    }

    fn weighted_sum(&self, input: &Path, tile_id: &TileId, ctx: &TileContext<'_>) -> Result<f64> {
        let area = ctx.require_input(&self.pixel_area, tile_id)?;
        let stem = input.file_stem().unwrap_or_default().to_string_lossy();
        let per_pixel = ctx.work_dir.join(format!("{stem}_value_per_pixel.tif"));

        let job = CalcJob::new(value_per_pixel_expr(), &per_pixel)
            .input(Band::A, input)
            .input(Band::B, &area);
        ctx.calc.calc(&job)?;
        let sum = Raster::read(&per_pixel).map(|r| {
            r.data.iter().filter(|v| v.is_finite()).map(|&v| f64::from(v)).sum::<f64>()
        });
        if let Err(e) = fs::remove_file(&per_pixel) {
            debug!("could not remove {}: {e}", per_pixel.display());
        }
        sum
    }
}

impl TileTransform for TileStatistics {
    type Output = StatsRecord;

    fn name(&self) -> &'static str {
        "tile statistics"
    }

    fn apply(&self, tile_id: &TileId, ctx: &TileContext<'_>) -> Result<StatsRecord> {
        let input = ctx.require_input(&self.dataset, tile_id)?;
        let values = positive_values(&Raster::read(&input)?);
        let valid_pixel_count = values.len();
        let statistics = if values.is_empty() {
            Statistics::NotApplicable
        } else {
            summarize(values, self.weighted_sum(&input, tile_id, ctx)?)
        };
        Ok(StatsRecord {
            tile_id: tile_id.clone(),
            tile_path: input.file_name().unwrap_or_default().to_string_lossy().into_owned(),
            valid_pixel_count,
            statistics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calc::NativeCalc;
    use crate::config::{FilePattern, ModelType};
    use crate::transforms::testing;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn record(statistics: Statistics, count: usize) -> StatsRecord {
        StatsRecord {
            tile_id: TileId::parse("00N_000E").unwrap(),
            tile_path: "00N_000E_x.tif".into(),
            valid_pixel_count: count,
            statistics,
        }
    }

    #[test]
    fn no_valid_pixels_is_all_not_applicable() {
        let line = record(summarize(vec![], 0.0), 0).to_line();
        assert_eq!(line, "00N_000E, 00N_000E_x.tif, 0, N/A, N/A, N/A, N/A, N/A, N/A, N/A, N/A, N/A");
    }

    #[test]
    fn percentiles_match_numpy_linear() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_relative_eq!(percentile(&sorted, 50.0), 2.5);
        assert_relative_eq!(percentile(&sorted, 10.0), 1.3, epsilon = 1e-12);
        assert_relative_eq!(percentile(&sorted, 25.0), 1.75, epsilon = 1e-12);
        assert_relative_eq!(percentile(&sorted, 90.0), 3.7, epsilon = 1e-12);
        assert_relative_eq!(percentile(&[7.0], 90.0), 7.0);
    }

    #[test]
    fn scenario_mixed_nodata_values() {
        let dir = tempfile::tempdir().unwrap();
        let tile = TileId::parse("00N_000E").unwrap();
        let dataset = Dataset::new("s3://b/x/", FilePattern::tile_first("emis"));
        let layout = Layout::default();
        testing::tile(dir.path(), "00N_000E_emis.tif", 7, vec![1.0, 2.0, 3.0, 4.0, 0.0, 0.0, -9999.0]);
        testing::tile(
            dir.path(),
            &layout.pixel_area.pattern.file_name(&tile),
            7,
            vec![10_000.0; 7],
        );

        let (transform, plan) = TileStatistics::plan(&layout, dataset);
        assert!(plan.outputs.is_empty());
        let ctx = TileContext { work_dir: dir.path(), calc: &NativeCalc::default(), model_type: ModelType::Standard };
        let rec = transform.apply(&tile, &ctx).unwrap();

        assert_eq!(rec.valid_pixel_count, 4);
        let Statistics::Summary(s) = &rec.statistics else {
            panic!("expected a summary");
        };
        assert_relative_eq!(s.min, 1.0);
        assert_relative_eq!(s.max, 4.0);
        assert_relative_eq!(s.median, 2.5);
        assert_relative_eq!(s.mean, 2.5);
        assert_relative_eq!(s.pixel_weighted_sum, 10.0, max_relative = 1e-6);
        assert!(!dir.path().join("00N_000E_emis_value_per_pixel.tif").exists());
    }

    #[test]
    fn empty_tile_needs_no_pixel_area() {
        let dir = tempfile::tempdir().unwrap();
        let tile = TileId::parse("00N_000E").unwrap();
        testing::tile(dir.path(), "00N_000E_emis.tif", 2, vec![0.0, -1.0, 0.0, 0.0]);
        let (transform, _) =
            TileStatistics::plan(&Layout::default(), Dataset::new("s3://b/x/", FilePattern::tile_first("emis")));
        let ctx = TileContext { work_dir: dir.path(), calc: &NativeCalc::default(), model_type: ModelType::Standard };
        let rec = transform.apply(&tile, &ctx).unwrap();
        assert_eq!(rec.valid_pixel_count, 0);
        assert_eq!(rec.statistics, Statistics::NotApplicable);
    }

    #[test]
    fn records_are_appended_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(stats_file_name("20200101"));
        append_records(&path, &[record(Statistics::NotApplicable, 0)]).unwrap();
        let mut second = record(summarize(vec![2.0], 4.0), 1);
        second.tile_id = TileId::parse("00N_110E").unwrap();
        append_records(&path, &[second]).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("00N_000E, "));
        assert_eq!(lines[1], "00N_110E, 00N_000E_x.tif, 1, 2, 2, 2, 2, 2, 2, 2, 2, 4");
    }

    proptest! {
        #[test]
        fn order_statistics_are_monotone(values in prop::collection::vec(0.001f64..1e6, 1..200)) {
            let Statistics::Summary(s) = summarize(values, 0.0) else {
                panic!("non-empty input must summarize");
            };
            prop_assert!(s.min <= s.p10);
            prop_assert!(s.p10 <= s.p25);
            prop_assert!(s.p25 <= s.median);
            prop_assert!(s.median <= s.p75);
            prop_assert!(s.p75 <= s.p90);
            prop_assert!(s.p90 <= s.max);
        }
    }
}
