//! Years of carbon removal for mangrove pixels.
//!
//! Each pixel falls into at most one of four categories by its loss year
//! (A, 0 = no loss), binary gain flag (B) and mangrove biomass (C). Each
//! category gets its own raster; the four are then merged into one.

use super::{TileContext, TileTransform};
use crate::calc::{Band, CalcJob, Expr, MergeJob};
use crate::config::{Dataset, FilePattern, Layout, ProcessConfig, Source};
use crate::error::Result;
use crate::pipeline::PipelinePlan;
use crate::stage::DownloadManifest;
use crate::tile_id::TileId;
use crate::validate::is_valid_output;

/// Length of the loss record (2001–2015).
pub const LOSS_YEARS: u32 = 15;
/// Length of the gain record (2001–2012).
pub const GAIN_YEARS: u32 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrowthCategory {
    LossOnly,
    GainOnly,
    NoChange,
    LossAndGain,
}

fn loss() -> Expr {
    Band::A.expr()
}
fn gain() -> Expr {
    Band::B.expr()
}
fn mangrove() -> Expr {
    Band::C.expr()
}

impl GrowthCategory {
    /// Merge order.
    pub const ALL: [GrowthCategory; 4] = [
        GrowthCategory::LossOnly,
        GrowthCategory::GainOnly,
        GrowthCategory::NoChange,
        GrowthCategory::LossAndGain,
    ];

    /// 1 where a pixel belongs to the category, else 0.
    pub fn predicate(self) -> Expr {
        let (had_loss, gain_flag) = match self {
            GrowthCategory::LossOnly => (true, 0.0),
            GrowthCategory::GainOnly => (false, 1.0),
            GrowthCategory::NoChange => (false, 0.0),
            GrowthCategory::LossAndGain => (true, 1.0),
        };
        let loss_test = if had_loss { loss().gt(0.0) } else { loss().eq_to(0.0) };
        loss_test * gain().eq_to(gain_flag) * mangrove().gt(0.0)
    }

    /// Growth years for a pixel in the category.
    pub fn years(self, loss_years: u32, gain_years: u32) -> Expr {
        match self {
            GrowthCategory::LossOnly => loss() - 1.0,
            GrowthCategory::GainOnly => Expr::from(f64::from(gain_years) / 2.0),
            GrowthCategory::NoChange => Expr::from(f64::from(loss_years)),
            GrowthCategory::LossAndGain => {
                (loss() - 1.0) + (Expr::from(f64::from(loss_years + 1)) - loss()) / 2.0
            }
        }
    }

    pub fn expr(self, loss_years: u32, gain_years: u32) -> Expr {
        self.predicate() * self.years(loss_years, gain_years)
    }
}

pub struct GainYearCountMangrove {
    loss: Dataset,
    gain: Dataset,
    mangrove: Dataset,
    categories: Vec<(GrowthCategory, FilePattern)>,
    merged: FilePattern,
    pub loss_years: u32,
    pub gain_years: u32,
}

impl GainYearCountMangrove {
    pub fn plan(layout: &Layout, config: &ProcessConfig) -> (Self, PipelinePlan) {
        let out = |ds: &Dataset| ds.for_output(config.model_type, config.run_date.as_ref());
        let category_outputs = [
            (GrowthCategory::LossOnly, out(&layout.growth_years_loss_only)),
            (GrowthCategory::GainOnly, out(&layout.growth_years_gain_only)),
            (GrowthCategory::NoChange, out(&layout.growth_years_no_change)),
            (GrowthCategory::LossAndGain, out(&layout.growth_years_loss_and_gain)),
        ];
        let merged = out(&layout.gain_year_count_mangrove);

        let mut outputs: Vec<Dataset> = category_outputs.iter().map(|(_, ds)| ds.clone()).collect();
        outputs.push(merged.clone());

        let plan = PipelinePlan {
            name: "gain_year_count_mangrove".into(),
            tile_sources: vec![Source::from(layout.mangrove_biomass_2000.clone())],
            downloads: DownloadManifest::new(
                [&layout.loss, &layout.gain, &layout.mangrove_biomass_2000]
                    .into_iter()
                    .map(|ds| Source::from(ds.clone())),
            ),
            outputs,
        };
        let transform = Self {
            loss: layout.loss.clone(),
            gain: layout.gain.clone(),
            mangrove: layout.mangrove_biomass_2000.clone(),
            categories: category_outputs.into_iter().map(|(c, ds)| (c, ds.pattern)).collect(),
            merged: merged.pattern,
            loss_years: LOSS_YEARS,
            gain_years: GAIN_YEARS,
        };
        (transform, plan)
    }
}

impl TileTransform for GainYearCountMangrove {
    type Output = ();

    fn name(&self) -> &'static str {
        "gain year count (mangrove)"
    }

    fn apply(&self, tile_id: &TileId, ctx: &TileContext<'_>) -> Result<()> {
        let loss = ctx.require_input(&self.loss, tile_id)?;
        let gain = ctx.require_input(&self.gain, tile_id)?;
        let mangrove = ctx.require_input(&self.mangrove, tile_id)?;

        let mut parts = Vec::with_capacity(self.categories.len());
        for (category, pattern) in &self.categories {
            let output = ctx.output_path(pattern, tile_id);
            let job = CalcJob::new(category.expr(self.loss_years, self.gain_years), &output)
                .input(Band::A, &loss)
                .input(Band::B, &gain)
                .input(Band::C, &mangrove);
            ctx.calc.calc(&job)?;
            parts.push(output);
        }
        ctx.calc.merge(&MergeJob::new(parts, ctx.output_path(&self.merged, tile_id)))
    }

    fn is_complete(&self, tile_id: &TileId, ctx: &TileContext<'_>) -> bool {
        is_valid_output(&ctx.output_path(&self.merged, tile_id))
    }
}
