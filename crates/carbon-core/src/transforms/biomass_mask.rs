//! Year-2000 aboveground biomass outside mangroves and planted forests.

use log::debug;

use super::{TileContext, TileTransform};
use crate::calc::{Band, CalcJob, Expr};
use crate::config::{Dataset, FilePattern, Layout, ModelType, ProcessConfig, Source};
use crate::error::Result;
use crate::pipeline::PipelinePlan;
use crate::stage::DownloadManifest;
use crate::tile_id::TileId;
use crate::validate::is_valid_output;

/// Positive biomass in A, zeroed wherever any bound mask band is nonzero.
pub fn mask_expr(masks: &[Band]) -> Expr {
    masks
        .iter()
        .fold(Band::A.expr().positive_part(), |acc, m| acc * m.expr().eq_to(0.0))
}

pub struct NonMangroveBiomassMask {
    biomass: Dataset,
    mangrove: Dataset,
    planted: Dataset,
    output: FilePattern,
}

impl NonMangroveBiomassMask {
    pub fn plan(layout: &Layout, config: &ProcessConfig) -> (Self, PipelinePlan) {
        let biomass = match config.model_type {
            ModelType::BiomassSwap => layout.jpl_biomass_2000_unmasked.clone(),
            _ => layout.whrc_biomass_2000_unmasked.clone(),
        };
        let output = layout
            .biomass_2000_non_mang_non_planted
            .for_output(config.model_type, config.run_date.as_ref());
        let plan = PipelinePlan {
            name: "non_mangrove_non_planted_biomass".into(),
            tile_sources: vec![Source::from(biomass.clone())],
            downloads: DownloadManifest::new(
                [&biomass, &layout.mangrove_biomass_2000, &layout.planted_forest_unmasked]
                    .into_iter()
                    .map(|ds| Source::from(ds.clone())),
            ),
            outputs: vec![output.clone()],
        };
        let transform = Self {
            biomass,
            mangrove: layout.mangrove_biomass_2000.clone(),
            planted: layout.planted_forest_unmasked.clone(),
            output: output.pattern,
        };
        (transform, plan)
    }
}

impl TileTransform for NonMangroveBiomassMask {
    type Output = ();

    fn name(&self) -> &'static str {
        "non-mangrove non-planted biomass"
    }

    fn apply(&self, tile_id: &TileId, ctx: &TileContext<'_>) -> Result<()> {
        let biomass = ctx.require_input(&self.biomass, tile_id)?;
        let mut job_inputs = vec![(Band::A, biomass)];
        for (band, mask) in [(Band::B, &self.mangrove), (Band::C, &self.planted)] {
            match ctx.optional_input(mask, tile_id) {
                Some(path) => job_inputs.push((band, path)),
                None => debug!("{tile_id}: no {} tile, treating mask as empty", mask.pattern.name),
            }
        }

        let masks: Vec<Band> = job_inputs[1..].iter().map(|(b, _)| *b).collect();
        let job = job_inputs
            .into_iter()
            .fold(CalcJob::new(mask_expr(&masks), ctx.output_path(&self.output, tile_id)), |job, (band, path)| {
                job.input(band, path)
            });
        ctx.calc.calc(&job)
    }

    fn is_complete(&self, tile_id: &TileId, ctx: &TileContext<'_>) -> bool {
        is_valid_output(&ctx.output_path(&self.output, tile_id))
    }
}
