//! Cumulative CO2 removals 2001–2015 for all forest types:
//! annual removal rate × growth years × C→CO2, per carbon pool, then both
//! pools summed.

use super::{TileContext, TileTransform};
use crate::calc::{Band, CalcJob, Expr};
use crate::config::{Dataset, FilePattern, Layout, ProcessConfig, Source};
use crate::error::Result;
use crate::pipeline::PipelinePlan;
use crate::stage::DownloadManifest;
use crate::tile_id::TileId;
use crate::validate::is_valid_output;

/// Molecular weight ratio CO2 / C.
pub const C_TO_CO2: f64 = 44.0 / 12.0;

/// `(A>0)*(B>0)*A*B*(44/12)` for removal rate A (Mg C/ha/yr) and growth years B.
pub fn pool_expr() -> Expr {
    let (rate, years) = (Band::A.expr(), Band::B.expr());
    rate.clone().gt(0.0) * years.clone().gt(0.0) * rate * years * (Expr::from(44.0) / 12.0)
}

/// Aboveground (A) plus belowground (B), each clipped at zero.
pub fn total_expr() -> Expr {
    Band::A.expr().positive_part() + Band::B.expr().positive_part()
}

pub struct GrossRemovals {
    rate_agc: Dataset,
    rate_bgc: Dataset,
    gain_years: Dataset,
    out_agco2: FilePattern,
    out_bgco2: FilePattern,
    out_total: FilePattern,
}

impl GrossRemovals {
    pub fn plan(layout: &Layout, config: &ProcessConfig) -> (Self, PipelinePlan) {
        let out = |ds: &Dataset| ds.for_output(config.model_type, config.run_date.as_ref());
        let agco2 = out(&layout.cumul_removals_agco2_all_types);
        let bgco2 = out(&layout.cumul_removals_bgco2_all_types);
        let total = out(&layout.cumul_removals_agco2_bgco2_all_types);
        let plan = PipelinePlan {
            name: "gross_removals_all_forest_types".into(),
            tile_sources: vec![
                Source::from(layout.gain_year_count_all_types.clone()),
                Source::from(layout.annual_removals_agc_all_types.clone()),
            ],
            downloads: DownloadManifest::new(
                [
                    &layout.annual_removals_agc_all_types,
                    &layout.annual_removals_bgc_all_types,
                    &layout.gain_year_count_all_types,
                ]
                .into_iter()
                .map(|ds| Source::from(ds.clone())),
            ),
            outputs: vec![agco2.clone(), bgco2.clone(), total.clone()],
        };
        let transform = Self {
            rate_agc: layout.annual_removals_agc_all_types.clone(),
            rate_bgc: layout.annual_removals_bgc_all_types.clone(),
            gain_years: layout.gain_year_count_all_types.clone(),
            out_agco2: agco2.pattern,
            out_bgco2: bgco2.pattern,
            out_total: total.pattern,
        };
        (transform, plan)
    }
}

impl TileTransform for GrossRemovals {
    type Output = ();

    fn name(&self) -> &'static str {
        "gross removals"
    }

    fn apply(&self, tile_id: &TileId, ctx: &TileContext<'_>) -> Result<()> {
        let years = ctx.require_input(&self.gain_years, tile_id)?;
        let agco2 = ctx.output_path(&self.out_agco2, tile_id);
        let bgco2 = ctx.output_path(&self.out_bgco2, tile_id);

        for (rate, output) in [(&self.rate_agc, &agco2), (&self.rate_bgc, &bgco2)] {
            let rate = ctx.require_input(rate, tile_id)?;
            let job = CalcJob::new(pool_expr(), output)
                .input(Band::A, rate)
                .input(Band::B, &years);
            ctx.calc.calc(&job)?;
        }

        let job = CalcJob::new(total_expr(), ctx.output_path(&self.out_total, tile_id))
            .input(Band::A, &agco2)
            .input(Band::B, &bgco2);
        ctx.calc.calc(&job)
    }

    fn is_complete(&self, tile_id: &TileId, ctx: &TileContext<'_>) -> bool {
        is_valid_output(&ctx.output_path(&self.out_total, tile_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calc::NativeCalc;
    use crate::config::{ModelType, WorkerLimits};
    use crate::transforms::testing;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn removals_never_negative(
            ag_rate in 0.0f64..50.0,
            bg_rate in 0.0f64..20.0,
            years in 0.0f64..15.0,
        ) {
            let ag = pool_expr().eval(&[ag_rate, years]);
            let bg = pool_expr().eval(&[bg_rate, years]);
            prop_assert!(ag >= 0.0 && bg >= 0.0);
            prop_assert!(total_expr().eval(&[ag, bg]) >= 0.0);
        }
    }

    #[test]
    fn pool_formula() {
        assert_relative_eq!(pool_expr().eval(&[3.0, 10.0]), 3.0 * 10.0 * C_TO_CO2);
        assert_eq!(pool_expr().eval(&[3.0, 0.0]), 0.0);
        assert_eq!(pool_expr().eval(&[-3.0, 10.0]), 0.0);
    }

    #[test]
    fn tile_run_sums_both_pools() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::default();
        let tile = TileId::parse("10N_020E").unwrap();
        let config = ProcessConfig::from_args(
            "maxgain",
            "10N_020E",
            Some("20210615"),
            true,
            WorkerLimits { transform: 1, validate: 1 },
            dir.path(),
        )
        .unwrap();
        let (transform, plan) = GrossRemovals::plan(&layout, &config);
        assert!(plan.outputs[2].dir.contains("/maxgain/"));
        assert!(plan.outputs[2].dir.contains("/20210615/"));

        let name = |ds: &Dataset| ds.pattern.file_name(&tile);
        testing::tile(dir.path(), &name(&layout.annual_removals_agc_all_types), 2, vec![1.2, 0.0, 2.0, 3.0]);
        testing::tile(dir.path(), &name(&layout.annual_removals_bgc_all_types), 2, vec![0.6, 0.0, 1.0, 1.5]);
        testing::tile(dir.path(), &name(&layout.gain_year_count_all_types), 2, vec![15.0, 15.0, 0.0, 2.0]);

        let ctx = TileContext { work_dir: dir.path(), calc: &NativeCalc::default(), model_type: ModelType::MaxGain };
        transform.apply(&tile, &ctx).unwrap();

        let total = testing::read(&dir.path().join(name(&plan.outputs[2])));
        let expected = [(1.2 + 0.6) * 15.0 * C_TO_CO2, 0.0, 0.0, (3.0 + 1.5) * 2.0 * C_TO_CO2];
        for (got, want) in total.iter().zip(expected) {
            assert_relative_eq!(f64::from(*got), want, max_relative = 1e-5);
        }
        assert!(plan.outputs[2].pattern.name.ends_with("_maxgain"));
    }
}
