//! Run configuration: model variant, run date, worker limits, and the dataset
//! layout (remote directories and file-name patterns).

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::tile_id::{TileId, TileSelection};

// ── Model variants ────────────────────────────────────────────────────────────

/// Standard model run or one of the sensitivity-analysis variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelType {
    #[serde(rename = "std")]
    Standard,
    #[serde(rename = "maxgain")]
    MaxGain,
    #[serde(rename = "no_shifting_ag")]
    NoShiftingAg,
    #[serde(rename = "convert_to_grassland")]
    ConvertToGrassland,
    #[serde(rename = "biomass_swap")]
    BiomassSwap,
    #[serde(rename = "US_removals")]
    UsRemovals,
    #[serde(rename = "no_primary_gain")]
    NoPrimaryGain,
    #[serde(rename = "legal_Amazon_loss")]
    LegalAmazonLoss,
    #[serde(rename = "Mekong_loss")]
    MekongLoss,
}

impl ModelType {
    pub const ALL: [ModelType; 9] = [
        ModelType::Standard,
        ModelType::MaxGain,
        ModelType::NoShiftingAg,
        ModelType::ConvertToGrassland,
        ModelType::BiomassSwap,
        ModelType::UsRemovals,
        ModelType::NoPrimaryGain,
        ModelType::LegalAmazonLoss,
        ModelType::MekongLoss,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ModelType::Standard => "std",
            ModelType::MaxGain => "maxgain",
            ModelType::NoShiftingAg => "no_shifting_ag",
            ModelType::ConvertToGrassland => "convert_to_grassland",
            ModelType::BiomassSwap => "biomass_swap",
            ModelType::UsRemovals => "US_removals",
            ModelType::NoPrimaryGain => "no_primary_gain",
            ModelType::LegalAmazonLoss => "legal_Amazon_loss",
            ModelType::MekongLoss => "Mekong_loss",
        }
    }

    pub fn is_standard(self) -> bool {
        self == ModelType::Standard
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ModelType::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| Error::UnknownModelType {
                given: s.to_owned(),
                expected: ModelType::ALL.map(ModelType::as_str).join(", "),
            })
    }
}

// ── Run date ──────────────────────────────────────────────────────────────────

/// Date stamp (`YYYYMMDD`) substituted into output directory names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDate(String);

impl RunDate {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for RunDate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let digits_only = s.len() == 8 && s.bytes().all(|b| b.is_ascii_digit());
        if !digits_only || NaiveDate::parse_from_str(s, "%Y%m%d").is_err() {
            return Err(Error::InvalidRunDate(s.to_owned()));
        }
        Ok(Self(s.to_owned()))
    }
}

// ── File patterns and datasets ────────────────────────────────────────────────

/// Where the tile id sits in a file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameOrder {
    /// `{tile_id}_{pattern}.tif`
    TileFirst,
    /// `{pattern}_{tile_id}.tif`
    PatternFirst,
    /// `{tile_id}.tif`; the pattern name is only a label.
    TileOnly,
}

/// Semantic name of a raster product plus how it is spelled on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePattern {
    pub name: String,
    pub order: NameOrder,
}

impl FilePattern {
    pub fn tile_first(name: impl Into<String>) -> Self {
        Self { name: name.into(), order: NameOrder::TileFirst }
    }

    pub fn pattern_first(name: impl Into<String>) -> Self {
        Self { name: name.into(), order: NameOrder::PatternFirst }
    }

    pub fn tile_only(label: impl Into<String>) -> Self {
        Self { name: label.into(), order: NameOrder::TileOnly }
    }

    pub fn file_name(&self, tile_id: &TileId) -> String {
        match self.order {
            NameOrder::TileFirst => format!("{tile_id}_{}.tif", self.name),
            NameOrder::PatternFirst => format!("{}_{tile_id}.tif", self.name),
            NameOrder::TileOnly => format!("{tile_id}.tif"),
        }
    }

    /// Tile id of `file_name` if the name is spelled by this pattern.
    pub fn tile_of(&self, file_name: &str) -> Option<TileId> {
        let id = TileId::find_in(file_name)?;
        (self.file_name(&id) == file_name).then_some(id)
    }

    /// Shell-style glob selecting every tile of this pattern.
    pub fn glob(&self) -> String {
        match self.order {
            NameOrder::TileFirst => format!("*_{}.tif", self.name),
            NameOrder::PatternFirst => format!("{}_*.tif", self.name),
            NameOrder::TileOnly => "*.tif".to_owned(),
        }
    }

    /// Pattern of the sensitivity-analysis version of this product.
    pub fn for_model(&self, model: ModelType) -> Self {
        if model.is_standard() || self.order == NameOrder::TileOnly {
            return self.clone();
        }
        Self { name: format!("{}_{}", self.name, model.as_str()), order: self.order }
    }
}

/// A remote directory holding one raster product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub dir: String,
    pub pattern: FilePattern,
}

const STANDARD_SEGMENT: &str = "/standard/";

impl Dataset {
    pub fn new(dir: impl Into<String>, pattern: FilePattern) -> Self {
        Self { dir: dir.into(), pattern }
    }

    /// Sensitivity-analysis counterpart of an input, if the directory has a
    /// `standard` segment to swap.
    pub fn variant(&self, model: ModelType) -> Option<Self> {
        if model.is_standard() || !self.dir.contains(STANDARD_SEGMENT) {
            return None;
        }
        Some(Self {
            dir: self.dir.replacen(STANDARD_SEGMENT, &format!("/{}/", model.as_str()), 1),
            pattern: self.pattern.for_model(model),
        })
    }

    /// Where an output of this run goes: variant directory and pattern, with
    /// the directory's date segment replaced by the run date.
    pub fn for_output(&self, model: ModelType, run_date: Option<&RunDate>) -> Self {
        let mut out = self.variant(model).unwrap_or_else(|| Self {
            dir: self.dir.clone(),
            pattern: self.pattern.for_model(model),
        });
        if let Some(date) = run_date {
            out.dir = replace_date_segment(&out.dir, date);
        }
        out
    }
}

/// Replaces the last all-digit, 8-character path segment with `date`.
fn replace_date_segment(dir: &str, date: &RunDate) -> String {
    let trailing = dir.ends_with('/');
    let mut segments: Vec<&str> = dir.trim_end_matches('/').split('/').collect();
    if let Some(seg) = segments
        .iter_mut()
        .rev()
        .find(|s| s.len() == 8 && s.bytes().all(|b| b.is_ascii_digit()))
    {
        *seg = date.as_str();
    }
    let mut joined = segments.join("/");
    if trailing {
        joined.push('/');
    }
    joined
}

/// Where a pipeline finds one kind of input tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Dataset(Dataset),
    /// Files in `dir` matching `template`, a glob in which `{tile_id}`
    /// stands for the tile label.
    Matching { dir: String, template: String },
}

const TILE_PLACEHOLDER: &str = "{tile_id}";

impl Source {
    pub fn dir(&self) -> &str {
        match self {
            Source::Dataset(ds) => &ds.dir,
            Source::Matching { dir, .. } => dir,
        }
    }

    /// Include filter selecting one tile's files.
    pub fn include_for(&self, tile_id: &TileId) -> String {
        match self {
            Source::Dataset(ds) => ds.pattern.file_name(tile_id),
            Source::Matching { template, .. } => template.replace(TILE_PLACEHOLDER, tile_id.as_str()),
        }
    }

    /// Include filter selecting every tile's files.
    pub fn include_all(&self) -> String {
        match self {
            Source::Dataset(ds) => ds.pattern.glob(),
            Source::Matching { template, .. } => {
                // adjacent stars would read as a recursive wildcard
                let mut glob = template.replace(TILE_PLACEHOLDER, "*");
                while glob.contains("**") {
                    glob = glob.replace("**", "*");
                }
                glob
            }
        }
    }

    pub fn tile_of(&self, file_name: &str) -> Option<TileId> {
        match self {
            Source::Dataset(ds) => ds.pattern.tile_of(file_name),
            Source::Matching { .. } => {
                let id = TileId::find_in(file_name)?;
                let pattern = glob::Pattern::new(&self.include_for(&id)).ok()?;
                pattern.matches(file_name).then_some(id)
            }
        }
    }

    pub fn variant(&self, model: ModelType) -> Option<Self> {
        match self {
            Source::Dataset(ds) => ds.variant(model).map(Source::Dataset),
            Source::Matching { .. } => None,
        }
    }
}

impl From<Dataset> for Source {
    fn from(ds: Dataset) -> Self {
        Source::Dataset(ds)
    }
}

// ── Layout ────────────────────────────────────────────────────────────────────

const MODEL_ROOT: &str = "s3://gfw2-data/climate/carbon_model";

fn model_dir(rel: &str) -> String {
    format!("{MODEL_ROOT}/{rel}/")
}

/// Every dataset the pipelines read or write. Defaults mirror the production
/// bucket; a JSON file can override any entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Layout {
    pub loss: Dataset,
    pub gain: Dataset,
    pub mangrove_biomass_2000: Dataset,
    pub gain_year_count_mangrove: Dataset,
    pub growth_years_loss_only: Dataset,
    pub growth_years_gain_only: Dataset,
    pub growth_years_no_change: Dataset,
    pub growth_years_loss_and_gain: Dataset,
    pub annual_removals_agc_all_types: Dataset,
    pub annual_removals_bgc_all_types: Dataset,
    pub gain_year_count_all_types: Dataset,
    pub cumul_removals_agco2_all_types: Dataset,
    pub cumul_removals_bgco2_all_types: Dataset,
    pub cumul_removals_agco2_bgco2_all_types: Dataset,
    pub whrc_biomass_2000_unmasked: Dataset,
    pub jpl_biomass_2000_unmasked: Dataset,
    pub planted_forest_unmasked: Dataset,
    pub biomass_2000_non_mang_non_planted: Dataset,
    pub pixel_area: Dataset,
    pub tile_stats_dir: String,
    pub burn_date_raw_dir: String,
    pub burn_year: Dataset,
}

impl Default for Layout {
    fn default() -> Self {
        let growth = |name: &str| {
            Dataset::new(
                model_dir("gain_year_count_mangrove/standard/20200101"),
                FilePattern::pattern_first(name),
            )
        };
        Self {
            loss: Dataset::new(
                "s3://gfw2-data/forest_change/hansen_2015/Loss_tiles/",
                FilePattern::tile_only("loss"),
            ),
            gain: Dataset::new(
                "s3://gfw2-data/forest_change/tree_cover_gain/gaindata_2012/",
                FilePattern::pattern_first("Hansen_GFC2015_gain"),
            ),
            mangrove_biomass_2000: Dataset::new(
                model_dir("mangrove_biomass/processed/standard/20190220"),
                FilePattern::tile_first("mangrove_agb_t_ha_2000"),
            ),
            gain_year_count_mangrove: Dataset::new(
                model_dir("gain_year_count_mangrove/standard/20200101"),
                FilePattern::tile_first("gain_year_count_mangrove"),
            ),
            growth_years_loss_only: growth("growth_years_loss_only"),
            growth_years_gain_only: growth("growth_years_gain_only"),
            growth_years_no_change: growth("growth_years_no_change"),
            growth_years_loss_and_gain: growth("growth_years_loss_and_gain"),
            annual_removals_agc_all_types: Dataset::new(
                model_dir("annual_removal_factor_AGC_all_forest_types/standard/20200101"),
                FilePattern::tile_first("annual_removal_factor_AGC_Mg_ha_all_forest_types"),
            ),
            annual_removals_bgc_all_types: Dataset::new(
                model_dir("annual_removal_factor_BGC_all_forest_types/standard/20200101"),
                FilePattern::tile_first("annual_removal_factor_BGC_Mg_ha_all_forest_types"),
            ),
            gain_year_count_all_types: Dataset::new(
                model_dir("gain_year_count_all_forest_types/standard/20200101"),
                FilePattern::tile_first("gain_year_count_all_forest_types"),
            ),
            cumul_removals_agco2_all_types: Dataset::new(
                model_dir("gross_removals_AGCO2_all_forest_types/standard/per_hectare/20200101"),
                FilePattern::tile_first("gross_removals_AGCO2_Mg_ha_all_forest_types_2001_15"),
            ),
            cumul_removals_bgco2_all_types: Dataset::new(
                model_dir("gross_removals_BGCO2_all_forest_types/standard/per_hectare/20200101"),
                FilePattern::tile_first("gross_removals_BGCO2_Mg_ha_all_forest_types_2001_15"),
            ),
            cumul_removals_agco2_bgco2_all_types: Dataset::new(
                model_dir("gross_removals_AGCO2_BGCO2_all_forest_types/standard/per_hectare/20200101"),
                FilePattern::tile_first("gross_removals_AGCO2_BGCO2_Mg_ha_all_forest_types_2001_15"),
            ),
            whrc_biomass_2000_unmasked: Dataset::new(
                "s3://gfw2-data/climate/WHRC_biomass/WHRC_V4/Processed/",
                FilePattern::tile_first("t_aboveground_biomass_ha_2000"),
            ),
            jpl_biomass_2000_unmasked: Dataset::new(
                model_dir("biomass/JPL/processed/20190220"),
                FilePattern::tile_first("Mg_aboveground_biomass_ha_2000_JPL"),
            ),
            planted_forest_unmasked: Dataset::new(
                model_dir("annual_gain_rate_AGC_BGC_planted_forest_unmasked/standard/20190201"),
                FilePattern::tile_first("annual_gain_rate_AGC_BGC_t_ha_planted_forest_unmasked"),
            ),
            biomass_2000_non_mang_non_planted: Dataset::new(
                model_dir("biomass/WHRC_non_mangrove_non_planted/standard/20200101"),
                FilePattern::tile_first("t_aboveground_biomass_ha_2000_non_mangrove_non_planted"),
            ),
            pixel_area: Dataset::new(
                "s3://gfw2-data/climate/carbon_model/other_emissions_inputs/pixel_area/",
                FilePattern::pattern_first("hanson_2013_area"),
            ),
            tile_stats_dir: model_dir("tile_stats"),
            burn_date_raw_dir: model_dir("other_emissions_inputs/burn_year/raw_hdf"),
            burn_year: Dataset::new(
                model_dir("other_emissions_inputs/burn_year/burn_year_modis/standard/20200101"),
                FilePattern::tile_first("burnyear"),
            ),
        }
    }
}

impl Layout {
    /// Default layout, overridden by the JSON file at `path` when given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            None => Ok(Self::default()),
            Some(p) => {
                let text = fs::read_to_string(p)?;
                Ok(serde_json::from_str(&text)?)
            }
        }
    }

    /// Dataset entry by field name, e.g. `gain_year_count_mangrove`.
    pub fn dataset(&self, name: &str) -> Result<Dataset> {
        let entry = serde_json::to_value(self)?
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Config(format!("no dataset named `{name}` in the layout")))?;
        serde_json::from_value(entry).map_err(|_| Error::Config(format!("layout entry `{name}` is not a dataset")))
    }
}

// ── Process configuration ─────────────────────────────────────────────────────

/// Pool sizes for the transform and validation phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkerLimits {
    pub transform: usize,
    pub validate: usize,
}

/// Worker cap used for the validation pass when none is given.
pub const DEFAULT_VALIDATE_CAP: usize = 55;

impl WorkerLimits {
    /// Host CPU count, capped by the per-pipeline memory-driven limits.
    pub fn capped(transform_cap: usize, validate_cap: usize) -> Self {
        let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self {
            transform: cpus.min(transform_cap).max(1),
            validate: cpus.min(validate_cap).max(1),
        }
    }

    /// Replaces either limit with an explicit operator choice.
    pub fn with_overrides(self, transform: Option<usize>, validate: Option<usize>) -> Result<Self> {
        let pick = |given: Option<usize>, default: usize, what: &str| match given {
            Some(0) => Err(Error::Config(format!("{what} worker count must be at least 1"))),
            Some(n) => Ok(n),
            None => Ok(default),
        };
        Ok(Self {
            transform: pick(transform, self.transform, "transform")?,
            validate: pick(validate, self.validate, "validation")?,
        })
    }
}

/// Run-wide parameters; fixed once parsed.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub model_type: ModelType,
    pub tiles: TileSelection,
    pub run_date: Option<RunDate>,
    pub upload: bool,
    pub workers: WorkerLimits,
    pub work_dir: PathBuf,
    /// Re-run tiles whose outputs already exist and hold data.
    pub overwrite: bool,
}

impl ProcessConfig {
    /// Validates the command-line strings before any tile work starts.
    pub fn from_args(
        model_type: &str,
        tile_id_list: &str,
        run_date: Option<&str>,
        no_upload: bool,
        workers: WorkerLimits,
        work_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        Ok(Self {
            model_type: model_type.parse()?,
            tiles: tile_id_list.parse()?,
            run_date: run_date.map(str::parse::<RunDate>).transpose()?,
            upload: !no_upload,
            workers,
            work_dir: work_dir.into(),
            overwrite: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> RunDate {
        s.parse().unwrap()
    }

    #[test]
    fn model_type_roundtrip() {
        for m in ModelType::ALL {
            assert_eq!(m.as_str().parse::<ModelType>().unwrap(), m);
        }
    }

    #[test]
    fn unknown_model_type_lists_choices() {
        let err = "maxgian".parse::<ModelType>().unwrap_err().to_string();
        assert!(err.contains("maxgian"));
        assert!(err.contains("biomass_swap"));
    }

    #[test]
    fn run_date_validation() {
        assert!("20200314".parse::<RunDate>().is_ok());
        assert!("2020-03-14".parse::<RunDate>().is_err());
        assert!("20201340".parse::<RunDate>().is_err());
        assert!("2020031".parse::<RunDate>().is_err());
    }

    #[test]
    fn file_pattern_naming() {
        let id = TileId::parse("00N_110E").unwrap();
        assert_eq!(FilePattern::tile_first("gain_year_count").file_name(&id), "00N_110E_gain_year_count.tif");
        assert_eq!(FilePattern::pattern_first("hanson_2013_area").file_name(&id), "hanson_2013_area_00N_110E.tif");
        assert_eq!(FilePattern::tile_only("loss").file_name(&id), "00N_110E.tif");
    }

    #[test]
    fn tile_of_rejects_other_patterns() {
        let p = FilePattern::tile_first("gain_year_count");
        assert_eq!(p.tile_of("00N_110E_gain_year_count.tif").unwrap().as_str(), "00N_110E");
        assert!(p.tile_of("00N_110E_gain_year_count_maxgain.tif").is_none());
        assert!(p.tile_of("00N_110E.tif").is_none());
    }

    #[test]
    fn output_dataset_for_sensitivity_and_date() {
        let ds = Dataset::new(
            "s3://bucket/model/gross_removals/standard/per_hectare/20200101/",
            FilePattern::tile_first("gross_removals"),
        );
        let out = ds.for_output(ModelType::MaxGain, Some(&date("20210615")));
        assert_eq!(out.dir, "s3://bucket/model/gross_removals/maxgain/per_hectare/20210615/");
        assert_eq!(out.pattern.name, "gross_removals_maxgain");

        let std_out = ds.for_output(ModelType::Standard, None);
        assert_eq!(std_out, ds);
    }

    #[test]
    fn variant_requires_standard_segment() {
        let ds = Dataset::new("s3://bucket/pixel_area/", FilePattern::pattern_first("area"));
        assert!(ds.variant(ModelType::BiomassSwap).is_none());
    }

    #[test]
    fn matching_source_filters() {
        let src = Source::Matching {
            dir: "s3://bucket/raw/".into(),
            template: "MCD64A1.A2006*{tile_id}*.tif".into(),
        };
        let id = TileId::parse("h29v08").unwrap();
        assert_eq!(src.include_for(&id), "MCD64A1.A2006*h29v08*.tif");
        assert_eq!(src.include_all(), "MCD64A1.A2006*.tif");
        assert_eq!(src.tile_of("MCD64A1.A2006032.h29v08.006.tif"), Some(id));
        assert!(src.tile_of("MCD64A1.A2007032.h29v08.006.tif").is_none());
        assert!(src.variant(ModelType::MaxGain).is_none());
    }

    #[test]
    fn layout_json_overrides_single_entry() {
        let json = r#"{ "tile_stats_dir": "s3://other/tile_stats/" }"#;
        let layout: Layout = serde_json::from_str(json).unwrap();
        assert_eq!(layout.tile_stats_dir, "s3://other/tile_stats/");
        assert_eq!(layout.gain.pattern.name, "Hansen_GFC2015_gain");
    }

    #[test]
    fn dataset_lookup_by_name() {
        let layout = Layout::default();
        assert_eq!(layout.dataset("pixel_area").unwrap(), layout.pixel_area);
        assert!(matches!(layout.dataset("tile_stats_dir"), Err(Error::Config(_))));
        assert!(matches!(layout.dataset("missing"), Err(Error::Config(_))));
    }

    #[test]
    fn worker_overrides() {
        let limits = WorkerLimits { transform: 4, validate: 8 };
        assert_eq!(limits.with_overrides(Some(2), None).unwrap(), WorkerLimits { transform: 2, validate: 8 });
        assert!(limits.with_overrides(Some(0), None).is_err());
    }

    #[test]
    fn process_config_fails_fast() {
        let limits = WorkerLimits { transform: 1, validate: 1 };
        assert!(ProcessConfig::from_args("std", "00N_000E", None, false, limits, ".").is_ok());
        assert!(ProcessConfig::from_args("nope", "00N_000E", None, false, limits, ".").is_err());
        assert!(ProcessConfig::from_args("std", "00N_000E,", None, false, limits, ".").is_err());
        assert!(ProcessConfig::from_args("std", "all", Some("2020"), false, limits, ".").is_err());
    }
}
