//! Tile identifiers and tile-list arguments.
//!
//! Two grids are in use: the 10°×10° lat/lon grid (`00N_000E`, `20S_120W`)
//! shared by the carbon model inputs, and the MODIS sinusoidal grid
//! (`h29v08`) used by the burned-area product.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Opaque, validated tile label. Never mutated after parsing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TileId(String);

const LATLON_LEN: usize = 8;
const MODIS_LEN: usize = 6;

fn is_latlon_label(b: &[u8]) -> bool {
    b.len() == LATLON_LEN
        && b[0].is_ascii_digit()
        && b[1].is_ascii_digit()
        && (b[2] == b'N' || b[2] == b'S')
        && b[3] == b'_'
        && b[4..7].iter().all(u8::is_ascii_digit)
        && (b[7] == b'E' || b[7] == b'W')
}

fn is_modis_label(b: &[u8]) -> bool {
    b.len() == MODIS_LEN
        && b[0] == b'h'
        && b[1].is_ascii_digit()
        && b[2].is_ascii_digit()
        && b[3] == b'v'
        && b[4].is_ascii_digit()
        && b[5].is_ascii_digit()
}

impl TileId {
    pub fn parse(s: &str) -> Result<Self> {
        let b = s.as_bytes();
        if is_latlon_label(b) || is_modis_label(b) {
            Ok(Self(s.to_owned()))
        } else {
            Err(Error::InvalidTileId(s.to_owned()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First tile label embedded in a file name, e.g.
    ///   "00N_000E.tif"                     → 00N_000E
    ///   "Hansen_GFC2015_gain_20S_120W.tif" → 20S_120W
    ///   "MCD64A1.A2006032.h29v08.006.tif"  → h29v08
    pub fn find_in(name: &str) -> Option<Self> {
        let b = name.as_bytes();
        for i in 0..b.len() {
            if i + LATLON_LEN <= b.len() && is_latlon_label(&b[i..i + LATLON_LEN]) {
                return Some(Self(name[i..i + LATLON_LEN].to_owned()));
            }
            if i + MODIS_LEN <= b.len() && is_modis_label(&b[i..i + MODIS_LEN]) {
                // "h29v08" inside a longer alphanumeric run is not a label.
                let before_ok = i == 0 || !b[i - 1].is_ascii_alphanumeric();
                let after_ok = i + MODIS_LEN == b.len() || !b[i + MODIS_LEN].is_ascii_alphanumeric();
                if before_ok && after_ok {
                    return Some(Self(name[i..i + MODIS_LEN].to_owned()));
                }
            }
        }
        None
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TileId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TileId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<TileId> for String {
    fn from(id: TileId) -> Self {
        id.0
    }
}

/// Value of the `--tile-id-list` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileSelection {
    /// Every tile eligible for the pipeline, resolved from storage listings.
    All,
    /// Explicit tiles, de-duplicated, in the order given.
    Explicit(Vec<TileId>),
}

impl FromStr for TileSelection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(TileSelection::All);
        }
        if s.is_empty() {
            return Err(Error::InvalidTileList("empty list".into()));
        }

        let mut seen = BTreeSet::new();
        let mut tiles = Vec::new();
        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                return Err(Error::InvalidTileList(format!("empty entry in `{s}`")));
            }
            let id = TileId::parse(part)
                .map_err(|_| Error::InvalidTileList(format!("`{part}` is not a tile id")))?;
            if seen.insert(id.clone()) {
                tiles.push(id);
            }
        }
        Ok(TileSelection::Explicit(tiles))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_latlon_and_modis() {
        for good in ["00N_000E", "20S_120W", "h29v08"] {
            assert_eq!(TileId::parse(good).unwrap().as_str(), good);
        }
    }

    #[test]
    fn parse_rejects_malformed() {
        for bad in ["00N000E", "0N_000E", "00X_000E", "00N_000Q", "h2v08", "", "all"] {
            assert!(TileId::parse(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn find_in_file_names() {
        assert_eq!(TileId::find_in("00N_000E.tif").unwrap().as_str(), "00N_000E");
        assert_eq!(
            TileId::find_in("Hansen_GFC2015_gain_20S_120W.tif").unwrap().as_str(),
            "20S_120W"
        );
        assert_eq!(
            TileId::find_in("10N_060W_t_aboveground_biomass_ha_2000.tif").unwrap().as_str(),
            "10N_060W"
        );
        assert_eq!(
            TileId::find_in("MCD64A1.A2006032.h29v08.006.tif").unwrap().as_str(),
            "h29v08"
        );
        assert!(TileId::find_in("tile_stats.txt").is_none());
    }

    #[test]
    fn selection_all_keyword() {
        assert_eq!("all".parse::<TileSelection>().unwrap(), TileSelection::All);
    }

    #[test]
    fn selection_explicit_dedupes_in_order() {
        let sel: TileSelection = "00N_110E, 00N_000E,00N_110E".parse().unwrap();
        let TileSelection::Explicit(ids) = sel else {
            panic!("expected explicit list");
        };
        let names: Vec<&str> = ids.iter().map(TileId::as_str).collect();
        assert_eq!(names, ["00N_110E", "00N_000E"]);
    }

    #[test]
    fn selection_rejects_malformed_entries() {
        assert!("00N_110E,,00N_000E".parse::<TileSelection>().is_err());
        assert!("00N_110E,bogus".parse::<TileSelection>().is_err());
        assert!("".parse::<TileSelection>().is_err());
    }

    #[test]
    fn serde_roundtrip_validates() {
        let id: TileId = serde_json::from_str("\"00N_000E\"").unwrap();
        assert_eq!(id.as_str(), "00N_000E");
        assert!(serde_json::from_str::<TileId>("\"nope\"").is_err());
    }
}
