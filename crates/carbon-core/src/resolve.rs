//! Which tiles a run processes.

use std::collections::BTreeSet;
use std::path::Path;

use log::{info, warn};

use crate::config::{ModelType, Source};
use crate::error::{Error, Result};
use crate::storage::{local, ObjectStore};
use crate::tile_id::{TileId, TileSelection};

/// Lists tile ids from remote storage, or from the working directory when
/// no store is available.
pub struct TileResolver<'a> {
    store: Option<&'a dyn ObjectStore>,
    work_dir: &'a Path,
    model_type: ModelType,
}

fn ids_in(names: &[String], source: &Source) -> BTreeSet<TileId> {
    names.iter().filter_map(|n| source.tile_of(n)).collect()
}

impl<'a> TileResolver<'a> {
    pub fn new(store: Option<&'a dyn ObjectStore>, work_dir: &'a Path, model_type: ModelType) -> Self {
        Self { store, work_dir, model_type }
    }

    /// The sensitivity variant of `source` when its directory holds tiles,
    /// otherwise `source` itself.
    pub fn effective(&self, source: &Source) -> Result<Source> {
        if let (Some(store), Some(variant)) = (self.store, source.variant(self.model_type)) {
            if !ids_in(&store.list(variant.dir())?, &variant).is_empty() {
                return Ok(variant);
            }
        }
        Ok(source.clone())
    }

    /// Tile ids that have a file in `source`.
    pub fn tiles_in(&self, source: &Source) -> Result<BTreeSet<TileId>> {
        match self.store {
            Some(store) => {
                let source = self.effective(source)?;
                Ok(ids_in(&store.list(source.dir())?, &source))
            }
            None => {
                let names = local::file_names(self.work_dir)?;
                let mut ids = ids_in(&names, source);
                if let Some(variant) = source.variant(self.model_type) {
                    ids.extend(ids_in(&names, &variant));
                }
                Ok(ids)
            }
        }
    }

    /// An explicit selection is used as given. `all` becomes the tiles
    /// present in every source.
    pub fn resolve(&self, selection: &TileSelection, sources: &[Source]) -> Result<Vec<TileId>> {
        let sources = match selection {
            TileSelection::Explicit(ids) => return Ok(ids.clone()),
            TileSelection::All if sources.is_empty() => {
                return Err(Error::Config("`all` needs at least one tile source".into()))
            }
            TileSelection::All => sources,
        };

        let mut eligible: Option<BTreeSet<TileId>> = None;
        for source in sources {
            let ids = self.tiles_in(source)?;
            info!("{} tile(s) in {}{}", ids.len(), source.dir(), source.include_all());
            eligible = Some(match eligible {
                None => ids,
                Some(acc) => acc.intersection(&ids).cloned().collect(),
            });
        }
        let tiles: Vec<TileId> = eligible.unwrap_or_default().into_iter().collect();
        if tiles.is_empty() {
            warn!("no tile is present in every source");
        }
        Ok(tiles)
    }
}
