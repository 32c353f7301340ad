//! Input staging: make sure each tile's inputs are in the working directory.

use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::config::Source;
use crate::error::{Error, Result};
use crate::resolve::TileResolver;
use crate::storage::ObjectStore;
use crate::tile_id::TileId;

/// Above this many tiles a whole directory is fetched by pattern rather
/// than tile by tile.
pub const BULK_DOWNLOAD_THRESHOLD: usize = 2;

/// Inputs a pipeline needs for every tile.
#[derive(Debug, Clone, Default)]
pub struct DownloadManifest {
    pub sources: Vec<Source>,
}

impl DownloadManifest {
    pub fn new(sources: impl IntoIterator<Item = Source>) -> Self {
        Self { sources: sources.into_iter().collect() }
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Files in `work_dir` matching the include filter, sorted by name.
pub fn local_matches(work_dir: &Path, include: &str) -> Vec<PathBuf> {
    let dir = glob::Pattern::escape(&work_dir.to_string_lossy());
    let pattern = Path::new(&dir).join(include);
    let Ok(paths) = glob::glob(&pattern.to_string_lossy()) else {
        return Vec::new();
    };
    let mut found: Vec<PathBuf> = paths.filter_map(|p| p.ok()).filter(|p| p.is_file()).collect();
    found.sort();
    found
}

/// True when a file matching the include filter is already in `work_dir`.
pub fn present_locally(work_dir: &Path, include: &str) -> bool {
    !local_matches(work_dir, include).is_empty()
}

pub struct InputStager<'a> {
    store: Option<&'a dyn ObjectStore>,
    resolver: &'a TileResolver<'a>,
    work_dir: &'a Path,
}

impl<'a> InputStager<'a> {
    pub fn new(store: Option<&'a dyn ObjectStore>, resolver: &'a TileResolver<'a>, work_dir: &'a Path) -> Self {
        Self { store, resolver, work_dir }
    }

    /// Fetches what is missing. Without a store the inputs are assumed to be
    /// local already. Any failed transfer aborts staging.
    pub fn stage(&self, manifest: &DownloadManifest, tiles: &[TileId]) -> Result<()> {
        let Some(store) = self.store else {
            warn!("no object store available; assuming inputs are already in {}", self.work_dir.display());
            return Ok(());
        };
        if tiles.is_empty() {
            return Ok(());
        }
        std::fs::create_dir_all(self.work_dir)?;

        for source in &manifest.sources {
            let source = self.resolver.effective(source)?;
            let dir = source.dir();

            let missing: Vec<&TileId> = tiles
                .iter()
                .filter(|t| !present_locally(self.work_dir, &source.include_for(t)))
                .collect();
            if missing.is_empty() {
                debug!("all {} tile(s) of {dir} already local", tiles.len());
                continue;
            }
            // a bulk fetch would overwrite local copies, so it is only used
            // when none of the tiles are local yet
            if missing.len() > BULK_DOWNLOAD_THRESHOLD && missing.len() == tiles.len() {
                let include = source.include_all();
                info!("downloading {include} from {dir} ({} tile(s))", missing.len());
                store.download(dir, &include, self.work_dir).map_err(|e| transfer_failed(dir, e))?;
            } else {
                for tile in missing {
                    let include = source.include_for(tile);
                    info!("downloading {include} from {dir}");
                    store.download(dir, &include, self.work_dir).map_err(|e| transfer_failed(dir, e))?;
                }
            }
        }
        Ok(())
    }
}

fn transfer_failed(dir: &str, e: Error) -> Error {
    match e {
        Error::Storage(_) => e,
        other => Error::Storage(format!("download from {dir} failed: {other}")),
    }
}
