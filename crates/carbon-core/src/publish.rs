//! Upload of validated outputs.

use std::path::Path;

use log::{info, warn};

use crate::config::Dataset;
use crate::error::{Error, Result};
use crate::stage::present_locally;
use crate::storage::ObjectStore;

/// Uploads local artifacts by pattern. Disabled by `--no-upload` or by the
/// lack of a store; disabled publishing is a no-op, not an error.
pub struct ResultPublisher<'a> {
    store: Option<&'a dyn ObjectStore>,
    upload: bool,
    work_dir: &'a Path,
}

impl<'a> ResultPublisher<'a> {
    pub fn new(store: Option<&'a dyn ObjectStore>, upload: bool, work_dir: &'a Path) -> Self {
        if upload && store.is_none() {
            warn!("no object store available; uploads disabled");
        }
        Self { store, upload, work_dir }
    }

    pub fn is_enabled(&self) -> bool {
        self.upload && self.store.is_some()
    }

    /// Uploads every local tile of `dataset`'s pattern into its directory.
    /// Returns true when something was sent.
    pub fn publish(&self, dataset: &Dataset) -> Result<bool> {
        self.send(&dataset.pattern.glob(), &dataset.dir)
    }

    /// Uploads one local file into `dir`.
    pub fn publish_file(&self, file_name: &str, dir: &str) -> Result<bool> {
        self.send(file_name, dir)
    }

    fn send(&self, include: &str, dir: &str) -> Result<bool> {
        let Some(store) = self.store.filter(|_| self.upload) else {
            return Ok(false);
        };
        if !present_locally(self.work_dir, include) {
            info!("nothing matching {include} to upload");
            return Ok(false);
        }
        info!("uploading {include} to {dir}");
        store
            .upload(self.work_dir, include, dir)
            .map_err(|e| Error::Storage(format!("upload of {include} to {dir} failed: {e}")))?;
        Ok(true)
    }
}
