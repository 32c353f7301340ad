use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use glob::Pattern;
use log::debug;

use super::ObjectStore;
use crate::error::{Error, Result};

/// A directory tree standing in for the bucket: `s3://bucket/a/b/` maps to
/// `<root>/bucket/a/b/`.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

fn include_pattern(include: &str) -> Result<Pattern> {
    Pattern::new(include).map_err(|e| Error::Config(format!("bad include filter `{include}`: {e}")))
}

/// Names of the regular files in `dir` matching `pattern`, sorted.
fn matching_files(dir: &Path, pattern: &Pattern) -> Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if pattern.matches(name) {
                names.push(name.to_owned());
            }
        }
    }
    names.sort();
    Ok(names)
}

/// Names of the regular files directly in `dir`, sorted.
pub(crate) fn file_names(dir: &Path) -> Result<Vec<String>> {
    matching_files(dir, &include_pattern("*")?)
}

fn copy_matching(from: &Path, include: &str, to: &Path) -> Result<usize> {
    let pattern = include_pattern(include)?;
    let names = matching_files(from, &pattern)?;
    if !names.is_empty() {
        fs::create_dir_all(to)?;
    }
    for name in &names {
        fs::copy(from.join(name), to.join(name))?;
    }
    Ok(names.len())
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Filesystem directory behind a store directory string.
    pub fn resolve(&self, dir: &str) -> Result<PathBuf> {
        let rel = dir.strip_prefix("s3://").unwrap_or(dir).trim_start_matches('/');
        let rel = Path::new(rel);
        if rel.components().any(|c| !matches!(c, Component::Normal(_))) {
            return Err(Error::Storage(format!("`{dir}` escapes the store root")));
        }
        Ok(self.root.join(rel))
    }
}

impl ObjectStore for LocalStore {
    fn name(&self) -> &'static str {
        "local"
    }

    fn list(&self, dir: &str) -> Result<Vec<String>> {
        file_names(&self.resolve(dir)?)
    }

    fn download(&self, dir: &str, include: &str, dest: &Path) -> Result<()> {
        let n = copy_matching(&self.resolve(dir)?, include, dest)?;
        debug!("fetched {n} object(s) matching {include} from {dir}");
        Ok(())
    }

    fn upload(&self, src: &Path, include: &str, dir: &str) -> Result<()> {
        let n = copy_matching(src, include, &self.resolve(dir)?)?;
        debug!("stored {n} file(s) matching {include} in {dir}");
        Ok(())
    }
}
