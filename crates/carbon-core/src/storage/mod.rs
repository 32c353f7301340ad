//! Remote object storage as the pipelines see it: list a directory, copy
//! matching objects down, copy matching files up.
//!
//! Directories are URL-like strings (`s3://bucket/prefix/`). Include filters
//! are shell globs over object names, the way `aws s3 cp --include` takes them.

pub mod aws;
pub mod local;

use std::path::Path;

pub use aws::AwsCli;
pub use local::LocalStore;

use crate::error::Result;

pub trait ObjectStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// Object names directly under `dir`. A missing directory lists empty.
    fn list(&self, dir: &str) -> Result<Vec<String>>;

    /// Copies every object in `dir` whose name matches `include` into `dest`.
    fn download(&self, dir: &str, include: &str, dest: &Path) -> Result<()>;

    /// Copies every file in `src` whose name matches `include` into `dir`.
    fn upload(&self, src: &Path, include: &str, dir: &str) -> Result<()>;
}
