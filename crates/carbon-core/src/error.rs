use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Orchestration phase a run was in when it halted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Resolve,
    Stage,
    Transform,
    Validate,
    Publish,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Resolve => "tile resolution",
            Phase::Stage => "input staging",
            Phase::Transform => "tile transform",
            Phase::Validate => "output validation",
            Phase::Publish => "publication",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("unrecognized model type `{given}` (expected one of: {expected})")]
    UnknownModelType { given: String, expected: String },

    #[error("malformed tile id `{0}` (expected e.g. 00N_000E or h29v08)")]
    InvalidTileId(String),

    #[error("malformed tile id list: {0}")]
    InvalidTileList(String),

    #[error("run date `{0}` is not a valid YYYYMMDD date")]
    InvalidRunDate(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("missing input raster {}", .0.display())]
    MissingInput(PathBuf),

    #[error("rasters {} and {} are not on the same grid: {reason}", .left.display(), .right.display())]
    GridMismatch {
        left: PathBuf,
        right: PathBuf,
        reason: String,
    },

    #[error("`{program}` exited with {status}: {stderr}")]
    ExternalTool {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("cannot launch `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("raster {}: {reason}", .path.display())]
    Raster { path: PathBuf, reason: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("worker panicked while processing tile {0}")]
    WorkerPanic(String),

    #[error("{phase} failed: {source}")]
    PhaseFailed {
        phase: Phase,
        #[source]
        source: Box<Error>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Tiff(#[from] tiff::TiffError),

    #[error(transparent)]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

impl Error {
    pub(crate) fn in_phase(self, phase: Phase) -> Self {
        Error::PhaseFailed {
            phase,
            source: Box::new(self),
        }
    }
}
