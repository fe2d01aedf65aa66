//! Error types for the ensembler core.
//!
//! Every failure here is a deterministic data or configuration problem, so
//! nothing in this crate retries. Messages carry the offending variable,
//! path, or handle so the config can be corrected directly.

use thiserror::Error;

/// Errors walking or mutating an IDS tree.
#[derive(Debug, Error)]
pub enum TreeError {
    #[error("path not found: {path}")]
    PathNotFound { path: String },

    #[error("path does not end in a data field: {path}")]
    NotALeaf { path: String },

    #[error("expected an array at {path}")]
    NotAnArray { path: String },

    #[error("expected a repeated structure at {path}")]
    NotAList { path: String },
}

/// Errors rebasing tabular data onto a reference basis.
#[derive(Debug, Error)]
pub enum RebaseError {
    #[error("interpolation target {value} outside source range [{lo}, {hi}]")]
    OutOfRange { value: f64, lo: f64, hi: f64 },

    #[error("{axis} basis must be strictly increasing (violated at index {index})")]
    NonMonotonic { axis: &'static str, index: usize },

    #[error("time rebase requires one shared grid across time steps (time step {tstep} differs)")]
    GridMismatch { tstep: usize },

    #[error("time step {tstep}: column has {found} points, grid has {expected}")]
    ColumnLength {
        tstep: usize,
        expected: usize,
        found: usize,
    },

    #[error("need at least one source point to interpolate")]
    EmptySource,
}

/// Errors resolving a named variable against a data entry.
#[derive(Debug, Error)]
pub enum VariableError {
    #[error("variable {name:?} is not in the variables listing")]
    UnknownVariable { name: String },

    #[error("no candidate matched for variable {name:?} (tried {spec})")]
    Unresolved { name: String, spec: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors parsing a handle identity string.
#[derive(Debug, Error)]
pub enum HandleError {
    #[error("malformed handle {string:?}: expected `user/db/shot/run` or `db/shot/run`")]
    Malformed { string: String },

    #[error("malformed handle {string:?}: {field} must be an unsigned integer")]
    BadField { string: String, field: &'static str },
}

/// Errors reading or writing backing storage for a handle.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("no {ids} data stored for {handle}")]
    MissingIds { handle: String, ids: String },

    #[error("unsupported dataset rank {rank} at {path} (scalars and 1-d arrays only)")]
    UnsupportedRank { path: String, rank: usize },

    #[error("IDS root must be a structured node")]
    BadRoot,

    #[error(transparent)]
    Hdf5(#[from] hdf5_metno::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors committing staged writes through to backing storage.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors loading or validating the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Validation(String),

    #[error("could not read {}: {source}", path.display())]
    Read {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("could not parse {}: {source}", path.display())]
    Parse {
        path: std::path::PathBuf,
        source: serde_yaml::Error,
    },

    #[error("could not write {}: {source}", path.display())]
    Write {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
}

/// Errors expanding a sampling matrix.
#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("sampling space is empty (every dimension needs at least one value)")]
    EmptySpace,

    #[error("sobol sampling supports up to {max} dimensions, got {got}")]
    DimensionLimit { max: usize, got: usize },
}

/// Errors creating run data entries from the sweep matrix.
#[derive(Debug, Error)]
pub enum CreateError {
    #[error("target {handle} already has {ids} data (pass --force to overwrite)")]
    TargetExists { handle: String, ids: String },

    #[error("run {run}, {ids}: {source}")]
    Apply {
        run: String,
        ids: String,
        source: TreeError,
    },

    #[error(transparent)]
    Sampler(#[from] SamplerError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors merging run data into an output entry.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("reference {what} missing from template: {source}")]
    MissingReference {
        what: &'static str,
        source: TreeError,
    },

    #[error("template {what} is empty")]
    EmptyReference { what: &'static str },

    #[error("run {run}: {source}")]
    RunData { run: String, source: TreeError },

    #[error("run {run}: {source}")]
    RunRebase { run: String, source: RebaseError },

    #[error("run {run} is not on the common lattice")]
    LatticeMismatch { run: String },

    #[error("nothing to merge: no runs")]
    NoRuns,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Rebase(#[from] RebaseError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("could not write merge summary: {0}")]
    Summary(#[from] polars::prelude::PolarsError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
