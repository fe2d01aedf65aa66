//! # ensembler
//!
//! > "As far as the laws of mathematics refer to reality, they are not
//! > certain; and as far as they are certain, they do not refer to
//! > reality."
//! >
//! > -- Albert Einstein
//!
//! A transport simulation is usually run once; reality deserves error bars.
//! The ensembler takes one IMAS-style data entry and turns it into an
//! ensemble: it sweeps chosen fields over value ranges to create perturbed
//! copies of the entry, and once the transport code has been run on those
//! copies it merges them back into a single entry with uncertainty bands.
//!
//! ## Installation
//!
//! The ensembler is written in Rust and requires a Rust compiler. The Rust
//! toolchain can be installed from [here](https://rust-lang.org).
//!
//! Once the Rust toolchain is installed, from within the repository run
//!
//! ```bash
//! cargo install --path .
//! ```
//!
//! This will install the ensembler executable to your cargo installs and it
//! will be available on your path as `ensembler`.
//!
//! ## Use
//!
//! The ensembler uses the following CLI:
//!
//! ```txt
//! ensembler --config/-c /path/to/some/config.yaml <command>
//! ```
//!
//! where `<command>` is one of
//!
//! - `new`: write a template configuration file to edit
//! - `create`: expand the sweep and write one data entry per sample, plus a
//!   manifest of the generated runs
//! - `merge`: rebase the runs from the manifest onto the template's bases
//!   and write per-cell statistics to the output entry
//! - `variables`: resolve the variables listing against a given data entry
//!
//! ### Configuration
//!
//! Configurations are defined as the following YAML:
//!
//! ```yaml
//! imasdb: ./imasdb
//! create:
//!   template: alice/jet/92436/1
//!   run_start: 100
//!   dimensions:
//!     - {variable: profiles_1d/0/t_i_average, operator: multiply, values: [1.1, 1.2, 1.3]}
//!     - {variable: profiles_1d/0/zeff, operator: add, values: [0.01, 0.02, 0.03]}
//!   sampler: {method: latin-hypercube, n_samples: 5, seed: 0}
//! merge:
//!   template: alice/jet/92436/1
//!   output: alice/jet/92436/2
//!   plan:
//!     - ids: core_profiles
//!       grid: profiles_1d/*/grid/rho_tor_norm
//!       variables: [profiles_1d/*/t_i_average]
//! ```
//!
//! Some important notes:
//!
//! - Data entries are named `user/db/shot/run`; leave the user off and it
//!   defaults to whoever is running the tool.
//! - The cartesian sampler writes every value combination. That count grows
//!   multiplicatively with each dimension, so for wide sweeps pick one of
//!   the `n_samples` samplers instead.
//! - `create` refuses to overwrite existing run entries unless `--force`
//!   is passed.
//! - The merge output entry must differ from the template.
//!
//! ### Data layout
//!
//! Entries live under the `imasdb` root, one directory per entry and one
//! HDF5 file per IDS:
//!
//! ```txt
//! <imasdb>/alice/jet/92436/100/
//! |---- core_profiles.h5
//! |---- equilibrium.h5
//! ```
//!
//! Inside a file, groups hold named fields, repeated structures are groups
//! with members `0..n-1`, and the data itself sits in scalar or 1-d float
//! datasets.
//!
//! ## Why an ensemble?
//!
//! Transport codes are deterministic, but their inputs are not: measured
//! profiles come with instrument error, and some inputs are plain guesses.
//! Running the code once on the measured profiles gives one answer and no
//! idea how much the input uncertainty moves it. Running it on an ensemble
//! of perturbed copies gives a spread, and the spread is the error bar.
//! The ensembler only handles the two ends of that loop. Submitting the
//! runs in between to a cluster is left to you and your scheduler.

pub mod config;
pub mod create;
pub mod error;
pub mod handle;
pub mod mapping;
pub mod merge;
pub mod ops;
pub mod rebase;
pub mod samplers;
pub mod storage;
pub mod tree;
pub mod variables;

pub use config::Config;
pub use create::{run_create, CreateConfig};
pub use handle::{ImasHandle, RunRecord};
pub use mapping::IdsMapping;
pub use merge::{run_merge, MergeConfig, MergeStep};
pub use ops::{Operation, OperationDim, Operator};
pub use rebase::Extrapolate;
pub use samplers::Sampler;
pub use storage::{HdfStore, IdsStore, MemStore, StoreKind};
pub use tree::{Node, Value};
pub use variables::{VarLookup, VariableResolver};
